use std::sync::Arc;

use serde::{Serialize, Serializer};
use serde_json::Value;

use super::changes::ChangeSet;
use super::codec::{self, CodecError};
use super::tracked::{Tracked, TrackedDict};

/// A JSON-typed attribute bound to its owning row.
///
/// The row's [`ChangeSet`] is flagged under `key` whenever the value is
/// replaced or mutated in place.
#[derive(Debug)]
pub struct JsonColumn {
    key: &'static str,
    value: Option<Tracked>,
    owner: Arc<ChangeSet>,
}

impl JsonColumn {
    /// Load or refresh hook: coerce the raw value and attach it to `owner`.
    pub fn load(key: &'static str, value: Option<Value>, owner: &Arc<ChangeSet>) -> Self {
        let value = value.map(Tracked::coerce);
        if let Some(owners) = value.as_ref().and_then(Tracked::owners) {
            owners.attach(owner, key);
        }
        Self {
            key,
            value,
            owner: Arc::clone(owner),
        }
    }

    pub fn decode(
        key: &'static str,
        text: Option<&str>,
        owner: &Arc<ChangeSet>,
    ) -> Result<Self, CodecError> {
        Ok(Self::load(key, codec::decode(text)?, owner))
    }

    pub fn encode(&self) -> Result<Option<String>, CodecError> {
        codec::encode(self.to_value().as_ref())
    }

    pub fn get(&self) -> Option<&Tracked> {
        self.value.as_ref()
    }

    pub fn get_mut(&mut self) -> Option<&mut Tracked> {
        self.value.as_mut()
    }

    pub fn dict_mut(&mut self) -> Option<&mut TrackedDict> {
        self.value.as_mut().and_then(Tracked::as_dict_mut)
    }

    pub fn to_value(&self) -> Option<Value> {
        self.value.as_ref().map(Tracked::to_value)
    }

    /// Replace the whole value. The new value is coerced and attached, the
    /// old one is detached and handed back.
    pub fn replace(&mut self, value: Option<Value>) -> Option<Tracked> {
        let new = value.map(Tracked::coerce);
        if let Some(owners) = new.as_ref().and_then(Tracked::owners) {
            owners.attach(&self.owner, self.key);
        }
        let old = std::mem::replace(&mut self.value, new);
        if let Some(owners) = old.as_ref().and_then(Tracked::owners) {
            owners.detach(&self.owner);
        }
        self.owner.flag_modified(self.key);
        old
    }
}

impl Serialize for JsonColumn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn load_attaches_owner() {
        let owner = Arc::new(ChangeSet::default());
        let mut column = JsonColumn::load("parameters", Some(json!({"n": 1})), &owner);
        assert_eq!(column.get().unwrap().owner_count(), 1);
        assert!(!owner.is_dirty());

        column.dict_mut().unwrap().insert("n", 2);
        assert!(owner.is_modified("parameters"));
        assert_eq!(column.to_value(), Some(json!({"n": 2})));
    }

    #[test]
    fn null_and_scalar_columns() {
        let owner = Arc::new(ChangeSet::default());
        let column = JsonColumn::decode("parameters", None, &owner).unwrap();
        assert!(column.get().is_none());
        assert_eq!(column.encode().unwrap(), None);

        let column = JsonColumn::decode("parameters", Some("7"), &owner).unwrap();
        assert_eq!(column.get().unwrap().owner_count(), 0);
        assert_eq!(column.encode().unwrap().as_deref(), Some("7"));
    }

    #[test]
    fn replace_detaches_old_value() {
        let owner = Arc::new(ChangeSet::default());
        let mut column = JsonColumn::load("parameters", Some(json!({"n": 1})), &owner);

        let mut old = column.replace(Some(json!(["a"]))).unwrap();
        assert!(owner.is_modified("parameters"));
        assert_eq!(owner.notifications(), 1);
        assert_eq!(old.owner_count(), 0);

        old.as_dict_mut().unwrap().insert("n", 3);
        assert_eq!(owner.notifications(), 1);

        column
            .get_mut()
            .and_then(Tracked::as_list_mut)
            .unwrap()
            .append("b");
        assert_eq!(owner.notifications(), 2);
        assert_eq!(column.encode().unwrap().as_deref(), Some(r#"["a","b"]"#));
    }

    #[test]
    fn replace_with_none_marks_modified() {
        let owner = Arc::new(ChangeSet::default());
        let mut column = JsonColumn::load("parameters", Some(json!({})), &owner);
        owner.take();
        assert!(column.replace(None).is_some());
        assert!(owner.is_modified("parameters"));
        assert_eq!(column.to_value(), None);
    }

    #[test]
    fn corrupt_text_fails_to_load() {
        let owner = Arc::new(ChangeSet::default());
        assert!(JsonColumn::decode("parameters", Some("not json"), &owner).is_err());
    }
}
