use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::{Arc, Mutex, Weak};

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use super::changes::{lock, ChangeSet};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackedError {
    #[error("index {index} out of range for list of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("range {start}..{end} out of bounds for list of length {len}")]
    RangeOutOfBounds { start: usize, end: usize, len: usize },
}

#[derive(Debug)]
struct OwnerLink {
    owner: Weak<ChangeSet>,
    key: &'static str,
}

impl OwnerLink {
    fn is(&self, owner: &Arc<ChangeSet>) -> bool {
        std::ptr::eq(self.owner.as_ptr(), Arc::as_ptr(owner))
    }
}

/// Owner set shared by every container of one coerced tree.
#[derive(Debug, Default)]
pub(crate) struct Owners {
    links: Mutex<Vec<OwnerLink>>,
}

impl Owners {
    pub(crate) fn attach(&self, owner: &Arc<ChangeSet>, key: &'static str) {
        let mut links = lock(&self.links);
        links.retain(|l| l.owner.strong_count() > 0);
        match links.iter_mut().find(|l| l.is(owner)) {
            Some(link) => link.key = key,
            None => links.push(OwnerLink {
                owner: Arc::downgrade(owner),
                key,
            }),
        }
    }

    pub(crate) fn detach(&self, owner: &Arc<ChangeSet>) {
        lock(&self.links).retain(|l| l.owner.strong_count() > 0 && !l.is(owner));
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.links)
            .iter()
            .filter(|l| l.owner.strong_count() > 0)
            .count()
    }

    fn changed(&self) {
        // Upgrade under the lock, notify after releasing it.
        let live: Vec<(Arc<ChangeSet>, &'static str)> = {
            let mut links = lock(&self.links);
            links.retain(|l| l.owner.strong_count() > 0);
            links
                .iter()
                .filter_map(|l| l.owner.upgrade().map(|o| (o, l.key)))
                .collect()
        };
        for (owner, key) in live {
            owner.flag_modified(key);
        }
    }
}

/// A decoded JSON value whose containers report in-place mutation to their
/// owning rows.
#[derive(Debug)]
pub enum Tracked {
    Scalar(Value),
    Dict(TrackedDict),
    List(TrackedList),
}

impl Tracked {
    /// Wrap mappings and sequences recursively. Scalars pass through.
    pub fn coerce(value: Value) -> Self {
        Self::coerce_with(value, &Arc::new(Owners::default()))
    }

    fn coerce_with(value: Value, owners: &Arc<Owners>) -> Self {
        match value {
            Value::Object(map) => Tracked::Dict(TrackedDict {
                entries: map
                    .into_iter()
                    .map(|(k, v)| (k, Self::coerce_with(v, owners)))
                    .collect(),
                owners: Arc::clone(owners),
            }),
            Value::Array(items) => Tracked::List(TrackedList {
                items: items
                    .into_iter()
                    .map(|v| Self::coerce_with(v, owners))
                    .collect(),
                owners: Arc::clone(owners),
            }),
            scalar => Tracked::Scalar(scalar),
        }
    }

    pub(crate) fn owners(&self) -> Option<&Arc<Owners>> {
        match self {
            Tracked::Scalar(_) => None,
            Tracked::Dict(d) => Some(&d.owners),
            Tracked::List(l) => Some(&l.owners),
        }
    }

    /// Number of live rows this value reports to.
    pub fn owner_count(&self) -> usize {
        self.owners().map_or(0, |o| o.len())
    }

    pub fn to_value(&self) -> Value {
        match self {
            Tracked::Scalar(v) => v.clone(),
            Tracked::Dict(d) => d.to_value(),
            Tracked::List(l) => l.to_value(),
        }
    }

    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            Tracked::Scalar(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&TrackedDict> {
        match self {
            Tracked::Dict(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_dict_mut(&mut self) -> Option<&mut TrackedDict> {
        match self {
            Tracked::Dict(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&TrackedList> {
        match self {
            Tracked::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut TrackedList> {
        match self {
            Tracked::List(l) => Some(l),
            _ => None,
        }
    }
}

impl PartialEq<Value> for Tracked {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Tracked::Scalar(a), b) => a == b,
            (Tracked::Dict(d), Value::Object(m)) => {
                d.entries.len() == m.len()
                    && d.entries
                        .iter()
                        .all(|(k, v)| m.get(k).is_some_and(|o| v == o))
            }
            (Tracked::List(l), Value::Array(a)) => {
                l.items.len() == a.len() && l.items.iter().zip(a).all(|(x, y)| x == y)
            }
            _ => false,
        }
    }
}

impl Serialize for Tracked {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Tracked::Scalar(v) => v.serialize(serializer),
            Tracked::Dict(d) => serializer.collect_map(d.entries.iter()),
            Tracked::List(l) => serializer.collect_seq(l.items.iter()),
        }
    }
}

/// Dictionary side of [`Tracked`].
#[derive(Debug)]
pub struct TrackedDict {
    entries: BTreeMap<String, Tracked>,
    owners: Arc<Owners>,
}

impl TrackedDict {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Tracked> {
        self.entries.get(key)
    }

    /// Nested containers share this dict's owners, so mutating through the
    /// returned reference still notifies them.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Tracked> {
        self.entries.get_mut(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Tracked)> {
        self.entries.iter()
    }

    /// Set `key`, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let value = Tracked::coerce_with(value.into(), &self.owners);
        let old = self.entries.insert(key.into(), value).map(|t| t.to_value());
        self.owners.changed();
        old
    }

    /// Delete `key`. A missing key changes nothing and notifies nobody.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let old = self.entries.remove(key)?;
        self.owners.changed();
        Some(old.to_value())
    }

    /// Remove every key. Clearing an empty dict notifies nobody.
    pub fn clear(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        self.entries.clear();
        self.owners.changed();
    }

    pub fn to_value(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(k, v)| (k.clone(), v.to_value()))
                .collect::<Map<String, Value>>(),
        )
    }
}

/// List side of [`Tracked`].
#[derive(Debug)]
pub struct TrackedList {
    items: Vec<Tracked>,
    owners: Arc<Owners>,
}

impl TrackedList {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Tracked> {
        self.items.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Tracked> {
        self.items.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tracked> {
        self.items.iter()
    }

    /// Assign `items[index]`, returning the previous value.
    pub fn set(&mut self, index: usize, value: impl Into<Value>) -> Result<Value, TrackedError> {
        let len = self.items.len();
        let slot = self
            .items
            .get_mut(index)
            .ok_or(TrackedError::IndexOutOfRange { index, len })?;
        let old = std::mem::replace(slot, Tracked::coerce_with(value.into(), &self.owners));
        self.owners.changed();
        Ok(old.to_value())
    }

    /// Delete `items[index]`.
    pub fn delete(&mut self, index: usize) -> Result<Value, TrackedError> {
        if index >= self.items.len() {
            return Err(TrackedError::IndexOutOfRange {
                index,
                len: self.items.len(),
            });
        }
        let old = self.items.remove(index);
        self.owners.changed();
        Ok(old.to_value())
    }

    /// Replace `range` with `values`, returning what was removed.
    pub fn splice<I>(&mut self, range: Range<usize>, values: I) -> Result<Vec<Value>, TrackedError>
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let len = self.items.len();
        if range.start > range.end || range.end > len {
            return Err(TrackedError::RangeOutOfBounds {
                start: range.start,
                end: range.end,
                len,
            });
        }
        let owners = Arc::clone(&self.owners);
        let replacement: Vec<Tracked> = values
            .into_iter()
            .map(|v| Tracked::coerce_with(v.into(), &owners))
            .collect();
        let removed = self
            .items
            .splice(range, replacement)
            .map(|t| t.to_value())
            .collect();
        self.owners.changed();
        Ok(removed)
    }

    pub fn append(&mut self, value: impl Into<Value>) {
        self.items
            .push(Tracked::coerce_with(value.into(), &self.owners));
        self.owners.changed();
    }

    /// Insert before `index`; an index past the end appends.
    pub fn insert(&mut self, index: usize, value: impl Into<Value>) {
        let index = index.min(self.items.len());
        self.items
            .insert(index, Tracked::coerce_with(value.into(), &self.owners));
        self.owners.changed();
    }

    pub fn extend<I>(&mut self, values: I)
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let owners = Arc::clone(&self.owners);
        self.items.extend(
            values
                .into_iter()
                .map(|v| Tracked::coerce_with(v.into(), &owners)),
        );
        self.owners.changed();
    }

    /// Remove the first item equal to `value`. Returns whether one was found.
    pub fn remove(&mut self, value: &Value) -> bool {
        let Some(pos) = self.items.iter().position(|t| t == value) else {
            return false;
        };
        self.items.remove(pos);
        self.owners.changed();
        true
    }

    /// Pop the item at `index`, or the last one when `index` is `None`.
    pub fn pop(&mut self, index: Option<usize>) -> Option<Value> {
        let index = match index {
            Some(i) if i < self.items.len() => i,
            Some(_) => return None,
            None => self.items.len().checked_sub(1)?,
        };
        let old = self.items.remove(index);
        self.owners.changed();
        Some(old.to_value())
    }

    pub fn to_value(&self) -> Value {
        Value::Array(self.items.iter().map(Tracked::to_value).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn owned(value: Value) -> (Tracked, Arc<ChangeSet>) {
        let owner = Arc::new(ChangeSet::default());
        let tracked = Tracked::coerce(value);
        tracked
            .owners()
            .expect("container")
            .attach(&owner, "parameters");
        (tracked, owner)
    }

    #[test]
    fn coercion_is_recursive_and_keeps_scalars() {
        let tracked = Tracked::coerce(json!({"a": [1, {"b": 2}], "c": "x"}));
        let dict = tracked.as_dict().unwrap();
        let list = dict.get("a").unwrap().as_list().unwrap();
        assert!(list.get(1).unwrap().as_dict().is_some());
        assert_eq!(dict.get("c").unwrap().as_scalar(), Some(&json!("x")));

        let scalar = Tracked::coerce(json!(5));
        assert_eq!(scalar.as_scalar(), Some(&json!(5)));
        assert_eq!(scalar.owner_count(), 0);
    }

    #[test]
    fn dict_mutations_notify_once_each() {
        let (mut tracked, owner) = owned(json!({"n": 1}));
        let dict = tracked.as_dict_mut().unwrap();

        assert_eq!(dict.insert("n", 2), Some(json!(1)));
        assert_eq!(owner.notifications(), 1);
        assert!(owner.is_modified("parameters"));

        assert_eq!(dict.remove("n"), Some(json!(2)));
        assert_eq!(owner.notifications(), 2);

        dict.insert("k", json!([1]));
        dict.clear();
        assert_eq!(owner.notifications(), 4);
        assert!(dict.is_empty());

        dict.clear();
        assert_eq!(owner.notifications(), 4);
    }

    #[test]
    fn removing_missing_key_does_not_notify() {
        let (mut tracked, owner) = owned(json!({"n": 1}));
        assert_eq!(tracked.as_dict_mut().unwrap().remove("missing"), None);
        assert_eq!(owner.notifications(), 0);
        assert!(!owner.is_dirty());
    }

    #[test]
    fn list_mutations_notify_once_each() {
        let (mut tracked, owner) = owned(json!([1, 2, 3]));
        let list = tracked.as_list_mut().unwrap();

        list.append(4);
        list.insert(0, 0);
        list.extend([5, 6]);
        assert!(list.remove(&json!(3)));
        assert_eq!(list.pop(None), Some(json!(6)));
        assert_eq!(list.pop(Some(0)), Some(json!(0)));
        assert_eq!(list.set(0, "one").unwrap(), json!(1));
        assert_eq!(list.delete(0).unwrap(), json!("one"));
        assert_eq!(list.splice(0..1, [json!(20), json!(21)]).unwrap(), vec![json!(2)]);

        assert_eq!(owner.notifications(), 9);
        assert_eq!(tracked.to_value(), json!([20, 21, 4, 5]));
    }

    #[test]
    fn list_noops_and_out_of_range() {
        let (mut tracked, owner) = owned(json!([]));
        let list = tracked.as_list_mut().unwrap();

        assert_eq!(list.pop(None), None);
        assert!(!list.remove(&json!(1)));
        assert_eq!(
            list.set(3, 1),
            Err(TrackedError::IndexOutOfRange { index: 3, len: 0 })
        );
        assert!(list.delete(0).is_err());
        assert!(list.splice(0..2, Vec::<Value>::new()).is_err());
        assert_eq!(owner.notifications(), 0);

        list.insert(10, "end");
        assert_eq!(tracked.to_value(), json!(["end"]));
        assert_eq!(owner.notifications(), 1);
    }

    #[test]
    fn nested_mutation_notifies_the_owner() {
        let (mut tracked, owner) = owned(json!({"outer": {"inner": [1]}}));
        tracked
            .as_dict_mut()
            .and_then(|d| d.get_mut("outer"))
            .and_then(Tracked::as_dict_mut)
            .and_then(|d| d.get_mut("inner"))
            .and_then(Tracked::as_list_mut)
            .unwrap()
            .append(2);
        assert_eq!(owner.notifications(), 1);
        assert_eq!(tracked, json!({"outer": {"inner": [1, 2]}}));
    }

    #[test]
    fn inserted_values_are_tracked_too() {
        let (mut tracked, owner) = owned(json!({}));
        let dict = tracked.as_dict_mut().unwrap();
        dict.insert("list", json!([]));
        dict.get_mut("list")
            .and_then(Tracked::as_list_mut)
            .unwrap()
            .append(1);
        assert_eq!(owner.notifications(), 2);
    }

    #[test]
    fn every_owner_is_notified_once_per_call() {
        let (mut tracked, first) = owned(json!({"n": 1}));
        let second = Arc::new(ChangeSet::default());
        tracked.owners().unwrap().attach(&second, "settings");
        assert_eq!(tracked.owner_count(), 2);

        tracked.as_dict_mut().unwrap().insert("n", 2);
        assert_eq!(first.notifications(), 1);
        assert_eq!(second.notifications(), 1);
        assert!(second.is_modified("settings"));
    }

    #[test]
    fn reattaching_updates_key_without_duplicating() {
        let (mut tracked, owner) = owned(json!([]));
        tracked.owners().unwrap().attach(&owner, "other");
        assert_eq!(tracked.owner_count(), 1);

        tracked.as_list_mut().unwrap().append(1);
        assert_eq!(owner.notifications(), 1);
        assert!(owner.is_modified("other"));
    }

    #[test]
    fn dropped_owners_are_pruned() {
        let (mut tracked, owner) = owned(json!({}));
        drop(owner);
        assert_eq!(tracked.owner_count(), 0);
        tracked.as_dict_mut().unwrap().insert("n", 1);
    }

    #[test]
    fn serializes_as_plain_json() {
        let tracked = Tracked::coerce(json!({"a": [1, {"b": null}]}));
        let text = serde_json::to_string(&tracked).unwrap();
        assert_eq!(text, r#"{"a":[1,{"b":null}]}"#);
    }
}
