use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::mutable::{ChangeSet, CodecError, JsonColumn};

pub const PARAMETERS: &str = "parameters";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "script_type", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ScriptType {
    #[serde(alias = "Quality Assurance")]
    Qa,
    #[serde(alias = "T", alias = "Task")]
    Task,
    #[serde(alias = "R", alias = "Report")]
    Report,
}

impl ScriptType {
    /// Accepts the upload form's short codes as well as the full names.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "QA" | "QUALITY ASSURANCE" => Some(ScriptType::Qa),
            "T" | "TASK" => Some(ScriptType::Task),
            "R" | "REPORT" => Some(ScriptType::Report),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ScriptType::Qa => "Quality Assurance Script",
            ScriptType::Task => "Task Script",
            ScriptType::Report => "Reporting Script",
        }
    }
}

/// Raw `jupyter_notebook` row; `parameters` is still JSON text.
#[derive(Debug, Clone, FromRow)]
pub struct NotebookRow {
    pub id: Uuid,
    pub name: String,
    pub script_type: ScriptType,
    pub path: String,
    pub created_at: OffsetDateTime,
    pub parameters: Option<String>,
    pub author: Option<Uuid>,
}

/// A loaded notebook. Mutating `parameters` in place marks the row dirty.
#[derive(Debug, Serialize, Deserialize)]
#[serde(from = "NotebookSnapshot")]
pub struct Notebook {
    pub id: Uuid,
    pub name: String,
    pub script_type: ScriptType,
    pub path: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub parameters: JsonColumn,
    pub author: Option<Uuid>,
    #[serde(skip)]
    changes: Arc<ChangeSet>,
}

impl Notebook {
    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    pub fn is_dirty(&self) -> bool {
        self.changes.is_dirty()
    }

    /// Parameters handed to the execution engine; NULL means no parameters.
    pub fn execution_parameters(&self) -> Value {
        self.parameters
            .to_value()
            .unwrap_or_else(|| Value::Object(Default::default()))
    }
}

impl TryFrom<NotebookRow> for Notebook {
    type Error = CodecError;

    fn try_from(row: NotebookRow) -> Result<Self, Self::Error> {
        let changes = Arc::new(ChangeSet::default());
        Ok(Self {
            parameters: JsonColumn::decode(PARAMETERS, row.parameters.as_deref(), &changes)?,
            id: row.id,
            name: row.name,
            script_type: row.script_type,
            path: row.path,
            created_at: row.created_at,
            author: row.author,
            changes,
        })
    }
}

/// Serialized form of a [`Notebook`], e.g. from a cache. Restoring it
/// re-attaches the tracked parameters to the new row.
#[derive(Debug, Deserialize)]
pub struct NotebookSnapshot {
    pub id: Uuid,
    pub name: String,
    pub script_type: ScriptType,
    pub path: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub parameters: Option<Value>,
    pub author: Option<Uuid>,
}

impl From<NotebookSnapshot> for Notebook {
    fn from(s: NotebookSnapshot) -> Self {
        let changes = Arc::new(ChangeSet::default());
        Self {
            parameters: JsonColumn::load(PARAMETERS, s.parameters, &changes),
            id: s.id,
            name: s.name,
            script_type: s.script_type,
            path: s.path,
            created_at: s.created_at,
            author: s.author,
            changes,
        }
    }
}

/// Input for [`Notebook::create`].
#[derive(Debug)]
pub struct NewNotebook<'a> {
    pub name: &'a str,
    pub script_type: ScriptType,
    pub path: &'a str,
    pub parameters: Option<&'a Value>,
    pub author: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(parameters: Option<&str>) -> NotebookRow {
        NotebookRow {
            id: Uuid::new_v4(),
            name: "daily-qa".into(),
            script_type: ScriptType::Qa,
            path: "/srv/notebooks/daily-qa.ipynb".into(),
            created_at: OffsetDateTime::UNIX_EPOCH,
            parameters: parameters.map(str::to_string),
            author: None,
        }
    }

    #[test]
    fn script_type_codes() {
        assert_eq!(ScriptType::parse("qa"), Some(ScriptType::Qa));
        assert_eq!(ScriptType::parse("T"), Some(ScriptType::Task));
        assert_eq!(ScriptType::parse("Report"), Some(ScriptType::Report));
        assert_eq!(ScriptType::parse("X"), None);
        assert_eq!(ScriptType::Task.label(), "Task Script");
        assert_eq!(serde_json::to_value(ScriptType::Qa).unwrap(), json!("QA"));
        let t: ScriptType = serde_json::from_value(json!("R")).unwrap();
        assert_eq!(t, ScriptType::Report);
    }

    #[test]
    fn mutating_parameters_marks_row_dirty() {
        let mut nb = Notebook::try_from(row(Some(r#"{"n": 1}"#))).unwrap();
        assert!(!nb.is_dirty());

        nb.parameters.dict_mut().unwrap().insert("n", 2);
        assert!(nb.is_dirty());
        assert!(nb.changes().is_modified(PARAMETERS));
        assert_eq!(nb.changes().notifications(), 1);
        assert_eq!(nb.parameters.encode().unwrap().as_deref(), Some(r#"{"n":2}"#));
    }

    #[test]
    fn corrupt_parameters_fail_to_load() {
        assert!(Notebook::try_from(row(Some("{oops"))).is_err());
    }

    #[test]
    fn null_parameters_execute_with_empty_mapping() {
        let nb = Notebook::try_from(row(None)).unwrap();
        assert_eq!(nb.execution_parameters(), json!({}));
    }

    #[test]
    fn snapshot_roundtrip_reattaches_parameters() {
        let nb = Notebook::try_from(row(Some(r#"{"n": 1, "tags": ["a"]}"#))).unwrap();
        let text = serde_json::to_string(&nb).unwrap();

        let mut restored: Notebook = serde_json::from_str(&text).unwrap();
        assert_eq!(restored.id, nb.id);
        assert_eq!(restored.parameters.to_value(), Some(json!({"n": 1, "tags": ["a"]})));
        assert_eq!(restored.parameters.get().unwrap().owner_count(), 1);
        assert!(!restored.is_dirty());

        restored
            .parameters
            .dict_mut()
            .and_then(|d| d.get_mut("tags"))
            .and_then(crate::mutable::Tracked::as_list_mut)
            .unwrap()
            .append("b");
        assert!(restored.is_dirty());
        assert!(!nb.is_dirty());
    }
}
