use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::notebooks::repo_types::{Notebook, ScriptType};
use crate::runs::PapermillRun;

#[derive(Debug, Serialize)]
pub struct NotebookListItem {
    pub id: Uuid,
    pub name: String,
    pub script_type: ScriptType,
    pub script_label: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub author: Option<Uuid>,
}

impl From<&Notebook> for NotebookListItem {
    fn from(nb: &Notebook) -> Self {
        Self {
            id: nb.id,
            name: nb.name.clone(),
            script_type: nb.script_type,
            script_label: nb.script_type.label(),
            created_at: nb.created_at,
            author: nb.author,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct NotebookDetails<'a> {
    #[serde(flatten)]
    pub notebook: &'a Notebook,
    pub script_label: &'static str,
    pub recent_runs: Vec<RunView>,
}

#[derive(Debug, Serialize)]
pub struct RunView {
    #[serde(flatten)]
    pub run: PapermillRun,
    pub status: &'static str,
}

impl From<PapermillRun> for RunView {
    fn from(run: PapermillRun) -> Self {
        Self {
            status: run.status(),
            run,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RunList {
    pub notebook: NotebookListItem,
    pub runs: Vec<RunView>,
}
