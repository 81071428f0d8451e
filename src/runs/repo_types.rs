use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// One attempt to execute a notebook through Papermill.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PapermillRun {
    pub id: Uuid,
    pub notebook: Uuid,
    pub triggered_by: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub output_path: String,
    pub ran_successfully: Option<bool>, // NULL while the run is in flight
}

impl PapermillRun {
    pub fn status(&self) -> &'static str {
        match self.ran_successfully {
            None => "running",
            Some(true) => "succeeded",
            Some(false) => "failed",
        }
    }
}
