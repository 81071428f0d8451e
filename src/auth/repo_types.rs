use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: Uuid,                   // unique user ID
    pub username: String,           // unique, at most 64 chars
    pub email: String,              // unique, at most 120 chars
    #[serde(skip_serializing)]
    pub password_hash: String,      // Argon2 hash, not exposed in JSON
    pub about_me: Option<String>,   // at most 140 chars
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,  // stamped on every authenticated request
}

/// Input for [`User::create`].
#[derive(Debug)]
pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
}
