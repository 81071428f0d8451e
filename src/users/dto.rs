use serde::Serialize;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::User;
use crate::notebooks::dto::RunView;
use crate::notebooks::NotebookListItem;

/// Gravatar URL for `email`, using the SHA-256 hash of the normalized address.
pub fn avatar_url(email: &str, size: u32) -> String {
    let digest = Sha256::digest(email.trim().to_lowercase().as_bytes());
    format!(
        "https://www.gravatar.com/avatar/{}?d=identicon&s={size}",
        hex::encode(digest)
    )
}

#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub username: String,
    pub about_me: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
    pub avatar: String,
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        Self {
            avatar: avatar_url(&u.email, 128),
            id: u.id,
            username: u.username,
            about_me: u.about_me,
            last_seen: u.last_seen,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct IndexPage {
    pub user: PublicUser,
    pub notebooks: Vec<NotebookListItem>,
}

#[derive(Debug, Serialize)]
pub struct UserPage {
    pub user: PublicUser,
    pub runs: Vec<RunView>,
}
