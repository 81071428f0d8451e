use serde::Deserialize;
use serde_json::json;
use sqlx::PgExecutor;
use uuid::Uuid;
use validator::Validate;

use crate::auth::repo_types::User;

pub const INVALID_USERNAME: &str = "Invalid username.";

#[derive(Debug, Deserialize, Validate)]
pub struct EditProfileForm {
    #[serde(default)]
    #[validate(length(min = 1, max = 64, message = "Username must be 1 to 64 characters."))]
    pub username: String,
    #[serde(default)]
    #[validate(length(max = 140, message = "About me must be at most 140 characters."))]
    pub about_me: String,
}

impl EditProfileForm {
    pub fn normalize(&mut self) {
        self.username = self.username.trim().to_string();
        self.about_me = self.about_me.trim().to_string();
    }

    pub fn echo(&self) -> serde_json::Value {
        json!({ "username": self.username, "about_me": self.about_me })
    }

    pub fn about_me(&self) -> Option<&str> {
        Some(self.about_me.as_str()).filter(|s| !s.is_empty())
    }
}

/// A username is free for `user_id` when nobody else holds it.
pub async fn username_free_for<'e, E: PgExecutor<'e>>(
    db: E,
    username: &str,
    user_id: Uuid,
) -> Result<bool, sqlx::Error> {
    Ok(User::find_by_username(db, username)
        .await?
        .map_or(true, |holder| holder.id == user_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::validate;

    #[test]
    fn about_me_is_limited() {
        let errors = validate(&EditProfileForm {
            username: "alice".into(),
            about_me: "x".repeat(141),
        });
        assert_eq!(
            errors.get("about_me"),
            ["About me must be at most 140 characters.".to_string()]
        );
    }

    #[test]
    fn blank_about_me_is_cleared() {
        let mut form: EditProfileForm =
            serde_json::from_value(json!({"username": " bob ", "about_me": "   "})).unwrap();
        form.normalize();
        assert_eq!(form.username, "bob");
        assert_eq!(form.about_me(), None);
        assert!(validate(&form).is_empty());
    }
}
