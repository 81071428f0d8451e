use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use crate::auth::repo_types::User;
use crate::forms::{checkbox, FieldErrors};

pub const USERNAME_TAKEN: &str = "Please use a different username.";
pub const EMAIL_TAKEN: &str = "Please use a different email address.";
pub const BAD_DOMAIN: &str = "Email address must be from a valid domain.";
pub const BAD_CREDENTIALS: &str = "Invalid username or password";

#[derive(Debug, Deserialize, Validate)]
pub struct LoginForm {
    #[serde(default)]
    #[validate(length(min = 1, message = "This field is required."))]
    pub username: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "This field is required."))]
    pub password: String,
    #[serde(default, deserialize_with = "checkbox")]
    pub remember_me: bool,
}

impl LoginForm {
    pub fn echo(&self) -> serde_json::Value {
        json!({ "username": self.username, "remember_me": self.remember_me })
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegistrationForm {
    #[serde(default)]
    #[validate(length(min = 1, max = 64, message = "Username must be 1 to 64 characters."))]
    pub username: String,
    #[serde(default)]
    #[validate(
        email(message = "Invalid email address."),
        length(max = 120, message = "Email must be at most 120 characters.")
    )]
    pub email: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "This field is required."))]
    pub password: String,
    #[serde(default)]
    #[validate(must_match(other = "password", message = "Field must be equal to password."))]
    pub password2: String,
}

impl RegistrationForm {
    pub fn normalize(&mut self) {
        self.username = self.username.trim().to_string();
        self.email = self.email.trim().to_string();
    }

    pub fn echo(&self) -> serde_json::Value {
        json!({ "username": self.username, "email": self.email })
    }

    /// Database-backed checks: username and email must be free and the
    /// email domain allowed.
    pub async fn check_available(
        &self,
        conn: &mut sqlx::PgConnection,
        allowed_domains: &[String],
        errors: &mut FieldErrors,
    ) -> Result<(), sqlx::Error> {
        if !errors.has("username") && User::find_by_username(&mut *conn, &self.username).await?.is_some() {
            errors.add("username", USERNAME_TAKEN);
        }
        if !errors.has("email") {
            if User::find_by_email(&mut *conn, &self.email).await?.is_some() {
                errors.add("email", EMAIL_TAKEN);
            } else if !email_domain_allowed(&self.email, allowed_domains) {
                errors.add("email", BAD_DOMAIN);
            }
        }
        Ok(())
    }
}

/// With no configured domains every address is allowed.
pub fn email_domain_allowed(email: &str, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }
    email
        .rsplit_once('@')
        .map(|(_, domain)| domain.to_lowercase())
        .is_some_and(|domain| allowed.iter().any(|d| *d == domain))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::validate;

    fn registration(username: &str, email: &str, p1: &str, p2: &str) -> RegistrationForm {
        RegistrationForm {
            username: username.into(),
            email: email.into(),
            password: p1.into(),
            password2: p2.into(),
        }
    }

    #[test]
    fn valid_registration() {
        assert!(validate(&registration("alice", "alice@x.com", "pw", "pw")).is_empty());
    }

    #[test]
    fn registration_field_errors() {
        let errors = validate(&registration("", "not-an-email", "pw", "other"));
        assert!(errors.has("username"));
        assert_eq!(errors.get("email"), ["Invalid email address.".to_string()]);
        assert_eq!(
            errors.get("password2"),
            ["Field must be equal to password.".to_string()]
        );
        assert!(!errors.has("password"));
    }

    #[test]
    fn login_requires_both_fields() {
        let errors = validate(&LoginForm {
            username: String::new(),
            password: String::new(),
            remember_me: false,
        });
        assert!(errors.has("username"));
        assert!(errors.has("password"));
    }

    #[test]
    fn echo_never_contains_passwords() {
        let form = registration("alice", "alice@x.com", "secret", "secret");
        assert!(!form.echo().to_string().contains("secret"));
    }

    #[test]
    fn domain_allow_list() {
        let allowed = vec!["x.com".to_string()];
        assert!(email_domain_allowed("a@X.com", &allowed));
        assert!(!email_domain_allowed("a@y.com", &allowed));
        assert!(!email_domain_allowed("no-at-sign", &allowed));
        assert!(email_domain_allowed("a@y.com", &[]));
    }

    #[test]
    fn remember_me_checkbox_value() {
        let form: LoginForm =
            serde_json::from_value(json!({"username": "a", "password": "b", "remember_me": "y"}))
                .unwrap();
        assert!(form.remember_me);
    }

    #[sqlx::test]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn registering_a_taken_username_is_refused(pool: sqlx::PgPool) {
        use crate::auth::repo_types::NewUser;

        let alice = NewUser {
            username: "alice",
            email: "alice@x.com",
            password_hash: "hash",
        };
        User::create(&pool, &alice).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        let mut errors = FieldErrors::default();
        registration("alice", "alice2@x.com", "pw", "pw")
            .check_available(&mut conn, &[], &mut errors)
            .await
            .unwrap();
        assert_eq!(errors.get("username"), [USERNAME_TAKEN.to_string()]);
        assert!(!errors.has("email"));

        let mut errors = FieldErrors::default();
        registration("bob", "alice@x.com", "pw", "pw")
            .check_available(&mut conn, &[], &mut errors)
            .await
            .unwrap();
        assert_eq!(errors.get("email"), [EMAIL_TAKEN.to_string()]);
        assert!(!errors.has("username"));

        let mut errors = FieldErrors::default();
        registration("bob", "bob@x.com", "pw", "pw")
            .check_available(&mut conn, &[], &mut errors)
            .await
            .unwrap();
        assert!(errors.is_empty());
    }
}
