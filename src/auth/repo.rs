use crate::auth::repo_types::{NewUser, User};
use sqlx::PgExecutor;
use uuid::Uuid;

pub const UQ_USERNAME: &str = "uq_users_username";
pub const UQ_EMAIL: &str = "uq_users_email";

const COLUMNS: &str = "id, username, email, password_hash, about_me, last_seen";

impl User {
    pub async fn find_by_id<'e, E: PgExecutor<'e>>(
        db: E,
        id: Uuid,
    ) -> Result<Option<User>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM users WHERE id = $1");
        sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(db)
            .await
    }

    /// Find a user by username (case-sensitive).
    pub async fn find_by_username<'e, E: PgExecutor<'e>>(
        db: E,
        username: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM users WHERE username = $1");
        sqlx::query_as::<_, User>(&query)
            .bind(username)
            .fetch_optional(db)
            .await
    }

    /// Find a user by email (case-sensitive).
    pub async fn find_by_email<'e, E: PgExecutor<'e>>(
        db: E,
        email: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM users WHERE email = $1");
        sqlx::query_as::<_, User>(&query)
            .bind(email)
            .fetch_optional(db)
            .await
    }

    /// Insert a new user. A duplicate username or email fails with a unique
    /// violation on [`UQ_USERNAME`] / [`UQ_EMAIL`].
    pub async fn create<'e, E: PgExecutor<'e>>(
        db: E,
        input: &NewUser<'_>,
    ) -> Result<User, sqlx::Error> {
        let query = format!(
            "INSERT INTO users (id, username, email, password_hash)
             VALUES ($1, $2, $3, $4)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, User>(&query)
            .bind(Uuid::new_v4())
            .bind(input.username)
            .bind(input.email)
            .bind(input.password_hash)
            .fetch_one(db)
            .await
    }

    pub async fn update_profile<'e, E: PgExecutor<'e>>(
        db: E,
        id: Uuid,
        username: &str,
        about_me: Option<&str>,
    ) -> Result<User, sqlx::Error> {
        let query = format!(
            "UPDATE users SET username = $2, about_me = $3
             WHERE id = $1
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, User>(&query)
            .bind(id)
            .bind(username)
            .bind(about_me)
            .fetch_one(db)
            .await
    }

    pub async fn touch_last_seen<'e, E: PgExecutor<'e>>(db: E, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET last_seen = now() WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }
}
