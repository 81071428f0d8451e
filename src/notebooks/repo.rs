use sqlx::PgExecutor;
use uuid::Uuid;

use crate::error::AppError;
use crate::notebooks::repo_types::{NewNotebook, Notebook, NotebookRow, PARAMETERS};

pub const UQ_NAME: &str = "uq_jupyter_notebook_name";
pub const UQ_PATH: &str = "uq_jupyter_notebook_path";

const COLUMNS: &str = "id, name, script_type, path, created_at, parameters, author";

fn decode_all(rows: Vec<NotebookRow>) -> Result<Vec<Notebook>, AppError> {
    rows.into_iter()
        .map(|row| Notebook::try_from(row).map_err(AppError::from))
        .collect()
}

impl Notebook {
    pub async fn list<'e, E: PgExecutor<'e>>(db: E) -> Result<Vec<Notebook>, AppError> {
        let query = format!("SELECT {COLUMNS} FROM jupyter_notebook ORDER BY created_at DESC");
        let rows = sqlx::query_as::<_, NotebookRow>(&query).fetch_all(db).await?;
        decode_all(rows)
    }

    pub async fn find_by_id<'e, E: PgExecutor<'e>>(
        db: E,
        id: Uuid,
    ) -> Result<Option<Notebook>, AppError> {
        let query = format!("SELECT {COLUMNS} FROM jupyter_notebook WHERE id = $1");
        let row = sqlx::query_as::<_, NotebookRow>(&query)
            .bind(id)
            .fetch_optional(db)
            .await?;
        Ok(row.map(Notebook::try_from).transpose()?)
    }

    /// Same as [`Notebook::find_by_id`] but holds a row lock until the
    /// surrounding transaction ends.
    pub async fn lock_by_id<'e, E: PgExecutor<'e>>(
        db: E,
        id: Uuid,
    ) -> Result<Option<Notebook>, AppError> {
        let query = format!("SELECT {COLUMNS} FROM jupyter_notebook WHERE id = $1 FOR UPDATE");
        let row = sqlx::query_as::<_, NotebookRow>(&query)
            .bind(id)
            .fetch_optional(db)
            .await?;
        Ok(row.map(Notebook::try_from).transpose()?)
    }

    pub async fn find_by_name<'e, E: PgExecutor<'e>>(
        db: E,
        name: &str,
    ) -> Result<Option<Notebook>, AppError> {
        let query = format!("SELECT {COLUMNS} FROM jupyter_notebook WHERE name = $1");
        let row = sqlx::query_as::<_, NotebookRow>(&query)
            .bind(name)
            .fetch_optional(db)
            .await?;
        Ok(row.map(Notebook::try_from).transpose()?)
    }

    /// Insert a notebook. Duplicate name or path fails with a unique
    /// violation on [`UQ_NAME`] / [`UQ_PATH`].
    pub async fn create<'e, E: PgExecutor<'e>>(
        db: E,
        input: &NewNotebook<'_>,
    ) -> Result<Notebook, AppError> {
        let parameters = crate::mutable::codec::encode(input.parameters)?;
        let query = format!(
            "INSERT INTO jupyter_notebook (id, name, script_type, path, parameters, author)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, NotebookRow>(&query)
            .bind(Uuid::new_v4())
            .bind(input.name)
            .bind(input.script_type)
            .bind(input.path)
            .bind(parameters)
            .bind(input.author)
            .fetch_one(db)
            .await?;
        Ok(Notebook::try_from(row)?)
    }

    /// Write back the attributes flagged in the change set, then clear it.
    /// Returns whether anything was written.
    pub async fn save<'e, E: PgExecutor<'e>>(&self, db: E) -> Result<bool, AppError> {
        if !self.changes().is_modified(PARAMETERS) {
            return Ok(false);
        }
        let encoded = self.parameters.encode()?;
        sqlx::query("UPDATE jupyter_notebook SET parameters = $2 WHERE id = $1")
            .bind(self.id)
            .bind(encoded)
            .execute(db)
            .await?;
        self.changes().take();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repo_types::{NewUser, User};
    use crate::error::unique_violation;
    use crate::notebooks::repo_types::ScriptType;
    use serde_json::json;
    use sqlx::PgPool;

    async fn author(pool: &PgPool) -> Uuid {
        User::create(
            pool,
            &NewUser {
                username: "alice",
                email: "alice@x.com",
                password_hash: "hash",
            },
        )
        .await
        .unwrap()
        .id
    }

    fn conflict_constraint(err: AppError) -> Option<String> {
        match err {
            AppError::Database(e) => unique_violation(&e).map(str::to_string),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[sqlx::test]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn parameter_edit_is_flushed(pool: PgPool) {
        let author = author(&pool).await;
        let params = json!({"n": 1});
        let created = Notebook::create(
            &pool,
            &NewNotebook {
                name: "daily",
                script_type: ScriptType::Task,
                path: "/nb/daily.ipynb",
                parameters: Some(&params),
                author,
            },
        )
        .await
        .unwrap();

        let mut nb = Notebook::find_by_id(&pool, created.id).await.unwrap().unwrap();
        assert!(!nb.save(&pool).await.unwrap());

        nb.parameters.dict_mut().unwrap().insert("n", 2);
        assert!(nb.is_dirty());
        assert!(nb.save(&pool).await.unwrap());
        assert!(!nb.is_dirty());

        let reloaded = Notebook::find_by_id(&pool, created.id).await.unwrap().unwrap();
        assert_eq!(reloaded.parameters.to_value(), Some(json!({"n": 2})));
    }

    #[sqlx::test]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn duplicate_name_and_path_are_rejected(pool: PgPool) {
        let author = author(&pool).await;
        let new = |name: &'static str, path: &'static str| NewNotebook {
            name,
            script_type: ScriptType::Qa,
            path,
            parameters: None,
            author,
        };
        Notebook::create(&pool, &new("a", "/nb/a.ipynb")).await.unwrap();

        let err = Notebook::create(&pool, &new("a", "/nb/b.ipynb")).await.unwrap_err();
        assert_eq!(conflict_constraint(err).as_deref(), Some(UQ_NAME));
        let err = Notebook::create(&pool, &new("b", "/nb/a.ipynb")).await.unwrap_err();
        assert_eq!(conflict_constraint(err).as_deref(), Some(UQ_PATH));

        assert!(Notebook::find_by_name(&pool, "a").await.unwrap().is_some());
        assert_eq!(Notebook::list(&pool).await.unwrap().len(), 1);
    }

    #[sqlx::test]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn corrupt_parameters_surface_as_integrity_error(pool: PgPool) {
        let author = author(&pool).await;
        let nb = Notebook::create(
            &pool,
            &NewNotebook {
                name: "broken",
                script_type: ScriptType::Report,
                path: "/nb/broken.ipynb",
                parameters: None,
                author,
            },
        )
        .await
        .unwrap();
        sqlx::query("UPDATE jupyter_notebook SET parameters = '{oops' WHERE id = $1")
            .bind(nb.id)
            .execute(&pool)
            .await
            .unwrap();

        let err = Notebook::find_by_id(&pool, nb.id).await.unwrap_err();
        assert!(matches!(err, AppError::Integrity(_)));
    }
}
