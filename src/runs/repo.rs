use sqlx::PgExecutor;
use uuid::Uuid;

use crate::runs::repo_types::PapermillRun;

pub const UQ_OUTPUT_PATH: &str = "uq_papermill_run_output_path";

const COLUMNS: &str = "id, notebook, triggered_by, created_at, output_path, ran_successfully";

impl PapermillRun {
    /// Record a run before execution starts. `ran_successfully` stays NULL
    /// until [`PapermillRun::record_outcome`].
    pub async fn create_pending<'e, E: PgExecutor<'e>>(
        db: E,
        id: Uuid,
        notebook: Uuid,
        triggered_by: Uuid,
        output_path: &str,
    ) -> Result<PapermillRun, sqlx::Error> {
        let query = format!(
            "INSERT INTO papermill_run (id, notebook, triggered_by, output_path)
             VALUES ($1, $2, $3, $4)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, PapermillRun>(&query)
            .bind(id)
            .bind(notebook)
            .bind(triggered_by)
            .bind(output_path)
            .fetch_one(db)
            .await
    }

    /// Set the success flag. Only an in-flight run can be completed.
    pub async fn record_outcome<'e, E: PgExecutor<'e>>(
        db: E,
        id: Uuid,
        success: bool,
    ) -> Result<PapermillRun, sqlx::Error> {
        let query = format!(
            "UPDATE papermill_run SET ran_successfully = $2
             WHERE id = $1 AND ran_successfully IS NULL
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, PapermillRun>(&query)
            .bind(id)
            .bind(success)
            .fetch_one(db)
            .await
    }

    pub async fn list_by_notebook<'e, E: PgExecutor<'e>>(
        db: E,
        notebook: Uuid,
        limit: i64,
    ) -> Result<Vec<PapermillRun>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM papermill_run
             WHERE notebook = $1
             ORDER BY created_at DESC
             LIMIT $2"
        );
        sqlx::query_as::<_, PapermillRun>(&query)
            .bind(notebook)
            .bind(limit)
            .fetch_all(db)
            .await
    }

    pub async fn list_by_user<'e, E: PgExecutor<'e>>(
        db: E,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<PapermillRun>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM papermill_run
             WHERE triggered_by = $1
             ORDER BY created_at DESC
             LIMIT $2"
        );
        sqlx::query_as::<_, PapermillRun>(&query)
            .bind(user_id)
            .bind(limit)
            .fetch_all(db)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repo_types::{NewUser, User};
    use crate::error::unique_violation;
    use crate::notebooks::repo_types::{NewNotebook, Notebook, ScriptType};
    use sqlx::PgPool;

    async fn fixture(pool: &PgPool) -> (Uuid, Uuid) {
        let user = User::create(
            pool,
            &NewUser {
                username: "runner",
                email: "runner@x.com",
                password_hash: "hash",
            },
        )
        .await
        .unwrap();
        let nb = Notebook::create(
            pool,
            &NewNotebook {
                name: "nightly",
                script_type: ScriptType::Task,
                path: "/nb/nightly.ipynb",
                parameters: None,
                author: user.id,
            },
        )
        .await
        .unwrap();
        (user.id, nb.id)
    }

    #[sqlx::test]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn outcome_is_recorded_once(pool: PgPool) {
        let (user, notebook) = fixture(&pool).await;
        let run = PapermillRun::create_pending(&pool, Uuid::new_v4(), notebook, user, "/out/1.ipynb")
            .await
            .unwrap();
        assert_eq!(run.ran_successfully, None);

        let done = PapermillRun::record_outcome(&pool, run.id, false).await.unwrap();
        assert_eq!(done.ran_successfully, Some(false));
        let again = PapermillRun::record_outcome(&pool, run.id, true).await;
        assert!(matches!(again, Err(sqlx::Error::RowNotFound)));

        assert_eq!(PapermillRun::list_by_notebook(&pool, notebook, 10).await.unwrap().len(), 1);
        assert_eq!(PapermillRun::list_by_user(&pool, user, 10).await.unwrap().len(), 1);
    }

    #[sqlx::test]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn duplicate_output_path_is_rejected(pool: PgPool) {
        let (user, notebook) = fixture(&pool).await;
        PapermillRun::create_pending(&pool, Uuid::new_v4(), notebook, user, "/out/same.ipynb")
            .await
            .unwrap();
        let err = PapermillRun::create_pending(&pool, Uuid::new_v4(), notebook, user, "/out/same.ipynb")
            .await
            .unwrap_err();
        assert_eq!(unique_violation(&err), Some(UQ_OUTPUT_PATH));
    }
}
