use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    error::{unique_violation, AppError, AppResult},
    forms::{FieldErrors, FormPage},
    notebooks::{
        dto::{NotebookDetails, NotebookListItem, RunList, RunView},
        forms::{
            ParameterEditForm, RunForm, UploadForm, NAME_TAKEN, PARAMETERS_TOO_LONG, PATH_TAKEN,
        },
        repo::{UQ_NAME, UQ_PATH},
        repo_types::Notebook,
        services::{apply_parameter_edit, parameters_too_long, store_upload, trigger_run},
    },
    runs::PapermillRun,
    state::AppState,
};

const RECENT_RUNS: i64 = 5;
const RUN_PAGE: i64 = 50;

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/notebooks", get(list_notebooks))
        .route("/notebooks/:id", get(notebook_details))
        .route("/notebooks/:id/runs", get(list_runs))
}

pub fn write_routes() -> Router<AppState> {
    Router::new()
        .route("/notebooks", post(upload_notebook))
        .route("/notebooks/:id/parameters", post(edit_parameters))
        .route("/notebooks/:id/run", post(run_notebook))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024)) // 20MB
}

async fn load(state: &AppState, id: Uuid) -> AppResult<Notebook> {
    Notebook::find_by_id(&state.db, id)
        .await?
        .ok_or(AppError::not_found("Notebook"))
}

#[instrument(skip(state))]
pub async fn list_notebooks(
    State(state): State<AppState>,
    AuthUser(_user_id): AuthUser,
) -> AppResult<Json<Vec<NotebookListItem>>> {
    let notebooks = Notebook::list(&state.db).await?;
    Ok(Json(notebooks.iter().map(NotebookListItem::from).collect()))
}

#[instrument(skip(state))]
pub async fn notebook_details(
    State(state): State<AppState>,
    AuthUser(_user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let notebook = load(&state, id).await?;
    let runs = PapermillRun::list_by_notebook(&state.db, id, RECENT_RUNS).await?;
    Ok(Json(NotebookDetails {
        notebook: &notebook,
        script_label: notebook.script_type.label(),
        recent_runs: runs.into_iter().map(RunView::from).collect(),
    })
    .into_response())
}

/// POST /notebooks (multipart: notebook, script_type, parameters, name)
#[instrument(skip(state, mp))]
pub async fn upload_notebook(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    mp: Multipart,
) -> AppResult<Response> {
    let form = UploadForm::from_multipart(mp).await?;
    let upload = match form.validate() {
        Ok(upload) => upload,
        Err(errors) => return Ok(FormPage::invalid("upload", form.echo(), errors).into_response()),
    };

    if Notebook::find_by_name(&state.db, &upload.name).await?.is_some() {
        return Ok(
            FormPage::invalid("upload", form.echo(), FieldErrors::single("name", NAME_TAKEN))
                .into_response(),
        );
    }

    let notebook = match store_upload(&state, user_id, &upload).await {
        Ok(notebook) => notebook,
        Err(AppError::Database(e)) => {
            let taken = match unique_violation(&e) {
                Some(UQ_NAME) => Some(("name", NAME_TAKEN)),
                Some(UQ_PATH) => Some(("notebook", PATH_TAKEN)),
                _ => None,
            };
            let Some((field, message)) = taken else {
                return Err(e.into());
            };
            warn!(%user_id, name = %upload.name, "notebook upload rejected");
            return Ok(FormPage::invalid("upload", form.echo(), FieldErrors::single(field, message))
                .into_response());
        }
        Err(AppError::Conflict(_)) => {
            warn!(%user_id, file = %upload.file_name, "notebook file already exists");
            return Ok(FormPage::invalid(
                "upload",
                form.echo(),
                FieldErrors::single("notebook", PATH_TAKEN),
            )
            .into_response());
        }
        Err(e) => return Err(e),
    };

    Ok(Redirect::to(&format!("/notebooks/{}", notebook.id)).into_response())
}

/// Edits the tracked parameters in place, then writes back the dirty row.
#[instrument(skip(state, form))]
pub async fn edit_parameters(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
    Form(form): Form<ParameterEditForm>,
) -> AppResult<Response> {
    let edit = match form.parse() {
        Ok(edit) => edit,
        Err(errors) => {
            return Ok(FormPage::invalid("parameters", form.echo(), errors).into_response())
        }
    };

    let mut tx = state.db.begin().await?;
    let mut notebook = Notebook::lock_by_id(&mut *tx, id)
        .await?
        .ok_or(AppError::not_found("Notebook"))?;
    if apply_parameter_edit(&mut notebook, edit) {
        if parameters_too_long(&notebook)? {
            return Ok(FormPage::invalid(
                "parameters",
                form.echo(),
                FieldErrors::single("value", PARAMETERS_TOO_LONG),
            )
            .into_response());
        }
        notebook.save(&mut *tx).await?;
        info!(%user_id, notebook_id = %id, "parameters updated");
    }
    tx.commit().await?;

    Ok(Redirect::to(&format!("/notebooks/{id}")).into_response())
}

#[instrument(skip(state, form))]
pub async fn run_notebook(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
    Form(form): Form<RunForm>,
) -> AppResult<Response> {
    let output_file = match form.output_file() {
        Ok(file) => file,
        Err(errors) => return Ok(FormPage::invalid("run", form.echo(), errors).into_response()),
    };
    let notebook = load(&state, id).await?;
    trigger_run(&state, &notebook, user_id, output_file.as_deref()).await?;
    Ok(Redirect::to(&format!("/notebooks/{id}/runs")).into_response())
}

#[instrument(skip(state))]
pub async fn list_runs(
    State(state): State<AppState>,
    AuthUser(_user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<RunList>> {
    let notebook = load(&state, id).await?;
    let runs = PapermillRun::list_by_notebook(&state.db, id, RUN_PAGE).await?;
    Ok(Json(RunList {
        notebook: NotebookListItem::from(&notebook),
        runs: runs.into_iter().map(RunView::from).collect(),
    }))
}
