use axum::{
    extract::{Path, State},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Form, Json, Router,
};
use tracing::{info, instrument, warn};

use crate::{
    auth::{repo::UQ_USERNAME, repo_types::User, AuthUser},
    error::{unique_violation, AppError, AppResult},
    forms::{validate, FieldErrors, FormPage},
    notebooks::{dto::RunView, Notebook, NotebookListItem},
    runs::PapermillRun,
    state::AppState,
    users::{
        dto::{IndexPage, PublicUser, UserPage},
        forms::{username_free_for, EditProfileForm, INVALID_USERNAME},
    },
};

const USER_RUNS: i64 = 20;

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/index", get(index))
        .route("/user/:username", get(user_page))
        .route("/edit_profile", get(edit_profile_page).post(edit_profile))
}

async fn current_user(state: &AppState, user_id: uuid::Uuid) -> AppResult<User> {
    User::find_by_id(&state.db, user_id)
        .await?
        .ok_or(AppError::not_found("User"))
}

#[instrument(skip(state))]
pub async fn index(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<IndexPage>> {
    let user = current_user(&state, user_id).await?;
    let notebooks = Notebook::list(&state.db).await?;
    Ok(Json(IndexPage {
        user: user.into(),
        notebooks: notebooks.iter().map(NotebookListItem::from).collect(),
    }))
}

#[instrument(skip(state))]
pub async fn user_page(
    State(state): State<AppState>,
    AuthUser(_user_id): AuthUser,
    Path(username): Path<String>,
) -> AppResult<Json<UserPage>> {
    let user = User::find_by_username(&state.db, &username)
        .await?
        .ok_or(AppError::not_found("User"))?;
    let runs = PapermillRun::list_by_user(&state.db, user.id, USER_RUNS).await?;
    Ok(Json(UserPage {
        user: PublicUser::from(user),
        runs: runs.into_iter().map(RunView::from).collect(),
    }))
}

#[instrument(skip(state))]
pub async fn edit_profile_page(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Response> {
    let user = current_user(&state, user_id).await?;
    Ok(FormPage::new(
        "edit_profile",
        serde_json::json!({ "username": user.username, "about_me": user.about_me.unwrap_or_default() }),
    )
    .into_response())
}

#[instrument(skip(state, form))]
pub async fn edit_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Form(mut form): Form<EditProfileForm>,
) -> AppResult<Response> {
    form.normalize();
    let mut errors = validate(&form);
    if !errors.is_empty() {
        return Ok(FormPage::invalid("edit_profile", form.echo(), errors).into_response());
    }

    let mut tx = state.db.begin().await?;
    if !username_free_for(&mut *tx, &form.username, user_id).await? {
        errors.add("username", INVALID_USERNAME);
        warn!(%user_id, username = %form.username, "profile edit rejected");
        return Ok(FormPage::invalid("edit_profile", form.echo(), errors).into_response());
    }

    let updated = User::update_profile(&mut *tx, user_id, &form.username, form.about_me()).await;
    let user = match updated {
        Ok(user) => user,
        Err(e) if unique_violation(&e) == Some(UQ_USERNAME) => {
            return Ok(FormPage::invalid(
                "edit_profile",
                form.echo(),
                FieldErrors::single("username", INVALID_USERNAME),
            )
            .into_response());
        }
        Err(sqlx::Error::RowNotFound) => return Err(AppError::not_found("User")),
        Err(e) => return Err(e.into()),
    };
    tx.commit().await?;

    info!(user_id = %user.id, username = %user.username, "profile updated");
    Ok(Redirect::to("/edit_profile").into_response())
}
