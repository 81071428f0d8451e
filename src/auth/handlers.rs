use axum::{
    extract::{FromRef, Query, State},
    http::header::SET_COOKIE,
    response::{AppendHeaders, IntoResponse, Redirect, Response},
    routing::get,
    Form, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        forms::{LoginForm, RegistrationForm, BAD_CREDENTIALS, EMAIL_TAKEN, USERNAME_TAKEN},
        jwt::JwtKeys,
        password::{check_login, hash_password},
        repo::{UQ_EMAIL, UQ_USERNAME},
        repo_types::{NewUser, User},
        session::{clear_session_cookie, safe_next, session_cookie, AuthUser},
    },
    error::{unique_violation, AppResult},
    forms::{validate, FieldErrors, FormPage},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/login", get(login_page).post(login))
        .route("/logout", get(logout))
        .route("/register", get(register_page).post(register))
}

#[derive(Debug, Deserialize)]
pub struct NextQuery {
    pub next: Option<String>,
}

fn already_signed_in() -> Response {
    Redirect::to("/index").into_response()
}

pub async fn login_page(current: Option<AuthUser>, Query(q): Query<NextQuery>) -> Response {
    if current.is_some() {
        return already_signed_in();
    }
    FormPage::new(
        "login",
        json!({ "username": "", "remember_me": false, "next": q.next }),
    )
    .into_response()
}

#[instrument(skip(state, form))]
pub async fn login(
    State(state): State<AppState>,
    current: Option<AuthUser>,
    Query(q): Query<NextQuery>,
    Form(mut form): Form<LoginForm>,
) -> AppResult<Response> {
    if current.is_some() {
        return Ok(already_signed_in());
    }
    form.username = form.username.trim().to_string();

    let errors = validate(&form);
    if !errors.is_empty() {
        return Ok(FormPage::invalid("login", form.echo(), errors).into_response());
    }

    let user = User::find_by_username(&state.db, &form.username).await?;
    let ok = check_login(&form.password, user.as_ref().map(|u| u.password_hash.as_str()))?;
    let user = match user {
        Some(user) if ok => user,
        _ => {
            warn!(username = %form.username, "login rejected");
            return Ok(FormPage::invalid(
                "login",
                form.echo(),
                FieldErrors::single("password", BAD_CREDENTIALS),
            )
            .into_response());
        }
    };

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign(user.id, form.remember_me)?;
    let max_age = form.remember_me.then(|| keys.ttl(true));

    info!(user_id = %user.id, username = %user.username, "user logged in");
    Ok((
        AppendHeaders([(SET_COOKIE, session_cookie(&token, max_age))]),
        Redirect::to(safe_next(q.next.as_deref())),
    )
        .into_response())
}

pub async fn logout() -> Response {
    (
        AppendHeaders([(SET_COOKIE, clear_session_cookie())]),
        Redirect::to("/index"),
    )
        .into_response()
}

pub async fn register_page(current: Option<AuthUser>) -> Response {
    if current.is_some() {
        return already_signed_in();
    }
    FormPage::new("register", json!({ "username": "", "email": "" })).into_response()
}

#[instrument(skip(state, form))]
pub async fn register(
    State(state): State<AppState>,
    current: Option<AuthUser>,
    Form(mut form): Form<RegistrationForm>,
) -> AppResult<Response> {
    if current.is_some() {
        return Ok(already_signed_in());
    }
    form.normalize();

    let mut errors = validate(&form);
    if !errors.is_empty() {
        return Ok(FormPage::invalid("register", form.echo(), errors).into_response());
    }

    let mut tx = state.db.begin().await?;
    form.check_available(&mut tx, &state.config.email_domains, &mut errors)
        .await?;
    if !errors.is_empty() {
        warn!(username = %form.username, email = %form.email, "registration rejected");
        return Ok(FormPage::invalid("register", form.echo(), errors).into_response());
    }

    let hash = hash_password(&form.password)?;
    let created = User::create(
        &mut *tx,
        &NewUser {
            username: &form.username,
            email: &form.email,
            password_hash: &hash,
        },
    )
    .await;

    let user = match created {
        Ok(user) => user,
        Err(e) => {
            // Lost a race against a concurrent registration.
            let taken = match unique_violation(&e) {
                Some(UQ_USERNAME) => Some(("username", USERNAME_TAKEN)),
                Some(UQ_EMAIL) => Some(("email", EMAIL_TAKEN)),
                _ => None,
            };
            let Some((field, message)) = taken else {
                return Err(e.into());
            };
            return Ok(FormPage::invalid(
                "register",
                form.echo(),
                FieldErrors::single(field, message),
            )
            .into_response());
        }
    };
    tx.commit().await?;

    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok(Redirect::to("/login").into_response())
}
