use std::time::Duration;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{
        header::{AUTHORIZATION, COOKIE},
        request::Parts,
        HeaderMap,
    },
    response::{IntoResponse, Redirect, Response},
};
use tracing::warn;
use uuid::Uuid;

use super::jwt::JwtKeys;

pub const SESSION_COOKIE: &str = "session";

/// `Set-Cookie` value carrying a session token. Remembered sessions persist
/// across browser restarts, others end with the browser session.
pub fn session_cookie(token: &str, max_age: Option<Duration>) -> String {
    let mut cookie = format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax");
    if let Some(age) = max_age {
        cookie.push_str(&format!("; Max-Age={}", age.as_secs()));
    }
    cookie
}

pub fn clear_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

/// Session token from a `Bearer` header or the session cookie.
pub fn token_from_headers(headers: &HeaderMap) -> Option<&str> {
    if let Some(token) = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(token);
    }
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .find_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == SESSION_COOKIE && !value.is_empty()).then_some(value)
        })
}

/// Only local absolute paths are honored as a post-login target. The path
/// must be printable ASCII and resolve against a base URL without changing
/// its host.
pub fn safe_next(next: Option<&str>) -> &str {
    match next {
        Some(path) if is_local_path(path) => path,
        _ => "/index",
    }
}

fn is_local_path(path: &str) -> bool {
    if !path.starts_with('/') || path.starts_with("//") || path.contains('\\') {
        return false;
    }
    if !path.bytes().all(|b| b.is_ascii_graphic()) {
        return false;
    }
    let Ok(base) = url::Url::parse("http://localhost/") else {
        return false;
    };
    base.join(path)
        .is_ok_and(|joined| joined.host_str() == Some("localhost") && joined.port().is_none())
}

pub fn login_redirect(next: &str) -> Redirect {
    let encoded: String = url::form_urlencoded::byte_serialize(next.as_bytes()).collect();
    Redirect::to(&format!("/login?next={encoded}"))
}

/// Authenticated user ID. Anonymous requests are redirected to the login form.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub Uuid);

pub struct LoginRequired {
    next: String,
}

impl IntoResponse for LoginRequired {
    fn into_response(self) -> Response {
        login_redirect(&self.next).into_response()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = LoginRequired;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let next = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/index".into());

        let Some(token) = token_from_headers(&parts.headers) else {
            return Err(LoginRequired { next });
        };

        match JwtKeys::from_ref(state).verify(token) {
            Ok(claims) => Ok(AuthUser(claims.sub)),
            Err(e) => {
                warn!(error = %e, "invalid or expired session token");
                Err(LoginRequired { next })
            }
        }
    }
}
