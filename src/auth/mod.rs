use crate::state::AppState;
use axum::Router;

mod claims;
pub mod forms;
pub mod handlers;
pub mod jwt;
pub mod password;
pub mod repo;
pub mod repo_types;
pub mod session;

pub use session::AuthUser;

pub fn router() -> Router<AppState> {
    handlers::auth_routes()
}
