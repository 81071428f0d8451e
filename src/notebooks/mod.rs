pub mod dto;
pub mod executor;
pub mod forms;
pub mod handlers;
pub mod repo;
pub mod repo_types;
pub mod services;

pub use dto::NotebookListItem;
pub use repo_types::Notebook;

use crate::state::AppState;
use axum::Router;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::read_routes())
        .merge(handlers::write_routes())
}
