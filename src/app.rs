use std::net::SocketAddr;

use axum::{
    extract::{FromRef, Request, State},
    middleware::{self, Next},
    response::Response,
    routing::get,
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::{jwt::JwtKeys, repo_types::User, session::token_from_headers};
use crate::state::AppState;
use crate::{auth, notebooks, users};

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .merge(auth::router())
        .merge(users::router())
        .merge(notebooks::router())
        .route("/health", get(|| async { "ok" }))
        .layer(middleware::from_fn_with_state(state.clone(), stamp_last_seen))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     _latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, "response");
                        } else {
                            tracing::info!(%status, "response");
                        }
                    },
                ),
        )
}

/// Stamp `last_seen` for requests carrying a valid session.
async fn stamp_last_seen(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let user_id = token_from_headers(req.headers())
        .and_then(|token| JwtKeys::from_ref(&state).verify(token).ok())
        .map(|claims| claims.sub);
    if let Some(user_id) = user_id {
        if let Err(e) = User::touch_last_seen(&state.db, user_id).await {
            tracing::warn!(error = %e, %user_id, "failed to stamp last_seen");
        }
    }
    next.run(req).await
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
    .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
