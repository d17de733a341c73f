// src/manager/middleware.rs
// axum middleware: one session per request, released after the handler

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::{error, warn};

use super::SessionManager;

/// Response extension set by handlers that destroyed or regenerated the
/// request's session and wrote their own cookie headers.
#[derive(Debug, Clone, Copy)]
pub struct SessionReplaced;

/// Use with `axum::middleware::from_fn_with_state`. Handlers receive the
/// store as `Extension<Arc<SessionStore>>`.
pub async fn session_layer(
    State(manager): State<Arc<SessionManager>>,
    mut req: Request,
    next: Next,
) -> Response {
    let start = match manager.session_start(req.headers()).await {
        Ok(start) => start,
        Err(e) => {
            error!("Failed to start session: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "session unavailable").into_response();
        }
    };

    req.extensions_mut().insert(start.store.clone());
    let mut response = next.run(req).await;

    if response.extensions().get::<SessionReplaced>().is_some() {
        return response;
    }

    if let Err(e) = start.store.release().await {
        warn!("Failed to persist session {}: {}", start.session_id(), e);
    }
    if let Err(e) = manager.write_response_headers(&start, response.headers_mut()) {
        warn!("Failed to attach session headers: {}", e);
    }

    response
}
