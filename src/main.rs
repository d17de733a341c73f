// src/main.rs
// Demo server: a visit counter behind the session middleware

use anyhow::Result;
use axum::extract::{Extension, State};
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

use session_manager::manager::middleware::{SessionReplaced, session_layer};
use session_manager::{ManagerConfig, ProviderRegistry, SessionManager, SessionStore};

#[derive(Parser)]
#[command(name = "session-demo")]
#[command(about = "Session manager demo server")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "SESSION_DEMO_BIND", default_value = "127.0.0.1:3000")]
    bind: String,

    /// JSON session config; SESSION_* environment variables are used otherwise
    #[arg(long, env = "SESSION_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: Level,
}

async fn visit(Extension(store): Extension<Arc<SessionStore>>) -> Response {
    let visits = store.get::<u64>("visits").unwrap_or(0) + 1;
    if let Err(e) = store.set("visits", visits) {
        error!("Failed to update session: {}", e);
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    Json(json!({ "sid": store.session_id(), "visits": visits })).into_response()
}

async fn logout(
    State(manager): State<Arc<SessionManager>>,
    Extension(store): Extension<Arc<SessionStore>>,
) -> Response {
    match manager.destroy_store(&store).await {
        Ok(cookie) => {
            let mut headers = HeaderMap::new();
            if let Some(cookie) = cookie {
                headers.insert(SET_COOKIE, cookie);
            }
            (headers, Extension(SessionReplaced), StatusCode::NO_CONTENT).into_response()
        }
        Err(e) => {
            error!("Logout failed: {}", e);
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

async fn regenerate(
    State(manager): State<Arc<SessionManager>>,
    Extension(store): Extension<Arc<SessionStore>>,
) -> Response {
    let start = match manager.regenerate_store(&store).await {
        Ok(start) => start,
        Err(e) => {
            error!("Regenerate failed: {}", e);
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    };

    let mut headers = HeaderMap::new();
    if let Err(e) = manager.write_response_headers(&start, &mut headers) {
        error!("Failed to build session headers: {}", e);
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    let body = Json(json!({ "sid": start.session_id() }));
    (headers, Extension(SessionReplaced), body).into_response()
}

async fn stats(State(manager): State<Arc<SessionManager>>) -> Response {
    match manager.active_session_count().await {
        Ok(active) => Json(json!({
            "provider": manager.config().provider_name,
            "active": active,
        }))
        .into_response(),
        Err(e) => {
            error!("Count failed: {}", e);
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = match &args.config {
        Some(path) => ManagerConfig::load_from_file(path)?,
        None => ManagerConfig::from_env()?,
    };

    let registry = ProviderRegistry::with_defaults()?;
    let manager = Arc::new(SessionManager::new(&registry, config).await?);
    let gc = manager.spawn_gc();

    let app = Router::new()
        .route("/", get(visit))
        .route("/logout", post(logout))
        .route("/regenerate", post(regenerate))
        .layer(axum::middleware::from_fn_with_state(manager.clone(), session_layer))
        .route("/stats", get(stats))
        .with_state(manager.clone());

    let listener = tokio::net::TcpListener::bind(&args.bind).await?;
    info!("Session demo listening on http://{}", args.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
        })
        .await?;

    gc.shutdown().await;
    Ok(())
}
