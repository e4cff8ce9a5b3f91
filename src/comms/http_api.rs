use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::State,
    handler::HandlerWithoutStateExt,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, get_service, post, MethodRouter},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::dispatch::{EchoDispatcher, MessageDispatcher};
use crate::security::admission::{AdmissionError, AdmissionPipeline, AdmissionRequest};
use crate::security::redis_store::RedisReplayStore;
use crate::security::replay::{MemoryReplayStore, ReplayStore};
use crate::service::config::Config;

pub const DISPATCH_PATH: &str = "/DevOps";
pub const ACME_CHALLENGE_PATH: &str = "/.well-known/acme-challenge";

/// Status for any route or method the gate does not serve.
pub const UNMATCHED_STATUS: StatusCode = StatusCode::BAD_REQUEST;

/// Largest dispatch body read into memory. Larger bodies are rejected at the
/// payload stage, after the credential and token checks.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

type SharedState = Arc<AppState>;

pub struct AppState {
    pub config: Arc<Config>,
    pub pipeline: AdmissionPipeline,
    pub dispatcher: Arc<dyn MessageDispatcher>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn ReplayStore>,
        dispatcher: Arc<dyn MessageDispatcher>,
    ) -> Self {
        let pipeline = AdmissionPipeline::new(&config, store);
        Self {
            config,
            pipeline,
            dispatcher,
        }
    }

    /// State wired to the store named in `config`: Redis when `redis_url` is
    /// set, otherwise the in-process store.
    pub fn from_config(config: Arc<Config>) -> Result<Self> {
        let store: Arc<dyn ReplayStore> = match &config.redis_url {
            Some(url) => Arc::new(RedisReplayStore::new(url).context("configuring redis store")?),
            None => {
                warn!("no redis_url configured; replay records are local to this process");
                Arc::new(MemoryReplayStore::new())
            }
        };
        Ok(Self::new(config, store, Arc::new(EchoDispatcher)))
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

// Health check
async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn unmatched() -> impl IntoResponse {
    (UNMATCHED_STATUS, "ERROR")
}

fn request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty() && s.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

// Admission gate in front of the dispatch operation
async fn dispatch_message(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let rid = request_id(&headers);
    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            debug!(request_id = %rid, error = %e, "request body not read");
            None
        }
    };
    let request =
        AdmissionRequest::from_headers(&rid, &headers, &state.config, body.as_deref());

    let payload = match state.pipeline.admit(&request).await {
        Ok(payload) => payload,
        Err(err) => return err.into_response(),
    };

    match state.dispatcher.dispatch(&payload).await {
        Ok(receipt) => (StatusCode::OK, Json(receipt)).into_response(),
        Err(e) => {
            error!(request_id = %rid, error = %e, "dispatch failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Dispatch failed".to_string(),
                }),
            )
                .into_response()
        }
    }
}

pub fn create_router(state: SharedState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health).fallback(unmatched))
        .route(DISPATCH_PATH, post(dispatch_message).fallback(unmatched));

    // ACME challenge files bypass the gate entirely
    if let Some(dir) = &state.config.acme_challenge_dir {
        router = router.nest_service(ACME_CHALLENGE_PATH, acme_challenge_service(dir));
    }

    router
        .fallback(unmatched)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Static challenge files; missing files and other methods get the same
/// rejection as any unmatched route.
fn acme_challenge_service(dir: &str) -> MethodRouter {
    get_service(ServeDir::new(dir).fallback(unmatched.into_service())).fallback(unmatched)
}

pub async fn serve(config: Config, host: &str, port: u16) -> Result<()> {
    let cfg = Arc::new(config);
    let state = Arc::new(AppState::from_config(cfg)?);
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .context("parsing listen address")?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
