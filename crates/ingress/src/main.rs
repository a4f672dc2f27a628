//! # dongate
//!
//! HTTP server di depan [`GatewayRouter`].
//!
//! ## Endpoints
//! - POST /              - JSON-RPC trigger dari user, menunggu response quorum
//! - POST /node/:address - JSON-RPC response dari node DON
//! - GET /health         - Health check
//! - GET /metrics        - Prometheus metrics
//!
//! ## Config
//! Path dari `DONGATE_CONFIG` (default `dongate.toml`). Log level dari `RUST_LOG`.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use axum::{
    extract::{Path as UrlPath, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response as HttpResponse},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use dongate_common::config::{load_from_file, GatewayConfig};
use dongate_common::EthJwtAuthenticator;
use dongate_proto::{codes, Request, Response};
use dongate_ingress::{Callback, GatewayError, GatewayMetrics, GatewayRouter, HttpDon, ReqwestHttpClient};

const DEFAULT_CONFIG_PATH: &str = "dongate.toml";

#[derive(Clone)]
struct AppState {
    router: Arc<GatewayRouter>,
    user_request_timeout: Duration,
    started_at: Instant,
}

#[derive(Serialize)]
struct GatewayHealth {
    status: &'static str,
    uptime_secs: u64,
    workflows: usize,
    pending_callbacks: usize,
}

// ════════════════════════════════════════════════════════════════════════════
// MAIN
// ════════════════════════════════════════════════════════════════════════════

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_config()?;
    info!(
        don_id = %config.don.don_id,
        members = config.don.members.len(),
        f = config.don.f,
        "dongate starting"
    );

    let don = Arc::new(
        HttpDon::new(&config.don, config.gateway.metadata_pull_request_timeout())
            .context("failed to build DON transport")?,
    );
    let http_client = Arc::new(
        ReqwestHttpClient::new(config.http_client.clone()).context("failed to build outbound http client")?,
    );
    let router = Arc::new(GatewayRouter::new(
        config.gateway.clone(),
        don,
        http_client,
        Arc::new(EthJwtAuthenticator::new()),
        Arc::new(GatewayMetrics::new()),
    )?);
    router.start();

    let state = AppState {
        router: Arc::clone(&router),
        user_request_timeout: Duration::from_millis(config.server.user_request_timeout_ms),
        started_at: Instant::now(),
    };
    let app = Router::new()
        .route("/", post(user_request))
        .route("/node/:address", post(node_message))
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .with_state(state);

    let listener = TcpListener::bind(&config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.listen_addr))?;
    info!(listen_addr = %config.server.listen_addr, "dongate listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    router.close().await;
    info!("dongate shutdown complete");
    Ok(())
}

fn load_config() -> anyhow::Result<GatewayConfig> {
    let path = std::env::var("DONGATE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    if !Path::new(&path).exists() {
        warn!(path = %path, "config file not found, using defaults");
        return Ok(GatewayConfig::default().with_defaults());
    }
    load_from_file(&path).with_context(|| format!("failed to load config from {}", path))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        return;
    }
    info!("shutdown signal received");
}

// ════════════════════════════════════════════════════════════════════════════
// HANDLERS
// ════════════════════════════════════════════════════════════════════════════

/// POST / - trigger workflow.
///
/// JSON-RPC error tetap HTTP 200. HTTP 504 jika tidak ada response
/// dalam `user_request_timeout`.
async fn user_request(State(state): State<AppState>, body: Bytes) -> HttpResponse {
    let request: Request = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            let err = GatewayError::Parse(e.to_string());
            return json_rpc_error(StatusCode::OK, "", &err);
        }
    };

    let id = request.id.clone();
    let (callback, rx) = Callback::new();
    let router = Arc::clone(&state.router);
    tokio::spawn(async move {
        let _ = router.handle_user_request(request, callback).await;
    });

    match tokio::time::timeout(state.user_request_timeout, rx).await {
        Ok(Ok(payload)) => {
            let mut headers = HeaderMap::new();
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
            (StatusCode::OK, headers, payload.raw_response).into_response()
        }
        Ok(Err(_)) | Err(_) => {
            debug!(request_id = %id, "no response before user request timeout");
            let err = GatewayError::Timeout("request timed out waiting for node responses".to_string());
            json_rpc_error(StatusCode::GATEWAY_TIMEOUT, &id, &err)
        }
    }
}

/// POST /node/:address - response dari node.
async fn node_message(
    UrlPath(address): UrlPath<String>,
    State(state): State<AppState>,
    body: Bytes,
) -> HttpResponse {
    let response: Response = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => return (StatusCode::BAD_REQUEST, format!("invalid JSON-RPC response: {}", e)).into_response(),
    };

    match state.router.handle_node_message(&response, &address).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => {
            let status = match e.code() {
                codes::LIMIT_EXCEEDED => StatusCode::TOO_MANY_REQUESTS,
                codes::UNAUTHORIZED => StatusCode::FORBIDDEN,
                _ => StatusCode::BAD_REQUEST,
            };
            warn!(node = %address, request_id = %response.id, error = %e, "node message rejected");
            (status, e.user_message()).into_response()
        }
    }
}

/// GET /health
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let router = &state.router;
    Json(GatewayHealth {
        status: "ok",
        uptime_secs: state.started_at.elapsed().as_secs(),
        workflows: router.metadata_handler().workflow_count(),
        pending_callbacks: router.trigger_handler().pending(),
    })
}

/// GET /metrics - Prometheus exposition format.
async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
    );
    (StatusCode::OK, headers, state.router.metrics().to_prometheus())
}

fn json_rpc_error(status: StatusCode, id: &str, err: &GatewayError) -> HttpResponse {
    let body = Response::with_error(id, err.code(), err.user_message());
    (status, Json(body)).into_response()
}
