use crate::config::ApiConfig;
use anyhow::{Context, Result};
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

/// State shared with the health handlers
#[derive(Clone)]
pub struct AppState {
    pub service_name: String,
    /// Set while the notification consumer loop is running
    pub consumer_running: Arc<AtomicBool>,
}

/// Create the health router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Liveness: the process is up
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": state.service_name
    }))
}

/// Readiness: notifications are being consumed
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.consumer_running.load(Ordering::SeqCst) {
        (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "consumer": "running"
            })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "consumer": "stopped"
            })),
        )
    }
}

/// Serve the health endpoints until `shutdown` fires
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let router = create_router(state);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting health API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::Response;

    fn state(running: bool) -> AppState {
        AppState {
            service_name: "survey-photos".to_string(),
            consumer_running: Arc::new(AtomicBool::new(running)),
        }
    }

    async fn ready_status(state: AppState) -> StatusCode {
        let response: Response = readiness_check(State(state)).await.into_response();
        response.status()
    }

    #[tokio::test]
    async fn test_ready_when_consumer_running() {
        assert_eq!(ready_status(state(true)).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_not_ready_when_consumer_stopped() {
        assert_eq!(ready_status(state(false)).await, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_readiness_follows_flag() {
        let state = state(false);
        let flag = state.consumer_running.clone();
        flag.store(true, Ordering::SeqCst);
        assert_eq!(ready_status(state).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_always_ok() {
        let response = health_check(State(state(false))).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
