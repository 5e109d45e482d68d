//! Health check handlers.
//!
//! This module provides reusable Axum handlers for:
//! - Model readiness (`/health`): 503 until the engines are loaded
//! - Liveness checks (`/healthz`)
//! - Readiness checks (`/ready`, `/readyz`)
//! - Prometheus metrics (`/metrics`)

use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde::Serialize;

use crate::metrics;
use crate::readiness::{Lifecycle, ReadinessState};

/// Shared state for health endpoints.
#[derive(Clone)]
pub struct HealthState {
    pub readiness: ReadinessState,
}

impl HealthState {
    pub fn new(readiness: ReadinessState) -> Self {
        Self { readiness }
    }
}

/// Health response body.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `UP` or `DOWN`.
    pub status: &'static str,
    pub engine: String,
    pub model_ready: bool,
    pub lifecycle: Lifecycle,
}

impl HealthResponse {
    fn from_state(state: &HealthState, force_up: bool) -> Self {
        let snapshot = state.readiness.snapshot();
        let ready = snapshot.is_ready();
        Self {
            status: if ready || force_up { "UP" } else { "DOWN" },
            engine: snapshot.engine,
            model_ready: ready,
            lifecycle: snapshot.lifecycle,
        }
    }
}

fn status_for(ready: bool) -> StatusCode {
    if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Model health: 200 once ready, 503 before.
pub async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let body = HealthResponse::from_state(&state, false);
    (status_for(body.model_ready), Json(body))
}

/// Liveness handler.
///
/// Always returns OK if the server is running.
pub async fn liveness_handler(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse::from_state(&state, true))
}

/// Readiness handler.
pub async fn ready_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let body = HealthResponse::from_state(&state, false);
    (status_for(body.model_ready), Json(body))
}

/// Prometheus metrics endpoint handler.
pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::prometheus_handle() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            handle.render(),
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "Metrics not initialized. Call init_metrics() at startup.".to_string(),
        )
            .into_response(),
    }
}

/// Create the health router.
///
/// - `/health` - Model readiness with engine name
/// - `/healthz` - Liveness
/// - `/ready` - Readiness
/// - `/readyz` - Readiness (K8s style)
/// - `/metrics` - Prometheus metrics
pub fn health_router(state: HealthState) -> axum::Router {
    use axum::routing::get;

    axum::Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/ready", get(ready_handler))
        .route("/readyz", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Router exposing only `/metrics`, for a dedicated scrape port.
pub fn metrics_router() -> axum::Router {
    use axum::routing::get;

    axum::Router::new().route("/metrics", get(metrics_handler))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn get(state: &ReadinessState, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = health_router(HealthState::new(state.clone()))
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_down_until_ready() {
        let state = ReadinessState::new();
        state.begin_initializing("indic-conformer");

        let (status, body) = get(&state, "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "DOWN");
        assert_eq!(body["engine"], "indic-conformer");
        assert_eq!(body["model_ready"], false);
        assert_eq!(body["lifecycle"], "initializing");

        state.mark_ready("indic-conformer");
        let (status, body) = get(&state, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "UP");
        assert_eq!(body["model_ready"], true);
    }

    #[tokio::test]
    async fn test_liveness_always_up() {
        let state = ReadinessState::new();
        let (status, body) = get(&state, "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "UP");
        assert_eq!(body["model_ready"], false);
    }

    #[tokio::test]
    async fn test_readiness_endpoints() {
        let state = ReadinessState::new();
        for uri in ["/ready", "/readyz"] {
            let (status, _) = get(&state, uri).await;
            assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        }

        state.mark_ready("faster-whisper");
        for uri in ["/ready", "/readyz"] {
            let (status, body) = get(&state, uri).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["engine"], "faster-whisper");
        }
    }

    #[tokio::test]
    async fn test_failed_is_down() {
        let state = ReadinessState::new();
        state.begin_initializing("indic-conformer");
        state.mark_failed();
        let (status, body) = get(&state, "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["lifecycle"], "failed");
    }
}
