//! The embedded HTTP server: metrics exposition plus health/readiness/
//! liveness endpoints, bound to `METRIC_HOST:METRIC_PORT` and skipped
//! entirely when `METRIC_SERVER=false`.
//!
//! Grounded in `original_source/src/nwws/webserver/api/{health_router,
//! metrics_router}.py`; served with `axum`, the pack's HTTP framework of
//! choice (`ashton-dyke-SAIREN-OS`, `xbcsmith-xzatoma`).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use log::info;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::metrics::{JsonExporter, MetricRegistry, PrometheusExporter};

const SERVICE_NAME: &str = "nwws-bridge";
const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone)]
struct AppState {
    registry: Arc<MetricRegistry>,
    started_at: Instant,
}

/// Builds the router. Split out from [`serve`] so tests can exercise routes
/// without binding a socket.
fn router(registry: Arc<MetricRegistry>) -> Router {
    let state = AppState {
        registry,
        started_at: Instant::now(),
    };

    Router::new()
        .route("/metrics", get(metrics_text))
        .route("/metrics/json", get(metrics_json))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/live", get(live))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn metrics_text(State(state): State<AppState>) -> Response {
    let body = PrometheusExporter::export(&state.registry);
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response()
}

async fn metrics_json(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(JsonExporter::export(&state.registry, Utc::now()))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let summary = state.registry.get_registry_summary();
    Json(json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "version": SERVICE_VERSION,
        "timestamp": Utc::now().to_rfc3339(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "metrics_count": summary.get("total").copied().unwrap_or(0),
    }))
}

async fn ready(State(_state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ready",
        "service": SERVICE_NAME,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn live(State(_state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "alive",
        "service": SERVICE_NAME,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Serves the router until `shutdown` resolves. Returns once the listener
/// has fully closed.
pub async fn serve(
    addr: SocketAddr,
    registry: Arc<MetricRegistry>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = router(registry);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("metrics server listening on {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_reports_service_identity() {
        let registry = Arc::new(MetricRegistry::new());
        let app = router(registry);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["service"], SERVICE_NAME);
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn metrics_text_reflects_registry_contents() {
        let registry = Arc::new(MetricRegistry::new());
        registry.increment("events_total", &[("stage", "filter")], 3.0);
        let app = router(registry);

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("events_total{stage=\"filter\"} 3"));
    }

    #[tokio::test]
    async fn ready_and_live_report_distinct_statuses() {
        let registry = Arc::new(MetricRegistry::new());
        let app = router(registry);

        let ready_response = app
            .clone()
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(ready_response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "ready");

        let live_response = app
            .oneshot(Request::builder().uri("/live").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(live_response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "alive");
    }
}
