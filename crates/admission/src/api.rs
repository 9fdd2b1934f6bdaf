//! HTTP API: admission reviews, health checks and Prometheus metrics

use admission_lib::{
    health::{ComponentStatus, HealthRegistry},
    observability::AdmissionMetrics,
    AdmissionServer,
};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use kube::api::DynamicObject;
use kube::core::admission::AdmissionReview;
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub server: Arc<AdmissionServer>,
    pub health_registry: HealthRegistry,
    pub metrics: AdmissionMetrics,
    /// Deadline for reviews that carry no `timeout` parameter
    pub default_timeout: Duration,
}

impl AppState {
    pub fn new(
        server: Arc<AdmissionServer>,
        health_registry: HealthRegistry,
        metrics: AdmissionMetrics,
        default_timeout: Duration,
    ) -> Self {
        Self {
            server,
            health_registry,
            metrics,
            default_timeout,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct MutateParams {
    /// Orchestrator-provided webhook timeout, e.g. `10s`
    pub timeout: Option<String>,
}

/// Parse a duration written as unit-suffixed segments (`10s`, `1m30s`, `500ms`)
pub fn parse_timeout(raw: &str) -> Option<Duration> {
    let mut total = Duration::ZERO;
    let mut rest = raw.trim();
    if rest.is_empty() {
        return None;
    }

    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let amount: u64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let segment = match &rest[..unit_len] {
            "h" => Duration::from_secs(amount.checked_mul(3600)?),
            "m" => Duration::from_secs(amount.checked_mul(60)?),
            "s" => Duration::from_secs(amount),
            "ms" => Duration::from_millis(amount),
            _ => return None,
        };
        total = total.checked_add(segment)?;
        rest = &rest[unit_len..];
    }
    Some(total)
}

/// Admission review endpoint
async fn mutate(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MutateParams>,
    Json(review): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let timeout = params
        .timeout
        .as_deref()
        .and_then(parse_timeout)
        .unwrap_or(state.default_timeout);

    Json(state.server.review(review, Instant::now() + timeout).await)
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - 503 until the policy store has synced
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/mutate", post(mutate))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve the API until `shutdown` resolves
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting admission server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout("10s"), Some(Duration::from_secs(10)));
        assert_eq!(parse_timeout("1m30s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_timeout("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_timeout("2h"), Some(Duration::from_secs(7200)));
    }

    #[test]
    fn test_parse_timeout_rejects_garbage() {
        assert_eq!(parse_timeout(""), None);
        assert_eq!(parse_timeout("s"), None);
        assert_eq!(parse_timeout("10"), None);
        assert_eq!(parse_timeout("10d"), None);
    }
}
