//! Probe and metrics endpoint.
//!
//! Serves `/healthz`, `/readyz` and `/metrics` for the operator pod.

use crate::error::ControllerError;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::info;

const DURATION_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

/// Reconciliation metrics
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    reconcile_total: IntCounterVec,
    reconcile_errors_total: IntCounterVec,
    reconcile_duration: HistogramVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconcile_total = IntCounterVec::new(
            Opts::new("distribution_reconcile_total", "Reconciliation passes by result"),
            &["result"],
        )?;
        registry.register(Box::new(reconcile_total.clone()))?;

        let reconcile_errors_total = IntCounterVec::new(
            Opts::new("distribution_reconcile_errors_total", "Failed passes by error category"),
            &["category"],
        )?;
        registry.register(Box::new(reconcile_errors_total.clone()))?;

        let reconcile_duration = HistogramVec::new(
            HistogramOpts::new(
                "distribution_reconcile_duration_seconds",
                "Duration of a reconciliation pass",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
            &["result"],
        )?;
        registry.register(Box::new(reconcile_duration.clone()))?;

        Ok(Self {
            registry,
            reconcile_total,
            reconcile_errors_total,
            reconcile_duration,
        })
    }

    /// Records one finished pass
    pub fn observe(&self, elapsed: Duration, error: Option<&ControllerError>) {
        let result = if error.is_some() { "error" } else { "success" };
        self.reconcile_total.with_label_values(&[result]).inc();
        self.reconcile_duration
            .with_label_values(&[result])
            .observe(elapsed.as_secs_f64());
        if let Some(error) = error {
            self.reconcile_errors_total
                .with_label_values(&[error.category()])
                .inc();
        }
    }

    pub fn reconcile_count(&self, result: &str) -> u64 {
        self.reconcile_total.with_label_values(&[result]).get()
    }

    pub fn error_count(&self, category: &str) -> u64 {
        self.reconcile_errors_total.with_label_values(&[category]).get()
    }

    /// Prometheus text exposition
    pub fn encode(&self) -> Result<String, ControllerError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| ControllerError::InvalidConfig(format!("metrics are not UTF-8: {e}")))
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
struct AppState {
    metrics: Arc<Metrics>,
    ready: Arc<AtomicBool>,
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn readyz(State(state): State<AppState>) -> StatusCode {
    if state.ready.load(Ordering::SeqCst) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn export_metrics(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub fn router(metrics: Arc<Metrics>, ready: Arc<AtomicBool>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(export_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { metrics, ready })
}

/// Serves the telemetry router until the listener fails
pub async fn serve(
    addr: SocketAddr,
    metrics: Arc<Metrics>,
    ready: Arc<AtomicBool>,
) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Serving probes and metrics on {}", addr);
    axum::serve(listener, router(metrics, ready)).await?;
    Ok(())
}
