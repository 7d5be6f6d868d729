//! Plaintext `/healthz`, `/readyz`, `/metrics` sidecar.
//!
//! This is deliberately separate from the mTLS gRPC server: health probes
//! and Prometheus scrapes come from inside the cluster network, not from
//! the control plane, so they don't need client certificates.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use tower_http::trace::TraceLayer;
use tracing::info;

use virtrigaud_provider::traits::ProviderBackend;
use virtrigaud_telemetry::TelemetryCollector;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref RPC_REQUESTS_TOTAL: IntCounter = IntCounter::new(
        "virtrigaud_runtime_rpc_requests_total",
        "Total gRPC requests handled by this worker"
    )
    .unwrap();
    pub static ref RPC_ERRORS_TOTAL: IntCounter = IntCounter::new(
        "virtrigaud_runtime_rpc_errors_total",
        "Total gRPC requests that returned an error"
    )
    .unwrap();
    pub static ref BACKEND_UP: IntGauge = IntGauge::new(
        "virtrigaud_runtime_backend_up",
        "1 if the last backend health check succeeded, 0 otherwise"
    )
    .unwrap();
}

/// Registers the runtime's metrics with the global registry. Safe to call once at startup.
pub fn register_metrics() -> anyhow::Result<()> {
    REGISTRY.register(Box::new(RPC_REQUESTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RPC_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(BACKEND_UP.clone()))?;
    Ok(())
}

#[derive(Clone)]
struct HealthState {
    backend: Arc<dyn ProviderBackend>,
    telemetry: Arc<TelemetryCollector>,
}

/// Builds the health/metrics router and serves it until the process exits.
pub async fn run(listen_address: &str, backend: Arc<dyn ProviderBackend>) -> anyhow::Result<()> {
    let addr: std::net::SocketAddr = listen_address.parse()?;
    let state = HealthState {
        backend,
        telemetry: Arc::new(TelemetryCollector::new()),
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/telemetry", get(telemetry))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!(address = %addr, "starting health/metrics server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn readyz(State(state): State<HealthState>) -> StatusCode {
    match state.backend.get_capabilities(&default_ctx()).await {
        Ok(_) => {
            BACKEND_UP.set(1);
            StatusCode::OK
        }
        Err(_) => {
            BACKEND_UP.set(0);
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

async fn metrics() -> (StatusCode, String) {
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    let families = REGISTRY.gather();
    if encoder.encode(&families, &mut buf).is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, String::new());
    }
    (StatusCode::OK, String::from_utf8_lossy(&buf).into_owned())
}

/// Host capacity snapshot, polled by the control plane to size placement
/// decisions without round-tripping through the hypervisor API.
async fn telemetry(State(state): State<HealthState>) -> (StatusCode, String) {
    let snapshot = state.telemetry.collect();
    match serde_json::to_string(&snapshot) {
        Ok(body) => (StatusCode::OK, body),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, String::new()),
    }
}

fn default_ctx() -> virtrigaud_provider::traits::Context {
    virtrigaud_provider::traits::Context::new("healthz".to_string())
}
