//! Plaintext `/healthz`, `/readyz`, `/metrics` sidecar for the controller
//! itself (spec.md §6 "Metrics").

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Clone, Default)]
pub struct ReadyState(Arc<AtomicBool>);

impl ReadyState {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn set_ready(&self, ready: bool) {
        self.0.store(ready, Ordering::SeqCst);
    }
}

pub async fn run(listen_address: &str, ready: ReadyState) -> anyhow::Result<()> {
    let addr: SocketAddr = listen_address.parse()?;

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(ready);

    info!(address = %addr, "starting controller metrics/health server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn readyz(State(ready): State<ReadyState>) -> StatusCode {
    if ready.0.load(Ordering::SeqCst) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn metrics() -> (StatusCode, String) {
    match crate::metrics::render() {
        Ok(body) => (StatusCode::OK, body),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, String::new()),
    }
}
