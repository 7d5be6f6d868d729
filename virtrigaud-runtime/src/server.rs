//! gRPC server and health sidecar lifecycle.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use tonic::transport::Server;
use tracing::{info, warn};

use virtrigaud_provider::traits::ProviderBackend;
use virtrigaud_providers::{GrpcProviderService, MockBackend, ProxmoxBackend, VsphereBackend};

use crate::config::{BackendConfig, Config};
use crate::health;
use crate::tls::TlsManager;

/// Builds the configured backend and serves it over gRPC (optionally mTLS)
/// alongside the plaintext health/metrics sidecar. Runs until either server
/// exits or fails.
pub async fn run(config: Config) -> Result<()> {
    let backend = build_backend(&config.backend).await?;

    if let Ok(caps) = backend.get_capabilities(&default_ctx()).await {
        info!(
            snapshots = caps.has(virtrigaud_provider::types::capability::SNAPSHOTS),
            linked_clones = caps.has(virtrigaud_provider::types::capability::LINKED_CLONES),
            disk_formats = ?caps.disk_formats,
            "backend capabilities"
        );
    }

    health::register_metrics().context("failed to register metrics")?;

    let grpc_addr: std::net::SocketAddr = config
        .server
        .listen_address
        .parse()
        .context("invalid gRPC listen address")?;

    let grpc_service = GrpcProviderService::new(backend.clone());

    let mut server_builder = Server::builder();
    if let Some(tls_config) = config.tls.as_ref().filter(|t| t.enabled) {
        info!("mTLS enabled for gRPC server");
        let tls = TlsManager::new(tls_config.clone()).server_tls_config().await?;
        server_builder = server_builder
            .tls_config(tls)
            .context("failed to configure mTLS")?;
    } else {
        warn!("mTLS disabled - gRPC server is accepting plaintext connections");
    }

    info!(address = %grpc_addr, "starting gRPC server");
    let grpc_future = server_builder
        .add_service(grpc_service.into_server())
        .serve(grpc_addr);

    let health_future = health::run(&config.health.listen_address, backend);

    tokio::select! {
        result = grpc_future => result.context("gRPC server exited"),
        result = health_future => result.context("health server exited"),
    }
}

async fn build_backend(config: &BackendConfig) -> Result<Arc<dyn ProviderBackend>> {
    match config {
        BackendConfig::Mock => {
            info!("using mock backend");
            Ok(Arc::new(MockBackend::new()))
        }
        BackendConfig::Libvirt { uri } => {
            #[cfg(feature = "libvirt")]
            {
                info!(uri, "connecting to libvirt");
                let backend = virtrigaud_providers::LibvirtBackend::new(uri)
                    .await
                    .context("failed to connect to libvirt")?;
                Ok(Arc::new(backend))
            }
            #[cfg(not(feature = "libvirt"))]
            {
                let _ = uri;
                anyhow::bail!("libvirt backend requested but the binary was built without the libvirt feature");
            }
        }
        BackendConfig::Vsphere(cfg) => {
            info!(endpoint = %cfg.endpoint, "using vsphere backend");
            Ok(Arc::new(VsphereBackend::new(cfg.clone())?))
        }
        BackendConfig::Proxmox(cfg) => {
            info!(endpoint = %cfg.endpoint, node = %cfg.node, "using proxmox backend");
            Ok(Arc::new(ProxmoxBackend::new(cfg.clone())?))
        }
    }
}

fn default_ctx() -> virtrigaud_provider::traits::Context {
    virtrigaud_provider::traits::Context::new("startup".to_string())
}
