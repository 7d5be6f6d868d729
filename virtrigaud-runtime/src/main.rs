//! # virtrigaud-runtime
//!
//! The provider runtime hosts a single hypervisor backend - Mock, Libvirt,
//! vSphere, or Proxmox VE - behind an mTLS gRPC endpoint that the VirtRigaud
//! control plane dials to reconcile VM resources. One runtime process
//! manages one hypervisor endpoint.
//!
//! ## Usage
//! ```bash
//! virtrigaud-runtime --config /etc/virtrigaud/runtime.yaml
//! ```

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

mod cli;
mod config;
mod health;
mod server;
mod tls;

use cli::Args;
use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    virtrigaud_common::init_logging(&args.log_level)?;

    info!(version = env!("CARGO_PKG_VERSION"), "starting virtrigaud-runtime");

    let default_config_path = "/etc/virtrigaud/runtime.yaml";
    let config = match Config::load(&args.config) {
        Ok(cfg) => {
            info!(config_path = %args.config, "configuration loaded");
            cfg
        }
        Err(_) if args.config == default_config_path => {
            info!("no config file found, using defaults");
            Config::default()
        }
        Err(e) => {
            error!(error = %e, path = %args.config, "failed to load configuration");
            return Err(e);
        }
    };

    let config = config.with_cli_overrides(&args);

    info!(
        grpc_listen = %config.server.listen_address,
        health_listen = %config.health.listen_address,
        backend = ?config.backend,
        "runtime configured"
    );

    if let Err(e) = server::run(config).await {
        error!(error = %e, "server failed");
        return Err(e);
    }

    Ok(())
}
