//! Command-line argument parsing.

use clap::Parser;

/// VirtRigaud control plane - reconciles VirtRigaud custom resources onto provider workers.
#[derive(Parser, Debug)]
#[command(name = "virtrigaud-controller")]
#[command(about = "VirtRigaud control plane")]
#[command(version)]
pub struct Args {
    #[arg(short, long, default_value = "/etc/virtrigaud/controller.yaml")]
    pub config: String,

    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    #[arg(long, default_value = "json")]
    pub log_format: String,

    /// Bind address for the `/metrics`, `/healthz`, `/readyz` sidecar.
    #[arg(long)]
    pub metrics_bind_address: Option<String>,

    /// Enables leader election via a Kubernetes Lease. Required for running
    /// more than one controller replica.
    #[arg(long)]
    pub leader_elect: Option<bool>,

    /// Max concurrent reconciles for VirtualMachine and Provider controllers.
    #[arg(long)]
    pub concurrent_reconciles: Option<usize>,

    /// Full resync period, e.g. "10m".
    #[arg(long)]
    pub resync_period: Option<String>,

    /// Namespace to restrict watches to. Empty means cluster-wide.
    #[arg(long)]
    pub namespace: Option<String>,
}
