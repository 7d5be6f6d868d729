//! Command-line argument parsing.

use clap::Parser;

/// VirtRigaud provider runtime - hosts one hypervisor backend behind gRPC.
#[derive(Parser, Debug)]
#[command(name = "virtrigaud-runtime")]
#[command(about = "VirtRigaud provider runtime - hosts one hypervisor backend behind gRPC")]
#[command(version)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/virtrigaud/runtime.yaml")]
    pub config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Listen address for the gRPC server
    #[arg(long)]
    pub listen: Option<String>,

    /// Listen address for the health/metrics HTTP server
    #[arg(long)]
    pub health_listen: Option<String>,

    /// Use the in-memory mock backend regardless of configuration
    #[arg(long)]
    pub dev: bool,
}
