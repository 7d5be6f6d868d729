//! Configuration management for the control plane.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::cli::Args;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Health/metrics HTTP server configuration
    pub metrics: MetricsConfig,
    /// Leader election configuration
    pub leader_election: LeaderElectionConfig,
    /// Reconciler tuning
    pub reconcile: ReconcileConfig,
    /// Namespace to restrict watches to. Empty means cluster-wide.
    pub namespace: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            metrics: MetricsConfig::default(),
            leader_election: LeaderElectionConfig::default(),
            reconcile: ReconcileConfig::default(),
            namespace: None,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config =
            serde_yaml::from_str(&content).with_context(|| "Failed to parse config file")?;

        Ok(config)
    }

    /// Apply CLI argument overrides to the configuration.
    pub fn with_cli_overrides(mut self, args: &Args) -> Self {
        if let Some(ref addr) = args.metrics_bind_address {
            self.metrics.listen_address = addr.clone();
        }

        if let Some(enabled) = args.leader_elect {
            self.leader_election.enabled = enabled;
        }

        if let Some(n) = args.concurrent_reconciles {
            self.reconcile.vm_concurrency = n;
            self.reconcile.provider_concurrency = n;
        }

        if let Some(ref period) = args.resync_period {
            self.reconcile.resync_period_seconds = parse_duration_seconds(period)
                .unwrap_or(self.reconcile.resync_period_seconds);
        }

        if let Some(ref ns) = args.namespace {
            self.namespace = Some(ns.clone());
        }

        self
    }
}

/// Parses a Go-style duration string (`10m`, `30s`, `1h`) into seconds.
fn parse_duration_seconds(s: &str) -> Option<u64> {
    let s = s.trim();
    let (num, unit) = s.split_at(s.find(|c: char| !c.is_ascii_digit())?);
    let n: u64 = num.parse().ok()?;
    match unit {
        "s" => Some(n),
        "m" => Some(n * 60),
        "h" => Some(n * 3600),
        _ => None,
    }
}

/// Health/metrics HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Address to listen on for `/healthz`, `/readyz`, `/metrics`
    pub listen_address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Leader election configuration. Backed by a Kubernetes `Lease` object
/// (spec.md §5) rather than a dedicated leader-election crate.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LeaderElectionConfig {
    pub enabled: bool,
    pub lease_name: String,
    pub lease_namespace: String,
    pub lease_duration_seconds: u64,
    pub renew_deadline_seconds: u64,
    pub retry_period_seconds: u64,
}

impl Default for LeaderElectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            lease_name: "virtrigaud-controller-leader".to_string(),
            lease_namespace: "virtrigaud-system".to_string(),
            lease_duration_seconds: 15,
            renew_deadline_seconds: 10,
            retry_period_seconds: 2,
        }
    }
}

/// Per-kind reconciler concurrency and timing (spec.md §5).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub vm_concurrency: usize,
    pub provider_concurrency: usize,
    pub migration_concurrency: usize,
    pub set_concurrency: usize,
    pub resync_period_seconds: u64,
    /// Grace period for draining in-flight reconciles on shutdown.
    pub shutdown_grace_seconds: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            vm_concurrency: 5,
            provider_concurrency: 5,
            migration_concurrency: 1,
            set_concurrency: 1,
            resync_period_seconds: 600,
            shutdown_grace_seconds: 30,
        }
    }
}
