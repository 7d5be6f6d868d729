//! Configuration management for the provider runtime.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use virtrigaud_providers::{ProxmoxConfig, VsphereConfig};

use crate::cli::Args;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// gRPC server configuration
    pub server: ServerConfig,
    /// Health/metrics HTTP server configuration
    pub health: HealthConfig,
    /// Hypervisor backend configuration
    pub backend: BackendConfig,
    /// mTLS configuration for the gRPC server
    pub tls: Option<TlsConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            health: HealthConfig::default(),
            backend: BackendConfig::default(),
            tls: None,
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

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| "Failed to parse config file")?;

        Ok(config)
    }

    /// Apply CLI argument overrides to the configuration.
    pub fn with_cli_overrides(mut self, args: &Args) -> Self {
        if let Some(ref listen) = args.listen {
            self.server.listen_address = listen.clone();
        }

        if let Some(ref health_listen) = args.health_listen {
            self.health.listen_address = health_listen.clone();
        }

        if args.dev {
            self.backend = BackendConfig::Mock;
        }

        self
    }
}

/// gRPC server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on for gRPC
    pub listen_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Health/metrics HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Address to listen on for `/healthz`, `/readyz`, `/metrics`
    pub listen_address: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:9091".to_string(),
        }
    }
}

/// Selects which `ProviderBackend` implementation the runtime hosts.
///
/// Exactly one backend is active per process; a deployment hosts one
/// `virtrigaud-runtime` instance per hypervisor endpoint it manages.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    /// In-memory backend for testing/development
    Mock,
    /// Libvirt/QEMU backend
    Libvirt {
        /// Connection URI, e.g. `qemu:///system` or `qemu+ssh://host/system`
        #[serde(default = "default_libvirt_uri")]
        uri: String,
    },
    /// VMware vCenter backend
    Vsphere(VsphereConfig),
    /// Proxmox VE backend
    Proxmox(ProxmoxConfig),
}

fn default_libvirt_uri() -> String {
    "qemu:///system".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Mock
    }
}

/// mTLS configuration for the gRPC server.
#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    /// Enable mTLS
    pub enabled: bool,
    /// Path to server certificate file
    pub cert_path: String,
    /// Path to server private key file
    pub key_path: String,
    /// Path to the CA certificate trusted to sign client certificates
    pub client_ca_path: String,
    /// Generate a self-signed server certificate if `cert_path`/`key_path` don't exist
    #[serde(default)]
    pub self_signed: SelfSignedConfig,
}

/// Self-signed certificate generation parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SelfSignedConfig {
    /// Subject common name; defaults to the host's hostname
    pub common_name: Option<String>,
    /// Validity period in days
    pub validity_days: u32,
}

impl Default for SelfSignedConfig {
    fn default() -> Self {
        Self {
            common_name: None,
            validity_days: 365,
        }
    }
}
