//! TLS certificate management for the gRPC server.
//!
//! Every hypervisor endpoint in a VirtRigaud deployment talks to its worker
//! over mutually-authenticated TLS: the control plane presents a client
//! certificate signed by the deployment's CA, and the worker verifies it
//! before accepting any RPC. This module owns the server side of that
//! handshake - loading or generating the server's own certificate, and
//! building the `tonic` `ServerTlsConfig` that checks client certificates
//! against the configured CA.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use rcgen::{Certificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyUsagePurpose, SanType};
use tonic::transport::{Certificate as TonicCertificate, Identity, ServerTlsConfig};
use tracing::{info, warn};

use crate::config::TlsConfig;

/// Loads or generates the server identity and builds a `ServerTlsConfig`
/// that requires and verifies client certificates against `client_ca_path`.
pub struct TlsManager {
    config: TlsConfig,
}

impl TlsManager {
    pub fn new(config: TlsConfig) -> Self {
        Self { config }
    }

    /// Ensure a server certificate and key exist, generating a self-signed
    /// pair if they don't, then build the mTLS configuration for `tonic`.
    pub async fn server_tls_config(&self) -> Result<ServerTlsConfig> {
        if !Path::new(&self.config.cert_path).exists() || !Path::new(&self.config.key_path).exists() {
            info!("no server certificate found, generating a self-signed one");
            self.generate_self_signed().await?;
        } else {
            info!(
                cert = %self.config.cert_path,
                key = %self.config.key_path,
                "using existing server certificate"
            );
        }

        let cert_pem = fs::read_to_string(&self.config.cert_path)
            .context("failed to read server certificate")?;
        let key_pem =
            fs::read_to_string(&self.config.key_path).context("failed to read server private key")?;
        let identity = Identity::from_pem(cert_pem, key_pem);

        let ca_pem = fs::read_to_string(&self.config.client_ca_path)
            .with_context(|| format!("failed to read client CA at {}", self.config.client_ca_path))?;
        let client_ca = TonicCertificate::from_pem(ca_pem);

        Ok(ServerTlsConfig::new()
            .identity(identity)
            .client_ca_root(client_ca))
    }

    async fn generate_self_signed(&self) -> Result<()> {
        let hostname = Self::local_hostname();
        let common_name = self
            .config
            .self_signed
            .common_name
            .clone()
            .unwrap_or(hostname.clone());
        let validity_days = self.config.self_signed.validity_days;

        info!(common_name = %common_name, validity_days, "generating self-signed server certificate");

        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, &common_name);
        dn.push(DnType::OrganizationName, "VirtRigaud");
        params.distinguished_name = dn;

        let now = time::OffsetDateTime::now_utc();
        params.not_before = now - time::Duration::hours(1);
        params.not_after = now + time::Duration::days(validity_days as i64);

        params.subject_alt_names = vec![
            SanType::DnsName(
                common_name
                    .clone()
                    .try_into()
                    .map_err(|e| anyhow!("invalid DNS name: {e}"))?,
            ),
            SanType::DnsName("localhost".to_string().try_into().unwrap()),
        ];
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyEncipherment];
        params.is_ca = IsCa::NoCa;

        let cert = Certificate::from_params(params).context("failed to generate certificate")?;
        let cert_pem = cert.serialize_pem().context("failed to serialize certificate")?;
        let key_pem = cert.serialize_private_key_pem();

        if let Some(parent) = Path::new(&self.config.cert_path).parent() {
            fs::create_dir_all(parent).context("failed to create certificate directory")?;
        }
        fs::write(&self.config.cert_path, &cert_pem).context("failed to write certificate file")?;
        Self::write_key_file(&self.config.key_path, &key_pem)?;

        info!(
            cert = %self.config.cert_path,
            key = %self.config.key_path,
            "self-signed certificate generated"
        );
        Ok(())
    }

    #[cfg(unix)]
    fn write_key_file(path: &str, key_pem: &str) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        fs::write(path, key_pem).context("failed to write private key file")?;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .context("failed to set private key permissions")?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn write_key_file(path: &str, key_pem: &str) -> Result<()> {
        fs::write(path, key_pem).context("failed to write private key file")?;
        Ok(())
    }

    fn local_hostname() -> String {
        hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "localhost".to_string())
    }
}

/// Resolves a relative certificate path against the directory it should live in.
pub fn default_cert_dir() -> PathBuf {
    PathBuf::from("/etc/virtrigaud/certs")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> TlsConfig {
        TlsConfig {
            enabled: true,
            cert_path: dir.path().join("server.crt").to_string_lossy().to_string(),
            key_path: dir.path().join("server.key").to_string_lossy().to_string(),
            client_ca_path: dir.path().join("ca.crt").to_string_lossy().to_string(),
            self_signed: crate::config::SelfSignedConfig {
                common_name: Some("test.local".to_string()),
                validity_days: 30,
            },
        }
    }

    #[tokio::test]
    async fn generates_self_signed_certificate() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let manager = TlsManager::new(config.clone());

        manager.generate_self_signed().await.unwrap();

        assert!(Path::new(&config.cert_path).exists());
        assert!(Path::new(&config.key_path).exists());
    }

    #[tokio::test]
    async fn server_tls_config_requires_client_ca() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        // generate a throwaway CA cert to satisfy client_ca_path
        let ca_manager = TlsManager::new(TlsConfig {
            cert_path: config.client_ca_path.clone(),
            key_path: dir.path().join("ca.key").to_string_lossy().to_string(),
            ..config.clone()
        });
        ca_manager.generate_self_signed().await.unwrap();

        config.enabled = true;
        let manager = TlsManager::new(config);
        manager.server_tls_config().await.unwrap();
    }
}
