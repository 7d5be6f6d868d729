//! Provider resolver (spec.md §4.2): a concurrent map from `{namespace,
//! name}` to a connected `ProviderService` stub. Guarded by a
//! reader/writer lock rather than `dashmap` — read-mostly, matching the
//! shared-resource note in spec.md §5, and consistent with the
//! `RwLock<HashMap>` pattern `MockBackend` already uses in this workspace.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tonic::transport::{Channel, Endpoint};
use tracing::{info, warn};

use virtrigaud_proto::provider::{ProviderServiceClient, ValidateRequest};
use virtrigaud_types::provider::Provider;
use virtrigaud_types::provider::ProviderRuntimePhase;

use crate::error::{Error, Result};

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(5);
const DIAL_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_CALL_DEADLINE: Duration = Duration::from_secs(30);

type CacheKey = (String, String);

#[derive(Clone)]
pub struct Resolver {
    cache: Arc<RwLock<HashMap<CacheKey, ProviderServiceClient<Channel>>>>,
}

impl Resolver {
    pub fn new() -> Self {
        Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Resolves a connected stub for the given Provider, reusing a cached
    /// connection when it still passes a lightweight health check.
    pub async fn resolve(&self, provider: &Provider) -> Result<ProviderServiceClient<Channel>> {
        let key = (
            provider.metadata.namespace.clone().unwrap_or_default(),
            provider.metadata.name.clone().unwrap_or_default(),
        );

        if provider.status.as_ref().map(|s| s.runtime.phase) != Some(ProviderRuntimePhase::Running)
        {
            return Err(Error::ProviderUnavailable(format!(
                "provider {}/{} runtime is not Running",
                key.0, key.1
            )));
        }
        let endpoint = provider
            .status
            .as_ref()
            .and_then(|s| s.runtime.endpoint.clone())
            .ok_or_else(|| {
                Error::ProviderUnavailable(format!("provider {}/{} has no endpoint", key.0, key.1))
            })?;

        if let Some(client) = self.cache.read().await.get(&key).cloned() {
            if self.validate(client.clone()).await {
                return Ok(client);
            }
            warn!(namespace = %key.0, name = %key.1, "cached provider stub failed health check, evicting");
            self.cache.write().await.remove(&key);
        }

        let client = self.connect(&endpoint).await?;
        self.cache.write().await.insert(key.clone(), client.clone());
        info!(namespace = %key.0, name = %key.1, endpoint = %endpoint, "connected to provider worker");
        Ok(client)
    }

    async fn validate(&self, mut client: ProviderServiceClient<Channel>) -> bool {
        validate_params(&mut client, virtrigaud_proto::provider::CreateParams::default())
            .await
            .is_ok()
    }

    async fn connect(&self, endpoint: &str) -> Result<ProviderServiceClient<Channel>> {
        let uri = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("https://{endpoint}")
        };

        let channel = Endpoint::from_shared(uri)
            .map_err(|e| Error::ProviderUnavailable(e.to_string()))?
            .tcp_keepalive(Some(KEEP_ALIVE))
            .keep_alive_timeout(KEEP_ALIVE_TIMEOUT)
            .connect_timeout(DIAL_TIMEOUT)
            .timeout(DEFAULT_CALL_DEADLINE)
            .connect()
            .await?;

        Ok(ProviderServiceClient::new(channel))
    }

    /// Evicts the cached stub for a deleted Provider.
    pub async fn evict(&self, namespace: &str, name: &str) {
        self.cache
            .write()
            .await
            .remove(&(namespace.to_string(), name.to_string()));
    }

    /// Closes every cached stub. Called during graceful shutdown (spec.md §5).
    pub async fn close_all(&self) {
        self.cache.write().await.clear();
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

/// The lightweight `Validate` call used to revalidate a cached provider stub
/// (spec.md §4.2 step 2) and, with real `CreateParams`, by callers that want
/// a params-aware pre-flight check ahead of `create`.
pub async fn validate_params(
    client: &mut ProviderServiceClient<Channel>,
    params: virtrigaud_proto::provider::CreateParams,
) -> Result<()> {
    let mut req = tonic::Request::new(ValidateRequest {
        params: Some(params),
    });
    req.set_timeout(DEFAULT_CALL_DEADLINE);
    client.validate(req).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use virtrigaud_types::common::ProviderType;
    use virtrigaud_types::provider::{Provider, ProviderRuntimeSpec, ProviderSpec};

    fn provider_without_status(name: &str) -> Provider {
        Provider::new(
            name,
            ProviderSpec {
                type_: ProviderType::Vsphere,
                endpoint: "vcenter.example.com".to_string(),
                credential_ref: "vsphere-creds".to_string(),
                insecure_skip_verify: false,
                runtime: ProviderRuntimeSpec {
                    image: "virtrigaud-runtime:latest".to_string(),
                    replicas: 1,
                    service_port: None,
                    node_selector: Default::default(),
                    run_as_non_root: true,
                },
                runtime_mode: "Remote".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn resolve_rejects_provider_not_running() {
        let resolver = Resolver::new();
        let provider = provider_without_status("provider-1");

        let err = resolver.resolve(&provider).await.unwrap_err();
        assert!(matches!(err, Error::ProviderUnavailable(_)));
    }

    #[tokio::test]
    async fn evict_and_close_all_are_safe_on_empty_cache() {
        let resolver = Resolver::new();
        resolver.evict("ns", "provider-1").await;
        resolver.close_all().await;
    }
}
