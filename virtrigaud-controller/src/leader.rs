//! Lease-based leader election (spec.md §5 "Leader election").
//!
//! No dedicated leader-election crate is in the workspace dependency set, so
//! this hand-rolls the standard compare-and-swap-on-a-Lease protocol against
//! `coordination.k8s.io/v1` the way most Kubernetes controllers do it.

use std::time::Duration;

use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client};
use tracing::{info, warn};

pub struct LeaderElector {
    client: Client,
    namespace: String,
    lease_name: String,
    identity: String,
    lease_duration: Duration,
    renew_deadline: Duration,
    retry_period: Duration,
}

impl LeaderElector {
    pub fn new(
        client: Client,
        namespace: String,
        lease_name: String,
        lease_duration: Duration,
        renew_deadline: Duration,
        retry_period: Duration,
    ) -> Self {
        let identity = format!(
            "{}-{}",
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "virtrigaud-controller".to_string()),
            uuid::Uuid::new_v4()
        );
        Self {
            client,
            namespace,
            lease_name,
            identity,
            lease_duration,
            renew_deadline,
            retry_period,
        }
    }

    /// Blocks until this process acquires the lease, then returns. Callers
    /// should spawn a background task to keep renewing via `run_renewal`.
    pub async fn acquire(&self) -> anyhow::Result<()> {
        loop {
            if self.try_acquire_or_renew().await? {
                info!(identity = %self.identity, lease = %self.lease_name, "acquired leader lease");
                return Ok(());
            }
            tokio::time::sleep(self.retry_period).await;
        }
    }

    /// Runs forever, renewing the lease on `retry_period`. Returns (losing
    /// leadership) if a renewal fails past the deadline; callers should treat
    /// that as fatal and restart the process rather than run split-brain.
    pub async fn run_renewal(&self) -> anyhow::Result<()> {
        loop {
            tokio::time::sleep(self.retry_period).await;
            match self.try_acquire_or_renew().await {
                Ok(true) => {}
                Ok(false) => {
                    anyhow::bail!("lost leader lease {}", self.lease_name);
                }
                Err(e) => {
                    warn!(error = %e, "lease renewal failed, will retry");
                }
            }
        }
    }

    async fn try_acquire_or_renew(&self) -> anyhow::Result<bool> {
        let api: Api<Lease> = Api::namespaced(self.client.clone(), &self.namespace);

        let existing = api.get_opt(&self.lease_name).await?;
        let now = chrono::Utc::now();

        match existing {
            None => {
                let lease = Lease {
                    metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
                        name: Some(self.lease_name.clone()),
                        namespace: Some(self.namespace.clone()),
                        ..Default::default()
                    },
                    spec: Some(LeaseSpec {
                        holder_identity: Some(self.identity.clone()),
                        lease_duration_seconds: Some(self.lease_duration.as_secs() as i32),
                        acquire_time: Some(MicroTime(now)),
                        renew_time: Some(MicroTime(now)),
                        lease_transitions: Some(0),
                        ..Default::default()
                    }),
                };
                match api.create(&PostParams::default(), &lease).await {
                    Ok(_) => Ok(true),
                    Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
                    Err(e) => Err(e.into()),
                }
            }
            Some(lease) => {
                let spec = lease.spec.clone().unwrap_or_default();
                let held_by_us = spec.holder_identity.as_deref() == Some(self.identity.as_str());
                let expired = spec
                    .renew_time
                    .as_ref()
                    .map(|t| now.signed_duration_since(t.0) > chrono::Duration::from_std(self.renew_deadline).unwrap())
                    .unwrap_or(true);

                if !held_by_us && !expired {
                    return Ok(false);
                }

                let transitions = if held_by_us {
                    spec.lease_transitions.unwrap_or(0)
                } else {
                    spec.lease_transitions.unwrap_or(0) + 1
                };

                let patch = serde_json::json!({
                    "spec": {
                        "holderIdentity": self.identity,
                        "leaseDurationSeconds": self.lease_duration.as_secs() as i32,
                        "renewTime": MicroTime(now),
                        "leaseTransitions": transitions,
                    }
                });
                api.patch(&self.lease_name, &PatchParams::apply("virtrigaud-controller").force(), &Patch::Apply(&patch))
                    .await?;
                Ok(true)
            }
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }
}
