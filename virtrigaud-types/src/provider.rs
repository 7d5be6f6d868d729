//! `Provider` — a hypervisor endpoint plus the worker pod the core manages
//! on its behalf (spec.md §3, §4.3).

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::common::ProviderType;
use crate::condition::Condition;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infra.virtrigaud.io",
    version = "v1beta1",
    kind = "Provider",
    namespaced,
    status = "ProviderStatus",
    shortname = "prov",
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.runtime.phase"}"#,
    printcolumn = r#"{"name":"Healthy","type":"boolean","jsonPath":".status.healthy"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSpec {
    #[serde(rename = "type")]
    pub type_: ProviderType,
    /// Hypervisor management endpoint (e.g. vCenter URL, libvirt URI, Proxmox API host).
    pub endpoint: String,
    /// Name of a Secret (in the same namespace) holding back-end credentials.
    /// Resolution of the credential blob itself is out of scope (spec.md §1).
    pub credential_ref: String,
    #[serde(default)]
    pub insecure_skip_verify: bool,
    pub runtime: ProviderRuntimeSpec,

    /// Vestigial per spec.md §9 "Open Question": the only supported mode is
    /// `Remote`; anything else is rejected with `InvalidSpec`.
    #[serde(default = "default_runtime_mode")]
    pub runtime_mode: String,
}

fn default_runtime_mode() -> String {
    "Remote".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRuntimeSpec {
    pub image: String,
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    #[serde(default)]
    pub service_port: Option<i32>,
    #[serde(default)]
    pub node_selector: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    pub run_as_non_root: bool,
}

fn default_replicas() -> i32 {
    1
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default)]
    pub healthy: bool,
    pub last_health_check: Option<DateTime<Utc>>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub version: Option<String>,
    #[serde(default)]
    pub connected_vms: i32,
    #[serde(default)]
    pub runtime: ProviderRuntimeStatus,
    #[serde(default)]
    pub adoption: Option<crate::adoption::AdoptionStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRuntimeStatus {
    #[serde(default = "default_runtime_mode")]
    pub mode: String,
    #[serde(default)]
    pub phase: ProviderRuntimePhase,
    pub endpoint: Option<String>,
    #[serde(default)]
    pub ready_replicas: i32,
    #[serde(default)]
    pub available_replicas: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "PascalCase")]
pub enum ProviderRuntimePhase {
    #[default]
    Pending,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl Provider {
    /// Deterministic names for the Deployment/Service the runtime manager
    /// reconciles into existence (spec.md §4.3 step 2).
    pub fn worker_name(namespace: &str, name: &str) -> String {
        format!("virtrigaud-provider-{namespace}-{name}")
    }

    pub fn is_remote_mode(&self) -> bool {
        self.spec.runtime_mode == "Remote"
    }
}
