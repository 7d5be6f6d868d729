//! `VMClass` — resource shape template (spec.md §3).

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::common::Firmware;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infra.virtrigaud.io",
    version = "v1beta1",
    kind = "VMClass",
    namespaced,
    status = "VMClassStatus",
    shortname = "vmc"
)]
#[serde(rename_all = "camelCase")]
pub struct VMClassSpec {
    #[serde(default = "default_vcpus")]
    pub vcpus: u32,
    /// Kubernetes-style quantity string, e.g. "4Gi".
    pub memory: String,
    #[serde(default)]
    pub firmware: Firmware,
    #[serde(default)]
    pub disk_defaults: DiskDefaults,
    #[serde(default)]
    pub guest_tools_policy: GuestToolsPolicy,
    #[serde(default)]
    pub performance: Option<PerformanceProfile>,
    #[serde(default)]
    pub security: Option<SecurityProfile>,
    #[serde(default)]
    pub resource_limits: Option<ResourceLimits>,
}

fn default_vcpus() -> u32 {
    1
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiskDefaults {
    #[serde(default)]
    pub bus: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub thin_provisioned: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "PascalCase")]
pub enum GuestToolsPolicy {
    #[default]
    Manual,
    Upgrade,
    Ignore,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceProfile {
    #[serde(default)]
    pub cpu_pinning: bool,
    #[serde(default)]
    pub numa_aligned: bool,
    #[serde(default)]
    pub hugepages: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecurityProfile {
    #[serde(default)]
    pub secure_boot: bool,
    #[serde(default)]
    pub vtpm: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimits {
    pub cpu_limit_percent: Option<u32>,
    pub memory_reservation_percent: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct VMClassStatus {
    #[serde(default)]
    pub in_use_by: i32,
}
