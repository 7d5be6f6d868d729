//! `VMSet` — replica-set style orchestration over VirtualMachines (spec.md §3, §4.6).

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::common::LocalObjectRef;
use crate::network::VmNetworkAttachment;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infra.virtrigaud.io",
    version = "v1beta1",
    kind = "VMSet",
    namespaced,
    status = "VMSetStatus",
    shortname = "vmset",
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Ready","type":"integer","jsonPath":".status.ready"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VMSetSpec {
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    pub template: VmTemplate,
    #[serde(default)]
    pub update_strategy: UpdateStrategy,
}

fn default_replicas() -> i32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VmTemplate {
    pub provider_ref: LocalObjectRef,
    pub class_ref: LocalObjectRef,
    pub image_ref: LocalObjectRef,
    #[serde(default)]
    pub networks: Vec<VmNetworkAttachment>,
    #[serde(default)]
    pub user_data: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStrategy {
    #[serde(default)]
    pub strategy_type: UpdateStrategyType,
    #[serde(default = "default_max_unavailable")]
    pub max_unavailable: i32,
    #[serde(default = "default_max_surge")]
    pub max_surge: i32,
}

fn default_max_unavailable() -> i32 {
    1
}
fn default_max_surge() -> i32 {
    1
}

impl Default for UpdateStrategy {
    fn default() -> Self {
        Self {
            strategy_type: UpdateStrategyType::RollingUpdate,
            max_unavailable: default_max_unavailable(),
            max_surge: default_max_surge(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "PascalCase")]
pub enum UpdateStrategyType {
    #[default]
    RollingUpdate,
    Recreate,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VMSetStatus {
    #[serde(default)]
    pub conditions: Vec<crate::condition::Condition>,
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default)]
    pub replicas: i32,
    #[serde(default)]
    pub ready_replicas: i32,
    #[serde(default)]
    pub available_replicas: i32,
    #[serde(default)]
    pub updated_replicas: i32,
    #[serde(default)]
    pub current_revision: String,
    #[serde(default)]
    pub update_revision: String,
    #[serde(default)]
    pub collision_count: i32,
    /// Capped at 1000 entries (spec.md §4.6 step 5); excess omitted.
    #[serde(default)]
    pub vm_status: Vec<VmStatusSummary>,
    #[serde(default)]
    pub update_status: Option<UpdateStatus>,
}

pub const VM_STATUS_CAP: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VmStatusSummary {
    pub name: String,
    pub revision: String,
    pub ready: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatus {
    #[serde(default)]
    pub in_progress: bool,
    #[serde(default)]
    pub surge_count: i32,
    #[serde(default)]
    pub unavailable_count: i32,
}
