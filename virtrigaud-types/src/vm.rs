//! `VirtualMachine` — desired shape of one VM (spec.md §3, §4.4).

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::common::{LocalObjectRef, PowerState};
use crate::condition::Condition;
use crate::network::VmNetworkAttachment;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infra.virtrigaud.io",
    version = "v1beta1",
    kind = "VirtualMachine",
    namespaced,
    status = "VirtualMachineStatus",
    shortname = "vm",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Power","type":"string","jsonPath":".status.powerState"}"#,
    printcolumn = r#"{"name":"IPs","type":"string","jsonPath":".status.ips"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSpec {
    pub provider_ref: LocalObjectRef,
    pub class_ref: LocalObjectRef,

    /// Invariant 1 (spec.md §3): exactly one of these two is set.
    #[serde(default)]
    pub image_ref: Option<LocalObjectRef>,
    #[serde(default)]
    pub imported_disk: Option<ImportedDiskRef>,

    #[serde(default)]
    pub disks: Vec<AdditionalDisk>,
    #[serde(default)]
    pub networks: Vec<VmNetworkAttachment>,
    #[serde(default)]
    pub user_data: Option<String>,
    #[serde(default)]
    pub meta_data: Option<String>,
    #[serde(default)]
    pub power_state: PowerState,
    #[serde(default)]
    pub tags: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    pub placement: Option<Placement>,
}

impl VirtualMachineSpec {
    /// Invariant 1: `(imageRef != nil) XOR (importedDisk != nil)`.
    pub fn has_exactly_one_source(&self) -> bool {
        self.image_ref.is_some() != self.imported_disk.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportedDiskRef {
    pub disk_id: String,
    pub format: String,
    /// Origin of the imported disk: `"migration"` or `"manual"` (adoption).
    pub source: String,
    #[serde(default)]
    pub migration_ref: Option<LocalObjectRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalDisk {
    pub name: String,
    pub size_gib: u64,
    #[serde(default)]
    pub bus: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub datastore: Option<String>,
    #[serde(default)]
    pub resource_pool: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "PascalCase")]
pub enum VirtualMachinePhase {
    #[default]
    Pending,
    Provisioning,
    Running,
    Stopped,
    Reconfiguring,
    Deleting,
    Failed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub observed_generation: i64,
    pub id: Option<String>,
    #[serde(default)]
    pub power_state: PowerState,
    #[serde(default)]
    pub phase: VirtualMachinePhase,
    #[serde(default)]
    pub ips: Vec<String>,
    pub console_url: Option<String>,
    #[serde(default)]
    pub current_resources: CurrentResources,
    #[serde(default)]
    pub snapshots: Vec<VmSnapshotRef>,
    pub last_task_ref: Option<String>,
    pub reconfigure_task_ref: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CurrentResources {
    #[serde(default)]
    pub vcpus: u32,
    #[serde(default)]
    pub memory: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VmSnapshotRef {
    pub name: String,
    pub provider_snapshot_id: String,
}

impl VirtualMachine {
    pub fn finalizer_present(&self) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|f| f == crate::common::FINALIZER))
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}
