//! Request/response types for every provider contract operation (spec.md §4.1).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Opaque identifier for an in-progress async provider operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRef(pub String);

impl std::fmt::Display for TaskRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named optional feature a provider may advertise. The set is closed at
/// the taxonomy level (these constants) but extensible in practice — unknown
/// flags round-trip fine, reconcilers only ever check for membership.
pub mod capability {
    pub const CORE: &str = "core";
    pub const SNAPSHOTS: &str = "snapshots";
    pub const MEMORY_SNAPSHOTS: &str = "memory-snapshots";
    pub const LINKED_CLONES: &str = "linked-clones";
    pub const ONLINE_RECONFIGURE: &str = "online-reconfigure";
    pub const ONLINE_DISK_EXPANSION: &str = "online-disk-expansion";
    pub const IMAGE_IMPORT: &str = "image-import";
    pub const TASK_STATUS: &str = "task-status";
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilitySet {
    pub flags: HashSet<String>,
    pub disk_formats: Vec<String>,
    pub network_types: Vec<String>,
}

impl CapabilitySet {
    pub fn has(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerOp {
    On,
    Off,
    Reboot,
    ShutdownGraceful,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloneMode {
    Linked,
    Full,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiskSpec {
    pub name: String,
    pub size_gib: u64,
    pub bus: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub name: String,
    pub vlan: Option<u16>,
    pub nic_model: Option<String>,
    pub mac_address: Option<String>,
    pub static_ip: Option<String>,
}

/// Exactly one of `image_name` or `imported_disk_id` is set — the provider
/// side of VirtualMachine invariant 1.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateParams {
    pub name: String,
    pub vcpus: u32,
    pub memory_mib: u64,
    pub image_name: Option<String>,
    pub imported_disk_id: Option<String>,
    pub disks: Vec<DiskSpec>,
    pub networks: Vec<NetworkSpec>,
    pub user_data: Option<String>,
    pub meta_data: Option<String>,
    pub placement_host: Option<String>,
    pub tags: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateResult {
    pub id: String,
    pub task: Option<TaskRef>,
    /// True if `id` names a VM that already existed (idempotent re-entry,
    /// spec.md §4.1 Create notes).
    pub pre_existing: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconfigureParams {
    pub vcpus: Option<u32>,
    pub memory_mib: Option<u64>,
    pub disks: Option<Vec<DiskSpec>>,
    pub networks: Option<Vec<NetworkSpec>>,
}

impl ReconfigureParams {
    pub fn is_noop(&self) -> bool {
        self.vcpus.is_none() && self.memory_mib.is_none() && self.disks.is_none() && self.networks.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescribeResult {
    pub exists: bool,
    pub power_state: PowerState,
    pub ips: Vec<String>,
    pub console_url: Option<String>,
    pub vcpus: u32,
    pub memory_mib: u64,
    pub raw_details: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PowerState {
    On,
    #[default]
    Off,
    Suspended,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneResult {
    pub target_id: String,
    pub task: Option<TaskRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotParams {
    pub name: String,
    pub include_memory: bool,
    pub quiesce: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotResult {
    pub snapshot_id: String,
    pub task: Option<TaskRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportParams {
    pub vm_id: String,
    pub snapshot_id: Option<String>,
    pub destination_url: String,
    pub format: String,
    pub compress: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportResult {
    pub export_id: String,
    pub task: Option<TaskRef>,
    pub estimated_size_bytes: u64,
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportParams {
    pub source_url: String,
    pub storage_hint: Option<String>,
    pub format: String,
    pub target_name: String,
    pub expected_checksum: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportResult {
    pub disk_id: String,
    pub path: String,
    pub task: Option<TaskRef>,
    pub size_bytes: u64,
    pub checksum: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskInfo {
    pub format: String,
    pub virtual_size_bytes: u64,
    pub actual_size_bytes: u64,
    pub path: String,
    pub backing_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmSummary {
    pub id: String,
    pub name: String,
    pub power_state: PowerState,
    pub ips: Vec<String>,
    pub vcpus: u32,
    pub memory_mib: u64,
    pub disks: Vec<DiskInfo>,
    pub networks: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusResult {
    pub done: bool,
    pub error: Option<String>,
    pub progress_percent: u32,
}
