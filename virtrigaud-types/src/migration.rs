//! `VMMigration` — cross-hypervisor VM migration state machine (spec.md §3, §4.5).

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::common::LocalObjectRef;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infra.virtrigaud.io",
    version = "v1beta1",
    kind = "VMMigration",
    namespaced,
    status = "VMMigrationStatus",
    shortname = "vmmig",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Progress","type":"integer","jsonPath":".status.progress.percentage"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VMMigrationSpec {
    pub source_vm_ref: LocalObjectRef,
    pub target_provider_ref: LocalObjectRef,
    #[serde(default)]
    pub policy: MigrationPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MigrationPolicy {
    #[serde(default)]
    pub mode: MigrationMode,
    #[serde(default)]
    pub keep_source: bool,
    #[serde(default)]
    pub intermediate_storage_hint: Option<String>,
}

impl Default for MigrationPolicy {
    fn default() -> Self {
        Self {
            mode: MigrationMode::Cold,
            keep_source: false,
            intermediate_storage_hint: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum MigrationMode {
    #[default]
    Cold,
    Warm,
    Live,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "PascalCase")]
pub enum MigrationPhase {
    #[default]
    Pending,
    Validating,
    Snapshotting,
    Exporting,
    Transferring,
    Converting,
    Importing,
    Creating,
    ValidatingTarget,
    Ready,
    Failed,
}

impl MigrationPhase {
    /// Next phase on success, following the fixed state machine in
    /// spec.md §4.5. `Converting` is optional and skipped by the
    /// reconciler when formats already match.
    pub fn next(self) -> Option<MigrationPhase> {
        use MigrationPhase::*;
        match self {
            Pending => Some(Validating),
            Validating => Some(Snapshotting),
            Snapshotting => Some(Exporting),
            Exporting => Some(Transferring),
            Transferring => Some(Converting),
            Converting => Some(Importing),
            Importing => Some(Creating),
            Creating => Some(ValidatingTarget),
            ValidatingTarget => Some(Ready),
            Ready | Failed => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VMMigrationStatus {
    #[serde(default)]
    pub conditions: Vec<crate::condition::Condition>,
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default)]
    pub phase: MigrationPhase,
    #[serde(default)]
    pub progress: MigrationProgress,
    #[serde(default)]
    pub snapshot_id: Option<String>,
    #[serde(default)]
    pub export_task_ref: Option<String>,
    #[serde(default)]
    pub import_task_ref: Option<String>,
    #[serde(default)]
    pub exported_disk_path: Option<String>,
    #[serde(default)]
    pub source_checksum: Option<String>,
    #[serde(default)]
    pub target_checksum: Option<String>,
    #[serde(default)]
    pub disk_size_bytes: Option<u64>,
    #[serde(default)]
    pub imported_disk_id: Option<String>,
    #[serde(default)]
    pub target_vm_name: Option<String>,
    #[serde(default)]
    pub intermediate_pvc_name: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub validation_result: Option<String>,
    #[serde(default)]
    pub completion_time: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MigrationProgress {
    #[serde(default)]
    pub percentage: u32,
}

/// Phase weighting used to compute `status.progress.percentage`
/// (spec.md §4.5 "Progress"): export+transfer ~70%, import ~20%, create ~10%.
pub fn weighted_progress(phase: MigrationPhase, step_percent: u32) -> u32 {
    use MigrationPhase::*;
    let step_percent = step_percent.min(100);
    match phase {
        Pending | Validating | Snapshotting => 0,
        Exporting | Transferring | Converting => (step_percent as f64 * 0.70) as u32,
        Importing => 70 + (step_percent as f64 * 0.20) as u32,
        Creating | ValidatingTarget => 90 + (step_percent as f64 * 0.10) as u32,
        Ready => 100,
        Failed => 0,
    }
}
