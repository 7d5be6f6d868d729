//! `VMSnapshot` — first-class snapshot resource (spec.md §3, §4.4 step 7).

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::common::LocalObjectRef;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infra.virtrigaud.io",
    version = "v1beta1",
    kind = "VMSnapshot",
    namespaced,
    status = "VMSnapshotStatus",
    shortname = "vmsnap",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VMSnapshotSpec {
    pub vm_ref: LocalObjectRef,
    #[serde(default)]
    pub name_hint: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub include_memory: bool,
    #[serde(default)]
    pub quiesce: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "PascalCase")]
pub enum VMSnapshotPhase {
    #[default]
    Pending,
    Creating,
    Ready,
    Deleting,
    Failed,
    Expired,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VMSnapshotStatus {
    #[serde(default)]
    pub conditions: Vec<crate::condition::Condition>,
    #[serde(default)]
    pub observed_generation: i64,
    pub provider_snapshot_id: Option<String>,
    #[serde(default)]
    pub phase: VMSnapshotPhase,
    pub size_bytes: Option<u64>,
    pub created_at: Option<DateTime<Utc>>,
    pub parent: Option<String>,
    #[serde(default)]
    pub children: Vec<String>,
}
