//! The provider contract every hypervisor back-end implements (spec.md §4.1).
//!
//! A `ProviderBackend` is the one seam between the control plane and a
//! concrete hypervisor. Every method is cancel-safe: reconcilers never block
//! on it past the deadline carried by `Context`, and an operation already in
//! flight when canceled is left to complete out-of-band and picked up again
//! through `task_status`.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::types::{
    CapabilitySet, CloneMode, CloneResult, CreateParams, CreateResult, DescribeResult, DiskInfo,
    ExportParams, ExportResult, ImportParams, ImportResult, PowerOp, ReconfigureParams,
    SnapshotParams, SnapshotResult, TaskRef, TaskStatusResult, VmSummary,
};

/// Per-call context. `cancel` fires when the caller's deadline expires or the
/// reconciler is shutting down; checking `cancel.is_cancelled()` between
/// steps of a long-running call is the only cooperative-cancellation
/// contract a back-end needs to honor.
#[derive(Clone)]
pub struct Context {
    pub cancel: CancellationToken,
    pub request_id: String,
}

impl Context {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self { cancel: CancellationToken::new(), request_id: request_id.into() }
    }

    pub fn child(&self) -> Self {
        Self { cancel: self.cancel.child_token(), request_id: self.request_id.clone() }
    }
}

#[async_trait]
pub trait ProviderBackend: Send + Sync {
    /// Pre-flight check that `params` is something this back-end can
    /// actually create, without creating anything. Must return
    /// `InvalidSpec` rather than `Internal` for anything the caller could
    /// fix by editing the resource.
    async fn validate(&self, ctx: &Context, params: &CreateParams) -> Result<()>;

    /// Idempotent: calling twice with the same `params.name` returns the
    /// existing VM's id with `pre_existing: true` rather than erroring.
    async fn create(&self, ctx: &Context, params: CreateParams) -> Result<CreateResult>;

    /// Idempotent: deleting an already-absent id returns `Ok(None)`.
    async fn delete(&self, ctx: &Context, id: &str) -> Result<Option<TaskRef>>;

    async fn power(&self, ctx: &Context, id: &str, op: PowerOp) -> Result<Option<TaskRef>>;

    /// No-op reconfigurations (`params.is_noop()`) return `Ok(None)` without
    /// contacting the hypervisor.
    async fn reconfigure(&self, ctx: &Context, id: &str, params: ReconfigureParams) -> Result<Option<TaskRef>>;

    async fn describe(&self, ctx: &Context, id: &str) -> Result<DescribeResult>;

    async fn clone_vm(&self, ctx: &Context, source_id: &str, target_name: &str, mode: CloneMode) -> Result<CloneResult>;

    async fn snapshot_create(&self, ctx: &Context, id: &str, params: SnapshotParams) -> Result<SnapshotResult>;

    async fn snapshot_delete(&self, ctx: &Context, id: &str, snapshot_id: &str) -> Result<Option<TaskRef>>;

    async fn snapshot_revert(&self, ctx: &Context, id: &str, snapshot_id: &str) -> Result<Option<TaskRef>>;

    async fn export_disk(&self, ctx: &Context, params: ExportParams) -> Result<ExportResult>;

    async fn import_disk(&self, ctx: &Context, params: ImportParams) -> Result<ImportResult>;

    async fn get_disk_info(&self, ctx: &Context, vm_id: &str, disk_id: &str) -> Result<DiskInfo>;

    /// Every VM the back-end currently knows about, managed or not — the
    /// source data for adoption (spec.md §4.7).
    async fn list_vms(&self, ctx: &Context) -> Result<Vec<VmSummary>>;

    /// Poll, never block: a long-running operation is always represented by
    /// a `TaskRef` the caller re-polls, not by holding the async call open.
    async fn task_status(&self, ctx: &Context, task: &TaskRef) -> Result<TaskStatusResult>;

    /// What this back-end supports right now. Polled at worker startup and
    /// cached by the resolver (spec.md §4.2); a back-end whose capabilities
    /// change at runtime should expect callers to keep using the stale
    /// snapshot until the next resync.
    async fn get_capabilities(&self, ctx: &Context) -> Result<CapabilitySet>;
}
