//! # virtrigaud-provider
//!
//! The provider contract: a capability-typed trait every hypervisor back-end
//! implements, plus the closed error taxonomy and request/response types it
//! trades in (spec.md §4.1).
//!
//! This crate has no hypervisor-specific code in it. Concrete back-ends
//! (vSphere, Libvirt/KVM, Proxmox VE, Mock) and the gRPC server that exposes
//! them to the control plane live in `virtrigaud-providers`; this crate is
//! the seam both sides compile against.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{ErrorKind, ProviderError, Result};
pub use traits::{Context, ProviderBackend};
pub use types::{
    capability, CapabilitySet, CloneMode, CloneResult, CreateParams, CreateResult, DescribeResult,
    DiskInfo, DiskSpec, ExportParams, ExportResult, ImportParams, ImportResult, NetworkSpec,
    PowerOp, PowerState, ReconfigureParams, SnapshotParams, SnapshotResult, TaskRef,
    TaskStatusResult, VmSummary,
};
