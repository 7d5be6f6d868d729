//! # VirtRigaud Types
//!
//! Custom resource definitions for the `infra.virtrigaud.io/v1beta1` API
//! group: the seven resource kinds VirtRigaud reconciles (spec.md §3).
//!
//! These are plain `kube::CustomResource` structs — the resource store and
//! watch API itself is an external collaborator (spec.md §1); this crate
//! only defines the schema every reconciler and the API server share.

pub mod adoption;
pub mod common;
pub mod condition;
pub mod migration;
pub mod network;
pub mod provider;
pub mod set;
pub mod snapshot;
pub mod vm;
pub mod vmclass;
pub mod vmimage;

pub use adoption::{AdoptionFilter, AdoptionStatus};
pub use common::{Firmware, LocalObjectRef, PowerState, ProviderType, FINALIZER, GROUP, VERSION};
pub use condition::{Condition, ConditionStatus};
pub use migration::{MigrationMode, MigrationPhase, MigrationPolicy, VMMigration, VMMigrationSpec, VMMigrationStatus};
pub use network::VmNetworkAttachment;
pub use provider::{Provider, ProviderRuntimePhase, ProviderRuntimeSpec, ProviderRuntimeStatus, ProviderSpec, ProviderStatus};
pub use set::{UpdateStrategy, UpdateStrategyType, VMSet, VMSetSpec, VMSetStatus, VmTemplate};
pub use snapshot::{VMSnapshot, VMSnapshotPhase, VMSnapshotSpec, VMSnapshotStatus};
pub use vm::{ImportedDiskRef, VirtualMachine, VirtualMachinePhase, VirtualMachineSpec, VirtualMachineStatus};
pub use vmclass::{VMClass, VMClassSpec, VMClassStatus};
pub use vmimage::{VMImage, VMImageSpec, VMImageStatus};
