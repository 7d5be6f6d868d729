//! Constants and small shared value types used across resource kinds.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Finalizer token blocking deletion until the owning reconciler has torn
/// down back-end state (spec.md §3 invariant 3).
pub const FINALIZER: &str = "infra.virtrigaud.io/finalizer";

pub const GROUP: &str = "infra.virtrigaud.io";
pub const VERSION: &str = "v1beta1";

pub mod labels {
    pub const ADOPTED: &str = "virtrigaud.io/adopted";
    pub const SET_NAME: &str = "virtrigaud.io/vmset";
    pub const REVISION: &str = "virtrigaud.io/revision";
}

pub mod annotations {
    pub const ADOPT_VMS: &str = "virtrigaud.io/adopt-vms";
    pub const ADOPT_FILTER: &str = "virtrigaud.io/adopt-filter";
    pub const MIGRATED_FROM: &str = "virtrigaud.io/migrated-from";
    pub const MIGRATION: &str = "virtrigaud.io/migration";
    pub const IMPORTED_DISK_ID: &str = "virtrigaud.io/imported-disk-id";
    pub const DISK_CHECKSUM: &str = "virtrigaud.io/disk-checksum";
    pub const COMPONENT: &str = "virtrigaud.io/component";
}

/// Label value used on auto-mounted migration storage PVCs
/// (spec.md §4.3 step 4, §4.5 Validating).
pub const MIGRATION_STORAGE_COMPONENT: &str = "migration-storage";

/// A namespaced reference to another resource, as embedded in specs
/// (`providerRef`, `classRef`, `imageRef`, `targetProviderRef`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LocalObjectRef {
    pub name: String,
}

impl LocalObjectRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Firmware selection shared by `VMClass` defaults and `VMImage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Firmware {
    #[default]
    Bios,
    Uefi,
}

/// Hypervisor back-end kind a `Provider` speaks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Vsphere,
    Libvirt,
    Proxmox,
    Mock,
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderType::Vsphere => write!(f, "vsphere"),
            ProviderType::Libvirt => write!(f, "libvirt"),
            ProviderType::Proxmox => write!(f, "proxmox"),
            ProviderType::Mock => write!(f, "mock"),
        }
    }
}

/// Desired power state for a `VirtualMachine`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "PascalCase")]
pub enum PowerState {
    #[default]
    On,
    Off,
}
