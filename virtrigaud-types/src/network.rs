//! `VMNetworkAttachment` — abstract network spec embedded in a
//! `VirtualMachine`'s disk/network list (spec.md §3).
//!
//! Open Question resolved in DESIGN.md: this is an embedded struct rather
//! than its own watched kind, keeping the resource model at exactly the
//! seven kinds spec.md's overview table counts.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VmNetworkAttachment {
    /// Portgroup (vSphere), bridge (libvirt/Proxmox) or abstract network name.
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vlan: Option<u16>,
    #[serde(default)]
    pub nic_model: NicModel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub ip_policy: IpPolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_ip: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum NicModel {
    #[default]
    Virtio,
    E1000,
    E1000e,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "PascalCase")]
pub enum IpPolicy {
    #[default]
    Dhcp,
    Static,
}
