//! # virtrigaud-providers
//!
//! Concrete [`virtrigaud_provider::ProviderBackend`] implementations for
//! every hypervisor VirtRigaud supports, plus the gRPC adapter that exposes
//! one of them as a `ProviderService` server.
//!
//! ## Backends
//!
//! - [`mock`] — in-memory, used by the control plane's own tests and by
//!   `virtrigaud-runtime --dev`.
//! - [`libvirt`] — Libvirt/QEMU, behind the `libvirt` feature (requires
//!   system libvirt).
//! - [`vsphere`] — VMware vCenter, over its REST API.
//! - [`proxmox`] — Proxmox VE, over its REST API.
//!
//! None of these modules know about gRPC; [`grpc::GrpcProviderService`] is
//! the one seam that turns any of them into a wire server.

pub mod cloudinit;
pub mod disk_image;
pub mod grpc;
pub mod libvirt;
pub mod mock;
pub mod proxmox;
pub mod task;
pub mod vsphere;
mod xml;

pub use grpc::GrpcProviderService;
pub use mock::MockBackend;
pub use proxmox::{ProxmoxBackend, ProxmoxConfig};
pub use vsphere::{VsphereBackend, VsphereConfig};

#[cfg(feature = "libvirt")]
pub use libvirt::LibvirtBackend;
