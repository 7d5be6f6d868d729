//! Libvirt/QEMU back-end: the reference on-prem implementation of
//! `ProviderBackend` (spec.md §4.1).

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};
use virt::connect::Connect;
use virt::domain::Domain;
use virt::sys;

use virtrigaud_provider::error::{ProviderError, Result};
use virtrigaud_provider::traits::{Context, ProviderBackend};
use virtrigaud_provider::types::{
    capability, CapabilitySet, CloneMode, CloneResult, CreateParams, CreateResult, DescribeResult,
    DiskInfo, ExportParams, ExportResult, ImportParams, ImportResult, PowerOp, PowerState,
    ReconfigureParams, SnapshotParams, SnapshotResult, TaskRef, TaskStatusResult, VmSummary,
};

use crate::cloudinit::{CloudInitConfig, CloudInitGenerator};
use crate::disk_image::DiskImageManager;
use crate::task::TaskRegistry;
use crate::xml::DomainXmlBuilder;

pub struct LibvirtBackend {
    connection: Connect,
    images: DiskImageManager,
    tasks: TaskRegistry,
}

impl LibvirtBackend {
    /// Common URIs: `qemu:///system` (local system-wide), `qemu+ssh://host/system` (remote).
    pub async fn new(uri: &str) -> Result<Self> {
        info!(uri, "connecting to libvirt");
        let connection = Connect::open(Some(uri)).map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        Ok(Self { connection, images: DiskImageManager::new(), tasks: TaskRegistry::new() })
    }

    fn get_domain(&self, id: &str) -> Result<Domain> {
        Domain::lookup_by_uuid_string(&self.connection, id).map_err(|e| ProviderError::NotFound(format!("{id}: {e}")))
    }

    fn power_state_from_libvirt(state: sys::virDomainState) -> PowerState {
        match state {
            sys::VIR_DOMAIN_RUNNING => PowerState::On,
            sys::VIR_DOMAIN_PAUSED => PowerState::Suspended,
            sys::VIR_DOMAIN_SHUTOFF => PowerState::Off,
            sys::VIR_DOMAIN_PMSUSPENDED => PowerState::Suspended,
            _ => PowerState::Unknown,
        }
    }
}

#[async_trait]
impl ProviderBackend for LibvirtBackend {
    async fn validate(&self, _ctx: &Context, params: &CreateParams) -> Result<()> {
        if params.name.is_empty() {
            return Err(ProviderError::InvalidSpec("name must not be empty".into()));
        }
        if params.vcpus == 0 {
            return Err(ProviderError::InvalidSpec("vcpus must be > 0".into()));
        }
        if params.image_name.is_none() && params.imported_disk_id.is_none() {
            return Err(ProviderError::InvalidSpec("exactly one of image or imported disk is required".into()));
        }
        Ok(())
    }

    #[instrument(skip(self, params), fields(vm_name = %params.name))]
    async fn create(&self, _ctx: &Context, params: CreateParams) -> Result<CreateResult> {
        // Idempotent re-entry: a domain already defined with this name is
        // treated as the successful outcome of a prior, interrupted call.
        if let Ok(existing) = Domain::lookup_by_name(&self.connection, &params.name) {
            let id = existing.get_uuid_string().map_err(|e| ProviderError::Internal(e.to_string()))?;
            return Ok(CreateResult { id, task: None, pre_existing: true });
        }

        self.images.ensure_storage_dir()?;
        let mut disk_paths = Vec::with_capacity(params.disks.len());
        for disk in &params.disks {
            let path = self.images.disk_path(&params.name, &disk.name);
            self.images.create_image(&path, disk.size_gib, "qcow2")?;
            disk_paths.push(path.to_string_lossy().to_string());
        }

        let iso_path = if params.user_data.is_some() || params.meta_data.is_some() {
            let config = CloudInitConfig {
                instance_id: params.name.clone(),
                hostname: params.name.clone(),
                user_data: params.user_data.clone().unwrap_or_default(),
                meta_data: params.meta_data.clone(),
                ..Default::default()
            };
            let output_dir = self.images.base_path().join(&params.name);
            let path = CloudInitGenerator::new().generate_iso(&config, &output_dir)?;
            Some(path.to_string_lossy().to_string())
        } else {
            None
        };

        let mut builder = DomainXmlBuilder::new(&params.name, &params, &disk_paths);
        if let Some(path) = iso_path.as_deref() {
            builder = builder.with_cdrom(path);
        }
        let xml = builder.build();
        debug!(xml = %xml, "generated domain XML");

        let domain = Domain::define_xml(&self.connection, &xml).map_err(|e| ProviderError::Internal(e.to_string()))?;
        let id = domain.get_uuid_string().map_err(|e| ProviderError::Internal(e.to_string()))?;

        info!(vm_id = %id, "VM defined");
        Ok(CreateResult { id, task: None, pre_existing: false })
    }

    async fn delete(&self, _ctx: &Context, id: &str) -> Result<Option<TaskRef>> {
        let domain = match self.get_domain(id) {
            Ok(d) => d,
            Err(e) if e.kind() == virtrigaud_provider::error::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let (state, _) = domain.get_info().map(|i| (i.state, ())).map_err(|e| ProviderError::Internal(e.to_string()))?;
        if state == sys::VIR_DOMAIN_RUNNING || state == sys::VIR_DOMAIN_PAUSED {
            domain.destroy().map_err(|e| ProviderError::Internal(e.to_string()))?;
        }
        domain.undefine().map_err(|e| ProviderError::Internal(e.to_string()))?;
        self.images.delete_vm_disks(id)?;
        Ok(None)
    }

    async fn power(&self, _ctx: &Context, id: &str, op: PowerOp) -> Result<Option<TaskRef>> {
        let domain = self.get_domain(id)?;
        match op {
            PowerOp::On => domain.create().map_err(|e| ProviderError::Internal(e.to_string()))?,
            PowerOp::Off => domain.destroy().map_err(|e| ProviderError::Internal(e.to_string()))?,
            PowerOp::Reboot => {
                domain.reboot(sys::VIR_DOMAIN_REBOOT_DEFAULT).map_err(|e| ProviderError::Internal(e.to_string()))?
            }
            PowerOp::ShutdownGraceful => domain.shutdown().map_err(|e| ProviderError::Internal(e.to_string()))?,
        };
        Ok(None)
    }

    async fn reconfigure(&self, _ctx: &Context, id: &str, params: ReconfigureParams) -> Result<Option<TaskRef>> {
        if params.is_noop() {
            return Ok(None);
        }
        let domain = self.get_domain(id)?;
        if let Some(vcpus) = params.vcpus {
            domain.set_vcpus(vcpus).map_err(|e| ProviderError::Internal(e.to_string()))?;
        }
        if let Some(mib) = params.memory_mib {
            domain.set_memory(mib * 1024).map_err(|e| ProviderError::Internal(e.to_string()))?;
        }
        Ok(None)
    }

    async fn describe(&self, _ctx: &Context, id: &str) -> Result<DescribeResult> {
        let domain = match self.get_domain(id) {
            Ok(d) => d,
            Err(e) if e.kind() == virtrigaud_provider::error::ErrorKind::NotFound => {
                return Ok(DescribeResult {
                    exists: false,
                    power_state: PowerState::Unknown,
                    ips: vec![],
                    console_url: None,
                    vcpus: 0,
                    memory_mib: 0,
                    raw_details: None,
                })
            }
            Err(e) => return Err(e),
        };

        let info = domain.get_info().map_err(|e| ProviderError::Internal(e.to_string()))?;
        Ok(DescribeResult {
            exists: true,
            power_state: Self::power_state_from_libvirt(info.state),
            ips: vec![],
            console_url: None,
            vcpus: info.nr_virt_cpu,
            memory_mib: info.memory / 1024,
            raw_details: None,
        })
    }

    async fn clone_vm(&self, _ctx: &Context, source_id: &str, target_name: &str, mode: CloneMode) -> Result<CloneResult> {
        if mode == CloneMode::Linked {
            warn!("libvirt back-end has no qcow2-overlay linked clone path yet, falling back to full clone");
        }
        let source = self.get_domain(source_id)?;
        let xml = source.get_xml_desc(0).map_err(|e| ProviderError::Internal(e.to_string()))?;
        let renamed = xml.replacen(&format!("<name>{source_id}</name>"), &format!("<name>{target_name}</name>"), 1);
        let domain = Domain::define_xml(&self.connection, &renamed).map_err(|e| ProviderError::Internal(e.to_string()))?;
        let target_id = domain.get_uuid_string().map_err(|e| ProviderError::Internal(e.to_string()))?;
        Ok(CloneResult { target_id, task: None })
    }

    async fn snapshot_create(&self, _ctx: &Context, id: &str, params: SnapshotParams) -> Result<SnapshotResult> {
        let _ = self.get_domain(id)?;
        let snap_xml = format!("<domainsnapshot><name>{}</name></domainsnapshot>", params.name);
        let output = std::process::Command::new("virsh")
            .args(["snapshot-create", id, "--xmldesc", "/dev/stdin"])
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .and_then(|mut child| {
                use std::io::Write;
                if let Some(stdin) = child.stdin.as_mut() {
                    stdin.write_all(snap_xml.as_bytes())?;
                }
                child.wait_with_output()
            })
            .map_err(|e| ProviderError::Internal(format!("virsh spawn failed: {e}")))?;

        if !output.status.success() {
            return Err(ProviderError::Internal(format!("virsh snapshot-create failed: {}", String::from_utf8_lossy(&output.stderr))));
        }
        Ok(SnapshotResult { snapshot_id: params.name, task: None })
    }

    async fn snapshot_delete(&self, _ctx: &Context, id: &str, snapshot_id: &str) -> Result<Option<TaskRef>> {
        let output = std::process::Command::new("virsh")
            .args(["snapshot-delete", id, snapshot_id])
            .output()
            .map_err(|e| ProviderError::Internal(format!("virsh spawn failed: {e}")))?;
        if !output.status.success() {
            return Err(ProviderError::Internal(format!("virsh snapshot-delete failed: {}", String::from_utf8_lossy(&output.stderr))));
        }
        Ok(None)
    }

    async fn snapshot_revert(&self, _ctx: &Context, id: &str, snapshot_id: &str) -> Result<Option<TaskRef>> {
        let output = std::process::Command::new("virsh")
            .args(["snapshot-revert", id, snapshot_id])
            .output()
            .map_err(|e| ProviderError::Internal(format!("virsh spawn failed: {e}")))?;
        if !output.status.success() {
            return Err(ProviderError::Internal(format!("virsh snapshot-revert failed: {}", String::from_utf8_lossy(&output.stderr))));
        }
        Ok(None)
    }

    async fn export_disk(&self, _ctx: &Context, params: ExportParams) -> Result<ExportResult> {
        let src = self.images.disk_path(&params.vm_id, "root");
        let dst = std::path::PathBuf::from(&params.destination_url);
        let format = params.format.clone();
        let images = self.images.clone();

        let task = self.tasks.spawn(move || images.convert_disk(&src, &dst, &format)).await;
        Ok(ExportResult { export_id: task.0.clone(), task: Some(task), estimated_size_bytes: 0, checksum: None })
    }

    async fn import_disk(&self, _ctx: &Context, params: ImportParams) -> Result<ImportResult> {
        let src = std::path::PathBuf::from(&params.source_url);
        let dst = self.images.disk_path(&params.target_name, "root");
        let format = params.format.clone();
        let images = self.images.clone();
        let dst_for_result = dst.clone();

        let task = self.tasks.spawn(move || images.convert_disk(&src, &dst, &format)).await;
        Ok(ImportResult {
            disk_id: format!("{}/root", params.target_name),
            path: dst_for_result.to_string_lossy().to_string(),
            task: Some(task),
            size_bytes: 0,
            checksum: String::new(),
        })
    }

    async fn get_disk_info(&self, _ctx: &Context, vm_id: &str, disk_id: &str) -> Result<DiskInfo> {
        let path = self.images.disk_path(vm_id, disk_id);
        self.images.get_disk_info(&path)
    }

    async fn list_vms(&self, _ctx: &Context) -> Result<Vec<VmSummary>> {
        let flags = sys::VIR_CONNECT_LIST_DOMAINS_ACTIVE | sys::VIR_CONNECT_LIST_DOMAINS_INACTIVE;
        let domains = self.connection.list_all_domains(flags).map_err(|e| ProviderError::Internal(e.to_string()))?;

        let mut vms = Vec::with_capacity(domains.len());
        for domain in domains {
            let id = domain.get_uuid_string().map_err(|e| ProviderError::Internal(e.to_string()))?;
            let name = domain.get_name().map_err(|e| ProviderError::Internal(e.to_string()))?;
            let info = domain.get_info().map_err(|e| ProviderError::Internal(e.to_string()))?;

            vms.push(VmSummary {
                id,
                name,
                power_state: Self::power_state_from_libvirt(info.state),
                ips: vec![],
                vcpus: info.nr_virt_cpu,
                memory_mib: info.memory / 1024,
                disks: vec![],
                networks: vec![],
            });
        }
        debug!(count = vms.len(), "listed VMs");
        Ok(vms)
    }

    async fn task_status(&self, _ctx: &Context, task: &TaskRef) -> Result<TaskStatusResult> {
        self.tasks.status(task).await
    }

    async fn get_capabilities(&self, _ctx: &Context) -> Result<CapabilitySet> {
        let version = self.connection.get_lib_version().map_err(|e| ProviderError::Internal(e.to_string()))?;
        let (major, minor, micro) = ((version / 1_000_000) as u32, ((version / 1000) % 1000) as u32, (version % 1000) as u32);
        debug!(version = format!("{major}.{minor}.{micro}"), "libvirt version");

        Ok(CapabilitySet {
            flags: [capability::CORE, capability::SNAPSHOTS, capability::ONLINE_RECONFIGURE, capability::TASK_STATUS]
                .into_iter()
                .map(String::from)
                .collect(),
            disk_formats: vec!["qcow2".into(), "raw".into()],
            network_types: vec!["bridge".into()],
        })
    }
}
