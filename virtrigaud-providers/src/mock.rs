//! In-memory mock back-end for tests and `virtrigaud-runtime --dev`.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::{debug, info, instrument};
use virtrigaud_provider::error::{ProviderError, Result};
use virtrigaud_provider::traits::{Context, ProviderBackend};
use virtrigaud_provider::types::{
    capability, CapabilitySet, CloneMode, CloneResult, CreateParams, CreateResult, DescribeResult,
    DiskInfo, ExportParams, ExportResult, ImportParams, ImportResult, PowerOp, PowerState,
    ReconfigureParams, SnapshotParams, SnapshotResult, TaskRef, TaskStatusResult, VmSummary,
};

use crate::task::TaskRegistry;

struct MockVm {
    name: String,
    vcpus: u32,
    memory_mib: u64,
    power_state: PowerState,
    snapshots: Vec<String>,
}

pub struct MockBackend {
    vms: RwLock<HashMap<String, MockVm>>,
    tasks: TaskRegistry,
}

impl MockBackend {
    pub fn new() -> Self {
        info!("creating mock provider back-end");
        Self { vms: RwLock::new(HashMap::new()), tasks: TaskRegistry::new() }
    }

    fn lock_read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, MockVm>>> {
        self.vms.read().map_err(|_| ProviderError::Internal("lock poisoned".to_string()))
    }

    fn lock_write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, MockVm>>> {
        self.vms.write().map_err(|_| ProviderError::Internal("lock poisoned".to_string()))
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderBackend for MockBackend {
    async fn validate(&self, _ctx: &Context, params: &CreateParams) -> Result<()> {
        if params.name.is_empty() {
            return Err(ProviderError::InvalidSpec("name must not be empty".into()));
        }
        if params.image_name.is_none() && params.imported_disk_id.is_none() {
            return Err(ProviderError::InvalidSpec("exactly one of image or imported disk is required".into()));
        }
        Ok(())
    }

    #[instrument(skip(self, params), fields(vm_name = %params.name))]
    async fn create(&self, _ctx: &Context, params: CreateParams) -> Result<CreateResult> {
        let mut vms = self.lock_write()?;
        if let Some((id, _)) = vms.iter().find(|(_, vm)| vm.name == params.name) {
            return Ok(CreateResult { id: id.clone(), task: None, pre_existing: true });
        }

        let id = uuid::Uuid::new_v4().to_string();
        vms.insert(
            id.clone(),
            MockVm {
                name: params.name,
                vcpus: params.vcpus,
                memory_mib: params.memory_mib,
                power_state: PowerState::Off,
                snapshots: Vec::new(),
            },
        );
        info!(vm_id = %id, "mock VM created");
        Ok(CreateResult { id, task: None, pre_existing: false })
    }

    async fn delete(&self, _ctx: &Context, id: &str) -> Result<Option<TaskRef>> {
        let mut vms = self.lock_write()?;
        vms.remove(id);
        Ok(None)
    }

    async fn power(&self, _ctx: &Context, id: &str, op: PowerOp) -> Result<Option<TaskRef>> {
        let mut vms = self.lock_write()?;
        let vm = vms.get_mut(id).ok_or_else(|| ProviderError::NotFound(id.to_string()))?;
        vm.power_state = match op {
            PowerOp::On => PowerState::On,
            PowerOp::Off | PowerOp::ShutdownGraceful => PowerState::Off,
            PowerOp::Reboot => PowerState::On,
        };
        Ok(None)
    }

    async fn reconfigure(&self, _ctx: &Context, id: &str, params: ReconfigureParams) -> Result<Option<TaskRef>> {
        if params.is_noop() {
            return Ok(None);
        }
        let mut vms = self.lock_write()?;
        let vm = vms.get_mut(id).ok_or_else(|| ProviderError::NotFound(id.to_string()))?;
        if let Some(v) = params.vcpus {
            vm.vcpus = v;
        }
        if let Some(m) = params.memory_mib {
            vm.memory_mib = m;
        }
        Ok(None)
    }

    async fn describe(&self, _ctx: &Context, id: &str) -> Result<DescribeResult> {
        let vms = self.lock_read()?;
        match vms.get(id) {
            Some(vm) => Ok(DescribeResult {
                exists: true,
                power_state: vm.power_state,
                ips: if vm.power_state == PowerState::On { vec!["192.0.2.10".to_string()] } else { vec![] },
                console_url: None,
                vcpus: vm.vcpus,
                memory_mib: vm.memory_mib,
                raw_details: None,
            }),
            None => Ok(DescribeResult {
                exists: false,
                power_state: PowerState::Unknown,
                ips: vec![],
                console_url: None,
                vcpus: 0,
                memory_mib: 0,
                raw_details: None,
            }),
        }
    }

    async fn clone_vm(&self, _ctx: &Context, source_id: &str, target_name: &str, _mode: CloneMode) -> Result<CloneResult> {
        let mut vms = self.lock_write()?;
        let source = vms.get(source_id).ok_or_else(|| ProviderError::NotFound(source_id.to_string()))?;
        let clone = MockVm {
            name: target_name.to_string(),
            vcpus: source.vcpus,
            memory_mib: source.memory_mib,
            power_state: PowerState::Off,
            snapshots: Vec::new(),
        };
        let target_id = uuid::Uuid::new_v4().to_string();
        vms.insert(target_id.clone(), clone);
        Ok(CloneResult { target_id, task: None })
    }

    async fn snapshot_create(&self, _ctx: &Context, id: &str, params: SnapshotParams) -> Result<SnapshotResult> {
        let mut vms = self.lock_write()?;
        let vm = vms.get_mut(id).ok_or_else(|| ProviderError::NotFound(id.to_string()))?;
        vm.snapshots.push(params.name.clone());
        Ok(SnapshotResult { snapshot_id: params.name, task: None })
    }

    async fn snapshot_delete(&self, _ctx: &Context, id: &str, snapshot_id: &str) -> Result<Option<TaskRef>> {
        let mut vms = self.lock_write()?;
        let vm = vms.get_mut(id).ok_or_else(|| ProviderError::NotFound(id.to_string()))?;
        vm.snapshots.retain(|s| s != snapshot_id);
        Ok(None)
    }

    async fn snapshot_revert(&self, _ctx: &Context, id: &str, snapshot_id: &str) -> Result<Option<TaskRef>> {
        let vms = self.lock_read()?;
        let vm = vms.get(id).ok_or_else(|| ProviderError::NotFound(id.to_string()))?;
        if !vm.snapshots.iter().any(|s| s == snapshot_id) {
            return Err(ProviderError::NotFound(format!("snapshot {snapshot_id} not found")));
        }
        Ok(None)
    }

    async fn export_disk(&self, _ctx: &Context, params: ExportParams) -> Result<ExportResult> {
        let task = self.tasks.spawn(|| Ok(())).await;
        Ok(ExportResult {
            export_id: format!("export-{}", params.vm_id),
            task: Some(task),
            estimated_size_bytes: 10 * 1024 * 1024 * 1024,
            checksum: Some("deadbeef".to_string()),
        })
    }

    async fn import_disk(&self, _ctx: &Context, params: ImportParams) -> Result<ImportResult> {
        let task = self.tasks.spawn(|| Ok(())).await;
        Ok(ImportResult {
            disk_id: format!("disk-{}", params.target_name),
            path: format!("/var/lib/virtrigaud/images/{}/root.qcow2", params.target_name),
            task: Some(task),
            size_bytes: 10 * 1024 * 1024 * 1024,
            checksum: "deadbeef".to_string(),
        })
    }

    async fn get_disk_info(&self, _ctx: &Context, vm_id: &str, disk_id: &str) -> Result<DiskInfo> {
        Ok(DiskInfo {
            format: "qcow2".to_string(),
            virtual_size_bytes: 20 * 1024 * 1024 * 1024,
            actual_size_bytes: 4 * 1024 * 1024 * 1024,
            path: format!("/var/lib/virtrigaud/images/{vm_id}/{disk_id}.qcow2"),
            backing_file: None,
        })
    }

    async fn list_vms(&self, _ctx: &Context) -> Result<Vec<VmSummary>> {
        let vms = self.lock_read()?;
        let result = vms
            .iter()
            .map(|(id, vm)| VmSummary {
                id: id.clone(),
                name: vm.name.clone(),
                power_state: vm.power_state,
                ips: vec![],
                vcpus: vm.vcpus,
                memory_mib: vm.memory_mib,
                disks: vec![],
                networks: vec![],
            })
            .collect::<Vec<_>>();
        debug!(count = result.len(), "listed mock VMs");
        Ok(result)
    }

    async fn task_status(&self, _ctx: &Context, task: &TaskRef) -> Result<TaskStatusResult> {
        self.tasks.status(task).await
    }

    async fn get_capabilities(&self, _ctx: &Context) -> Result<CapabilitySet> {
        Ok(CapabilitySet {
            flags: [
                capability::CORE,
                capability::SNAPSHOTS,
                capability::LINKED_CLONES,
                capability::ONLINE_RECONFIGURE,
                capability::ONLINE_DISK_EXPANSION,
                capability::IMAGE_IMPORT,
                capability::TASK_STATUS,
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            disk_formats: vec!["qcow2".into(), "raw".into()],
            network_types: vec!["bridge".into()],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Context {
        Context::new("test")
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let backend = MockBackend::new();
        let params = CreateParams { name: "vm-1".into(), vcpus: 2, memory_mib: 2048, image_name: Some("ubuntu".into()), ..Default::default() };

        let first = backend.create(&ctx(), params.clone()).await.unwrap();
        assert!(!first.pre_existing);

        let second = backend.create(&ctx(), params).await.unwrap();
        assert!(second.pre_existing);
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn lifecycle() {
        let backend = MockBackend::new();
        let params = CreateParams { name: "lifecycle".into(), vcpus: 1, memory_mib: 512, image_name: Some("alpine".into()), ..Default::default() };
        let created = backend.create(&ctx(), params).await.unwrap();

        backend.power(&ctx(), &created.id, PowerOp::On).await.unwrap();
        let described = backend.describe(&ctx(), &created.id).await.unwrap();
        assert_eq!(described.power_state, PowerState::On);

        backend.delete(&ctx(), &created.id).await.unwrap();
        let described = backend.describe(&ctx(), &created.id).await.unwrap();
        assert!(!described.exists);
    }

    #[tokio::test]
    async fn snapshot_revert_unknown_errors() {
        let backend = MockBackend::new();
        let params = CreateParams { name: "snap".into(), vcpus: 1, memory_mib: 256, image_name: Some("img".into()), ..Default::default() };
        let created = backend.create(&ctx(), params).await.unwrap();

        let err = backend.snapshot_revert(&ctx(), &created.id, "missing").await.unwrap_err();
        assert_eq!(err.kind(), virtrigaud_provider::error::ErrorKind::NotFound);
    }
}
