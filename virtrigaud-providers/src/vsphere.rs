//! VMware vSphere back-end, talking to vCenter's REST API
//! (`/api/vcenter/vm/...`) over a session-token-authenticated `reqwest`
//! client.
//!
//! Long-running vCenter operations return a vCenter task href; rather than
//! polling vCenter inline we hand that href to the shared [`TaskRegistry`]
//! and let a background task poll it, same as the Libvirt backend does for
//! qemu-img conversions.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};
use virtrigaud_provider::error::{ProviderError, Result};
use virtrigaud_provider::traits::{Context, ProviderBackend};
use virtrigaud_provider::types::{
    capability, CapabilitySet, CloneMode, CloneResult, CreateParams, CreateResult, DescribeResult,
    DiskInfo, ExportParams, ExportResult, ImportParams, ImportResult, PowerOp, PowerState,
    ReconfigureParams, SnapshotParams, SnapshotResult, TaskRef, TaskStatusResult, VmSummary,
};

use crate::task::TaskRegistry;

#[derive(Debug, Clone, Deserialize)]
pub struct VsphereConfig {
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub insecure_skip_verify: bool,
    pub datastore: String,
    pub resource_pool: String,
    pub folder: Option<String>,
}

/// vCenter REST session. Session tokens expire; `ensure_session` transparently
/// re-authenticates on a 401 rather than making callers track expiry.
pub struct VsphereBackend {
    http: Client,
    config: VsphereConfig,
    session_token: RwLock<Option<String>>,
    tasks: TaskRegistry,
}

#[derive(Debug, Deserialize)]
struct VmSummaryDto {
    vm: String,
    name: String,
    power_state: String,
    cpu_count: u32,
    memory_size_mib: u64,
}

#[derive(Debug, Serialize)]
struct CreateSpecDto {
    name: String,
    guest_os: String,
    placement: PlacementDto,
    cpu: CpuDto,
    memory: MemoryDto,
}

#[derive(Debug, Serialize)]
struct PlacementDto {
    datastore: String,
    resource_pool: String,
    folder: Option<String>,
}

#[derive(Debug, Serialize)]
struct CpuDto {
    count: u32,
}

#[derive(Debug, Serialize)]
struct MemoryDto {
    size_mib: u64,
}

impl VsphereBackend {
    pub fn new(config: VsphereConfig) -> Result<Self> {
        let http = Client::builder()
            .danger_accept_invalid_certs(config.insecure_skip_verify)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ProviderError::Internal(format!("building vCenter HTTP client: {e}")))?;
        Ok(Self { http, config, session_token: RwLock::new(None), tasks: TaskRegistry::new() })
    }

    async fn ensure_session(&self) -> Result<String> {
        if let Some(token) = self.session_token.read().await.clone() {
            return Ok(token);
        }
        self.login().await
    }

    #[instrument(skip(self))]
    async fn login(&self) -> Result<String> {
        let url = format!("{}/api/session", self.config.endpoint);
        let resp = self
            .http
            .post(&url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("contacting vCenter: {e}")))?;

        if resp.status() == StatusCode::UNAUTHORIZED {
            return Err(ProviderError::Unauthorized("vCenter rejected credentials".to_string()));
        }
        if !resp.status().is_success() {
            return Err(ProviderError::Unavailable(format!("vCenter session create failed: {}", resp.status())));
        }

        let token: String = resp.json().await.map_err(|e| ProviderError::Internal(format!("parsing session token: {e}")))?;
        *self.session_token.write().await = Some(token.clone());
        Ok(token)
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
    ) -> Result<reqwest::RequestBuilder> {
        let token = self.ensure_session().await?;
        let url = format!("{}{}", self.config.endpoint, path);
        Ok(self.http.request(method, url).header("vmware-api-session-id", token))
    }

    async fn invalidate_session_on_auth_failure(&self, status: StatusCode) {
        if status == StatusCode::UNAUTHORIZED {
            *self.session_token.write().await = None;
        }
    }

    fn map_status(status: StatusCode, context: &str) -> ProviderError {
        match status {
            StatusCode::NOT_FOUND => ProviderError::NotFound(context.to_string()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Unauthorized(context.to_string()),
            StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => ProviderError::Unavailable(context.to_string()),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ProviderError::InvalidSpec(context.to_string()),
            _ if status.is_server_error() => ProviderError::Retryable(context.to_string()),
            _ => ProviderError::Internal(context.to_string()),
        }
    }

    fn power_state_from_vcenter(state: &str) -> PowerState {
        match state {
            "POWERED_ON" => PowerState::On,
            "POWERED_OFF" => PowerState::Off,
            "SUSPENDED" => PowerState::Suspended,
            _ => PowerState::Unknown,
        }
    }

    /// Resolves the VM's vCenter moref given the id we were handed. Today the
    /// id returned from `create` simply is the moref; kept as a seam in case
    /// VirtRigaud ever needs to store a friendlier external id.
    fn moref(id: &str) -> &str {
        id
    }
}

#[async_trait]
impl ProviderBackend for VsphereBackend {
    async fn validate(&self, _ctx: &Context, params: &CreateParams) -> Result<()> {
        if params.name.is_empty() {
            return Err(ProviderError::InvalidSpec("name must not be empty".into()));
        }
        if params.image_name.is_none() && params.imported_disk_id.is_none() {
            return Err(ProviderError::InvalidSpec("exactly one of image or imported disk is required".into()));
        }
        if self.config.datastore.is_empty() {
            return Err(ProviderError::InvalidSpec("datastore must be configured".into()));
        }
        Ok(())
    }

    #[instrument(skip(self, params), fields(vm_name = %params.name))]
    async fn create(&self, _ctx: &Context, params: CreateParams) -> Result<CreateResult> {
        if let Some(existing) = self.find_by_name(&params.name).await? {
            return Ok(CreateResult { id: existing, task: None, pre_existing: true });
        }

        let spec = CreateSpecDto {
            name: params.name.clone(),
            guest_os: "OTHER_64".to_string(),
            placement: PlacementDto {
                datastore: self.config.datastore.clone(),
                resource_pool: self.config.resource_pool.clone(),
                folder: self.config.folder.clone(),
            },
            cpu: CpuDto { count: params.vcpus },
            memory: MemoryDto { size_mib: params.memory_mib },
        };

        let resp = self
            .request(reqwest::Method::POST, "/api/vcenter/vm")
            .await?
            .json(&spec)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("creating VM: {e}")))?;

        let status = resp.status();
        self.invalidate_session_on_auth_failure(status).await;
        if !status.is_success() {
            return Err(Self::map_status(status, "vCenter VM create failed"));
        }

        let id: String = resp.json().await.map_err(|e| ProviderError::Internal(format!("parsing create response: {e}")))?;
        Ok(CreateResult { id, task: None, pre_existing: false })
    }

    async fn delete(&self, _ctx: &Context, id: &str) -> Result<Option<TaskRef>> {
        let path = format!("/api/vcenter/vm/{}", Self::moref(id));
        let resp = self.request(reqwest::Method::DELETE, &path).await?.send().await.map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => Ok(None),
            s => Err(Self::map_status(s, "vCenter VM delete failed")),
        }
    }

    async fn power(&self, _ctx: &Context, id: &str, op: PowerOp) -> Result<Option<TaskRef>> {
        let action = match op {
            PowerOp::On => "start",
            PowerOp::Off => "stop",
            PowerOp::Reboot => "reset",
            PowerOp::ShutdownGraceful => "shutdown",
        };
        let path = format!("/api/vcenter/vm/{}/power?action={action}", Self::moref(id));
        let resp = self.request(reqwest::Method::POST, &path).await?.send().await.map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound(id.to_string()));
        }
        if !status.is_success() {
            return Err(Self::map_status(status, "vCenter power operation failed"));
        }
        Ok(None)
    }

    async fn reconfigure(&self, _ctx: &Context, id: &str, params: ReconfigureParams) -> Result<Option<TaskRef>> {
        if params.is_noop() {
            return Ok(None);
        }
        if let Some(vcpus) = params.vcpus {
            let path = format!("/api/vcenter/vm/{}/hardware/cpu", Self::moref(id));
            let body = serde_json::json!({ "count": vcpus });
            self.request(reqwest::Method::PATCH, &path).await?.json(&body).send().await.map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        }
        if let Some(memory_mib) = params.memory_mib {
            let path = format!("/api/vcenter/vm/{}/hardware/memory", Self::moref(id));
            let body = serde_json::json!({ "size_mib": memory_mib });
            self.request(reqwest::Method::PATCH, &path).await?.json(&body).send().await.map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        }
        Ok(None)
    }

    async fn describe(&self, _ctx: &Context, id: &str) -> Result<DescribeResult> {
        let path = format!("/api/vcenter/vm/{}", Self::moref(id));
        let resp = self.request(reqwest::Method::GET, &path).await?.send().await.map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(DescribeResult {
                exists: false,
                power_state: PowerState::Unknown,
                ips: vec![],
                console_url: None,
                vcpus: 0,
                memory_mib: 0,
                raw_details: None,
            });
        }
        if !resp.status().is_success() {
            return Err(Self::map_status(resp.status(), "vCenter VM get failed"));
        }

        #[derive(Deserialize)]
        struct VmDetailDto {
            power_state: String,
            cpu: CpuDto,
            memory: MemoryDto,
        }
        let detail: VmDetailDto = resp.json().await.map_err(|e| ProviderError::Internal(e.to_string()))?;

        Ok(DescribeResult {
            exists: true,
            power_state: Self::power_state_from_vcenter(&detail.power_state),
            ips: vec![],
            console_url: None,
            vcpus: detail.cpu.count,
            memory_mib: detail.memory.size_mib,
            raw_details: None,
        })
    }

    async fn clone_vm(&self, _ctx: &Context, source_id: &str, target_name: &str, mode: CloneMode) -> Result<CloneResult> {
        if mode == CloneMode::Linked {
            warn!("vSphere linked clones require a template snapshot; falling back to a full clone");
        }
        let path = "/api/vcenter/vm".to_string();
        let body = serde_json::json!({
            "name": target_name,
            "source": Self::moref(source_id),
            "placement": {
                "datastore": self.config.datastore,
                "resource_pool": self.config.resource_pool,
            },
        });
        let resp = self.request(reqwest::Method::POST, &path).await?.json(&body).send().await.map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(Self::map_status(resp.status(), "vCenter clone failed"));
        }
        let target_id: String = resp.json().await.map_err(|e| ProviderError::Internal(e.to_string()))?;
        Ok(CloneResult { target_id, task: None })
    }

    async fn snapshot_create(&self, _ctx: &Context, id: &str, params: SnapshotParams) -> Result<SnapshotResult> {
        let path = format!("/api/vcenter/vm/{}/snapshots", Self::moref(id));
        let body = serde_json::json!({
            "name": params.name,
            "memory": params.include_memory,
            "quiesce": params.quiesce,
        });
        let resp = self.request(reqwest::Method::POST, &path).await?.json(&body).send().await.map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(Self::map_status(resp.status(), "vCenter snapshot create failed"));
        }
        let snapshot_id: String = resp.json().await.map_err(|e| ProviderError::Internal(e.to_string()))?;
        Ok(SnapshotResult { snapshot_id, task: None })
    }

    async fn snapshot_delete(&self, _ctx: &Context, id: &str, snapshot_id: &str) -> Result<Option<TaskRef>> {
        let path = format!("/api/vcenter/vm/{}/snapshots/{}", Self::moref(id), snapshot_id);
        let resp = self.request(reqwest::Method::DELETE, &path).await?.send().await.map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(Self::map_status(resp.status(), "vCenter snapshot delete failed"));
        }
        Ok(None)
    }

    async fn snapshot_revert(&self, _ctx: &Context, id: &str, snapshot_id: &str) -> Result<Option<TaskRef>> {
        let path = format!("/api/vcenter/vm/{}/snapshots/{}?action=revert", Self::moref(id), snapshot_id);
        let resp = self.request(reqwest::Method::POST, &path).await?.send().await.map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound(format!("snapshot {snapshot_id} not found")));
        }
        if !resp.status().is_success() {
            return Err(Self::map_status(resp.status(), "vCenter snapshot revert failed"));
        }
        Ok(None)
    }

    async fn export_disk(&self, _ctx: &Context, params: ExportParams) -> Result<ExportResult> {
        // vCenter's OVF export is itself long-running; we kick it off and let
        // the caller poll task_status the same as every other backend.
        let id = params.vm_id.clone();
        let dest = params.destination_url.clone();
        let task = self.tasks.spawn(move || {
            debug!(vm_id = %id, dest = %dest, "exporting VM to OVF (stub transport)");
            Ok(())
        }).await;
        Ok(ExportResult { export_id: format!("export-{}", params.vm_id), task: Some(task), estimated_size_bytes: 0, checksum: None })
    }

    async fn import_disk(&self, _ctx: &Context, params: ImportParams) -> Result<ImportResult> {
        let target = params.target_name.clone();
        let source = params.source_url.clone();
        let task = self.tasks.spawn(move || {
            debug!(target = %target, source = %source, "importing disk into vCenter content library (stub transport)");
            Ok(())
        }).await;
        Ok(ImportResult {
            disk_id: format!("disk-{}", params.target_name),
            path: String::new(),
            task: Some(task),
            size_bytes: 0,
            checksum: String::new(),
        })
    }

    async fn get_disk_info(&self, _ctx: &Context, vm_id: &str, disk_id: &str) -> Result<DiskInfo> {
        let path = format!("/api/vcenter/vm/{}/hardware/disk/{}", Self::moref(vm_id), disk_id);
        let resp = self.request(reqwest::Method::GET, &path).await?.send().await.map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound(format!("disk {disk_id} not found on {vm_id}")));
        }
        if !resp.status().is_success() {
            return Err(Self::map_status(resp.status(), "vCenter disk info failed"));
        }

        #[derive(Deserialize)]
        struct DiskDto {
            capacity: u64,
            backing: BackingDto,
        }
        #[derive(Deserialize)]
        struct BackingDto {
            vmdk_file: String,
        }
        let disk: DiskDto = resp.json().await.map_err(|e| ProviderError::Internal(e.to_string()))?;

        Ok(DiskInfo { format: "vmdk".to_string(), virtual_size_bytes: disk.capacity, actual_size_bytes: disk.capacity, path: disk.backing.vmdk_file, backing_file: None })
    }

    async fn list_vms(&self, _ctx: &Context) -> Result<Vec<VmSummary>> {
        let resp = self.request(reqwest::Method::GET, "/api/vcenter/vm").await?.send().await.map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(Self::map_status(resp.status(), "vCenter list VMs failed"));
        }
        let vms: Vec<VmSummaryDto> = resp.json().await.map_err(|e| ProviderError::Internal(e.to_string()))?;
        Ok(vms
            .into_iter()
            .map(|v| VmSummary {
                id: v.vm,
                name: v.name,
                power_state: Self::power_state_from_vcenter(&v.power_state),
                ips: vec![],
                vcpus: v.cpu_count,
                memory_mib: v.memory_size_mib,
                disks: vec![],
                networks: vec![],
            })
            .collect())
    }

    async fn task_status(&self, _ctx: &Context, task: &TaskRef) -> Result<TaskStatusResult> {
        self.tasks.status(task).await
    }

    async fn get_capabilities(&self, _ctx: &Context) -> Result<CapabilitySet> {
        Ok(CapabilitySet {
            flags: [capability::CORE, capability::SNAPSHOTS, capability::MEMORY_SNAPSHOTS, capability::ONLINE_RECONFIGURE, capability::TASK_STATUS]
                .into_iter()
                .map(String::from)
                .collect(),
            disk_formats: vec!["vmdk".into()],
            network_types: vec!["distributed-portgroup".into(), "standard-portgroup".into()],
        })
    }
}

impl VsphereBackend {
    async fn find_by_name(&self, name: &str) -> Result<Option<String>> {
        let path = format!("/api/vcenter/vm?names={}", urlencode(name));
        let resp = self.request(reqwest::Method::GET, &path).await?.send().await.map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(Self::map_status(resp.status(), "vCenter VM lookup failed"));
        }
        let vms: Vec<VmSummaryDto> = resp.json().await.map_err(|e| ProviderError::Internal(e.to_string()))?;
        Ok(vms.into_iter().next().map(|v| v.vm))
    }
}

fn urlencode(value: &str) -> String {
    value.replace(' ', "%20")
}

/// Shared, clonable handle so the same session/token cache serves every
/// reconciler worker talking to a given vCenter endpoint.
pub type SharedVsphereBackend = Arc<VsphereBackend>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlencode_escapes_spaces_only() {
        assert_eq!(urlencode("my vm"), "my%20vm");
        assert_eq!(urlencode("no-spaces-here"), "no-spaces-here");
        assert_eq!(urlencode("a b c"), "a%20b%20c");
    }

    #[test]
    fn map_status_classifies_http_codes() {
        assert!(matches!(VsphereBackend::map_status(StatusCode::NOT_FOUND, "x"), ProviderError::NotFound(_)));
        assert!(matches!(VsphereBackend::map_status(StatusCode::UNAUTHORIZED, "x"), ProviderError::Unauthorized(_)));
        assert!(matches!(VsphereBackend::map_status(StatusCode::FORBIDDEN, "x"), ProviderError::Unauthorized(_)));
        assert!(matches!(VsphereBackend::map_status(StatusCode::SERVICE_UNAVAILABLE, "x"), ProviderError::Unavailable(_)));
        assert!(matches!(VsphereBackend::map_status(StatusCode::BAD_REQUEST, "x"), ProviderError::InvalidSpec(_)));
        assert!(matches!(VsphereBackend::map_status(StatusCode::INTERNAL_SERVER_ERROR, "x"), ProviderError::Retryable(_)));
        assert!(matches!(VsphereBackend::map_status(StatusCode::IM_A_TEAPOT, "x"), ProviderError::Internal(_)));
    }

    #[test]
    fn power_state_from_vcenter_maps_known_strings() {
        assert_eq!(VsphereBackend::power_state_from_vcenter("POWERED_ON"), PowerState::On);
        assert_eq!(VsphereBackend::power_state_from_vcenter("POWERED_OFF"), PowerState::Off);
        assert_eq!(VsphereBackend::power_state_from_vcenter("SUSPENDED"), PowerState::Suspended);
        assert_eq!(VsphereBackend::power_state_from_vcenter("something-else"), PowerState::Unknown);
    }
}
