//! Exposes any [`ProviderBackend`] as a `ProviderService` gRPC server — the
//! southbound half of the remote provider worker process. The control plane
//! talks to whichever backend is configured through this one adapter; the
//! backend itself never knows it's behind gRPC.

use std::sync::Arc;

use tonic::{Request, Response, Status};
use virtrigaud_provider::error::ErrorKind;
use virtrigaud_provider::traits::{Context as ProviderContext, ProviderBackend};
use virtrigaud_provider::types as dto;
use virtrigaud_proto::provider as pb;

pub struct GrpcProviderService {
    backend: Arc<dyn ProviderBackend>,
}

impl GrpcProviderService {
    pub fn new(backend: Arc<dyn ProviderBackend>) -> Self {
        Self { backend }
    }

    pub fn into_server(self) -> pb::ProviderServiceServer<Self> {
        pb::ProviderServiceServer::new(self)
    }
}

fn ctx_from_request<T>(req: &Request<T>) -> ProviderContext {
    let request_id = req
        .metadata()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    ProviderContext::new(request_id)
}

fn provider_err_to_status(err: virtrigaud_provider::error::ProviderError) -> Status {
    let code = match err.kind() {
        ErrorKind::NotFound => tonic::Code::NotFound,
        ErrorKind::InvalidSpec => tonic::Code::InvalidArgument,
        ErrorKind::Unauthorized => tonic::Code::Unauthenticated,
        ErrorKind::Unavailable => tonic::Code::Unavailable,
        ErrorKind::Unimplemented => tonic::Code::Unimplemented,
        ErrorKind::DeadlineExceeded => tonic::Code::DeadlineExceeded,
        ErrorKind::Canceled => tonic::Code::Cancelled,
        ErrorKind::Retryable => tonic::Code::Unavailable,
        ErrorKind::Internal => tonic::Code::Internal,
        ErrorKind::ResourceExhausted => tonic::Code::ResourceExhausted,
        ErrorKind::AlreadyExists => tonic::Code::AlreadyExists,
    };
    Status::new(code, err.to_string())
}

fn task_to_pb(task: Option<dto::TaskRef>) -> Option<pb::TaskRef> {
    task.map(|t| pb::TaskRef { id: t.0 })
}

fn power_state_to_pb(state: dto::PowerState) -> i32 {
    match state {
        dto::PowerState::Unknown => pb::PowerState::Unknown as i32,
        dto::PowerState::On => pb::PowerState::On as i32,
        dto::PowerState::Off => pb::PowerState::Off as i32,
        dto::PowerState::Suspended => pb::PowerState::Suspended as i32,
    }
}

fn power_op_from_pb(op: i32) -> dto::PowerOp {
    match pb::PowerOp::try_from(op).unwrap_or(pb::PowerOp::Unspecified) {
        pb::PowerOp::On => dto::PowerOp::On,
        pb::PowerOp::Off => dto::PowerOp::Off,
        pb::PowerOp::Reboot => dto::PowerOp::Reboot,
        pb::PowerOp::ShutdownGraceful | pb::PowerOp::Unspecified => dto::PowerOp::ShutdownGraceful,
    }
}

fn clone_mode_from_pb(mode: i32) -> dto::CloneMode {
    match pb::CloneMode::try_from(mode).unwrap_or(pb::CloneMode::Full) {
        pb::CloneMode::Linked => dto::CloneMode::Linked,
        pb::CloneMode::Full | pb::CloneMode::Unspecified => dto::CloneMode::Full,
    }
}

fn disk_spec_from_pb(d: pb::DiskSpec) -> dto::DiskSpec {
    dto::DiskSpec { name: d.name, size_gib: d.size_gib, bus: d.bus }
}

fn network_spec_from_pb(n: pb::NetworkSpec) -> dto::NetworkSpec {
    dto::NetworkSpec {
        name: n.name,
        vlan: n.vlan.map(|v| v as u16),
        nic_model: n.nic_model,
        mac_address: n.mac_address,
        static_ip: n.static_ip,
    }
}

fn create_params_from_pb(p: pb::CreateParams) -> dto::CreateParams {
    dto::CreateParams {
        name: p.name,
        vcpus: p.vcpus,
        memory_mib: p.memory_mib,
        image_name: p.image_name,
        imported_disk_id: p.imported_disk_id,
        disks: p.disks.into_iter().map(disk_spec_from_pb).collect(),
        networks: p.networks.into_iter().map(network_spec_from_pb).collect(),
        user_data: p.user_data,
        meta_data: p.meta_data,
        placement_host: p.placement_host,
        tags: p.tags.into_iter().collect(),
    }
}

fn disk_info_to_pb(d: dto::DiskInfo) -> pb::DiskInfo {
    pb::DiskInfo { format: d.format, virtual_size_bytes: d.virtual_size_bytes, actual_size_bytes: d.actual_size_bytes, path: d.path, backing_file: d.backing_file }
}

fn vm_summary_to_pb(v: dto::VmSummary) -> pb::VmSummary {
    pb::VmSummary {
        id: v.id,
        name: v.name,
        power_state: power_state_to_pb(v.power_state),
        ips: v.ips,
        vcpus: v.vcpus,
        memory_mib: v.memory_mib,
        disks: v.disks.into_iter().map(disk_info_to_pb).collect(),
        networks: v.networks,
    }
}

#[tonic::async_trait]
impl pb::ProviderService for GrpcProviderService {
    async fn validate(&self, request: Request<pb::ValidateRequest>) -> Result<Response<pb::ValidateResponse>, Status> {
        let ctx = ctx_from_request(&request);
        let params = create_params_from_pb(request.into_inner().params.unwrap_or_default());
        self.backend.validate(&ctx, &params).await.map_err(provider_err_to_status)?;
        Ok(Response::new(pb::ValidateResponse {}))
    }

    async fn create(&self, request: Request<pb::CreateRequest>) -> Result<Response<pb::CreateResponse>, Status> {
        let ctx = ctx_from_request(&request);
        let params = create_params_from_pb(request.into_inner().params.unwrap_or_default());
        let result = self.backend.create(&ctx, params).await.map_err(provider_err_to_status)?;
        Ok(Response::new(pb::CreateResponse { id: result.id, task: task_to_pb(result.task), pre_existing: result.pre_existing }))
    }

    async fn delete(&self, request: Request<pb::DeleteRequest>) -> Result<Response<pb::DeleteResponse>, Status> {
        let ctx = ctx_from_request(&request);
        let id = request.into_inner().id;
        let task = self.backend.delete(&ctx, &id).await.map_err(provider_err_to_status)?;
        Ok(Response::new(pb::DeleteResponse { task: task_to_pb(task) }))
    }

    async fn power(&self, request: Request<pb::PowerRequest>) -> Result<Response<pb::PowerResponse>, Status> {
        let ctx = ctx_from_request(&request);
        let inner = request.into_inner();
        let op = power_op_from_pb(inner.op);
        let task = self.backend.power(&ctx, &inner.id, op).await.map_err(provider_err_to_status)?;
        Ok(Response::new(pb::PowerResponse { task: task_to_pb(task) }))
    }

    async fn reconfigure(&self, request: Request<pb::ReconfigureRequest>) -> Result<Response<pb::ReconfigureResponse>, Status> {
        let ctx = ctx_from_request(&request);
        let inner = request.into_inner();
        let p = inner.params.unwrap_or_default();
        let params = dto::ReconfigureParams {
            vcpus: p.vcpus,
            memory_mib: p.memory_mib,
            disks: p.disks_set.then(|| p.disks.into_iter().map(disk_spec_from_pb).collect()),
            networks: p.networks_set.then(|| p.networks.into_iter().map(network_spec_from_pb).collect()),
        };
        let task = self.backend.reconfigure(&ctx, &inner.id, params).await.map_err(provider_err_to_status)?;
        Ok(Response::new(pb::ReconfigureResponse { task: task_to_pb(task) }))
    }

    async fn describe(&self, request: Request<pb::DescribeRequest>) -> Result<Response<pb::DescribeResponse>, Status> {
        let ctx = ctx_from_request(&request);
        let id = request.into_inner().id;
        let result = self.backend.describe(&ctx, &id).await.map_err(provider_err_to_status)?;
        Ok(Response::new(pb::DescribeResponse {
            exists: result.exists,
            power_state: power_state_to_pb(result.power_state),
            ips: result.ips,
            console_url: result.console_url,
            vcpus: result.vcpus,
            memory_mib: result.memory_mib,
            raw_details: result.raw_details,
        }))
    }

    async fn clone_vm(&self, request: Request<pb::CloneRequest>) -> Result<Response<pb::CloneResponse>, Status> {
        let ctx = ctx_from_request(&request);
        let inner = request.into_inner();
        let mode = clone_mode_from_pb(inner.mode);
        let result = self.backend.clone_vm(&ctx, &inner.source_id, &inner.target_name, mode).await.map_err(provider_err_to_status)?;
        Ok(Response::new(pb::CloneResponse { target_id: result.target_id, task: task_to_pb(result.task) }))
    }

    async fn snapshot_create(&self, request: Request<pb::SnapshotCreateRequest>) -> Result<Response<pb::SnapshotCreateResponse>, Status> {
        let ctx = ctx_from_request(&request);
        let inner = request.into_inner();
        let p = inner.params.unwrap_or_default();
        let params = dto::SnapshotParams { name: p.name, include_memory: p.include_memory, quiesce: p.quiesce };
        let result = self.backend.snapshot_create(&ctx, &inner.id, params).await.map_err(provider_err_to_status)?;
        Ok(Response::new(pb::SnapshotCreateResponse { snapshot_id: result.snapshot_id, task: task_to_pb(result.task) }))
    }

    async fn snapshot_delete(&self, request: Request<pb::SnapshotDeleteRequest>) -> Result<Response<pb::SnapshotDeleteResponse>, Status> {
        let ctx = ctx_from_request(&request);
        let inner = request.into_inner();
        let task = self.backend.snapshot_delete(&ctx, &inner.id, &inner.snapshot_id).await.map_err(provider_err_to_status)?;
        Ok(Response::new(pb::SnapshotDeleteResponse { task: task_to_pb(task) }))
    }

    async fn snapshot_revert(&self, request: Request<pb::SnapshotRevertRequest>) -> Result<Response<pb::SnapshotRevertResponse>, Status> {
        let ctx = ctx_from_request(&request);
        let inner = request.into_inner();
        let task = self.backend.snapshot_revert(&ctx, &inner.id, &inner.snapshot_id).await.map_err(provider_err_to_status)?;
        Ok(Response::new(pb::SnapshotRevertResponse { task: task_to_pb(task) }))
    }

    async fn export_disk(&self, request: Request<pb::ExportDiskRequest>) -> Result<Response<pb::ExportDiskResponse>, Status> {
        let ctx = ctx_from_request(&request);
        let inner = request.into_inner();
        let params = dto::ExportParams {
            vm_id: inner.vm_id,
            snapshot_id: inner.snapshot_id,
            destination_url: inner.destination_url,
            format: inner.format,
            compress: inner.compress,
        };
        let result = self.backend.export_disk(&ctx, params).await.map_err(provider_err_to_status)?;
        Ok(Response::new(pb::ExportDiskResponse {
            export_id: result.export_id,
            task: task_to_pb(result.task),
            estimated_size_bytes: result.estimated_size_bytes,
            checksum: result.checksum,
        }))
    }

    async fn import_disk(&self, request: Request<pb::ImportDiskRequest>) -> Result<Response<pb::ImportDiskResponse>, Status> {
        let ctx = ctx_from_request(&request);
        let inner = request.into_inner();
        let params = dto::ImportParams {
            source_url: inner.source_url,
            storage_hint: inner.storage_hint,
            format: inner.format,
            target_name: inner.target_name,
            expected_checksum: inner.expected_checksum,
        };
        let result = self.backend.import_disk(&ctx, params).await.map_err(provider_err_to_status)?;
        Ok(Response::new(pb::ImportDiskResponse {
            disk_id: result.disk_id,
            path: result.path,
            task: task_to_pb(result.task),
            size_bytes: result.size_bytes,
            checksum: result.checksum,
        }))
    }

    async fn get_disk_info(&self, request: Request<pb::GetDiskInfoRequest>) -> Result<Response<pb::GetDiskInfoResponse>, Status> {
        let ctx = ctx_from_request(&request);
        let inner = request.into_inner();
        let info = self.backend.get_disk_info(&ctx, &inner.vm_id, &inner.disk_id).await.map_err(provider_err_to_status)?;
        Ok(Response::new(pb::GetDiskInfoResponse { info: Some(disk_info_to_pb(info)) }))
    }

    async fn list_vms(&self, request: Request<pb::ListVmsRequest>) -> Result<Response<pb::ListVmsResponse>, Status> {
        let ctx = ctx_from_request(&request);
        let vms = self.backend.list_vms(&ctx).await.map_err(provider_err_to_status)?;
        Ok(Response::new(pb::ListVmsResponse { vms: vms.into_iter().map(vm_summary_to_pb).collect() }))
    }

    async fn task_status(&self, request: Request<pb::TaskStatusRequest>) -> Result<Response<pb::TaskStatusResponse>, Status> {
        let ctx = ctx_from_request(&request);
        let task_id = request.into_inner().task.map(|t| t.id).unwrap_or_default();
        let status = self.backend.task_status(&ctx, &dto::TaskRef(task_id)).await.map_err(provider_err_to_status)?;
        Ok(Response::new(pb::TaskStatusResponse { done: status.done, error: status.error, progress_percent: status.progress_percent }))
    }

    async fn get_capabilities(&self, request: Request<pb::GetCapabilitiesRequest>) -> Result<Response<pb::GetCapabilitiesResponse>, Status> {
        let ctx = ctx_from_request(&request);
        let caps = self.backend.get_capabilities(&ctx).await.map_err(provider_err_to_status)?;
        Ok(Response::new(pb::GetCapabilitiesResponse {
            flags: caps.flags.into_iter().collect(),
            disk_formats: caps.disk_formats,
            network_types: caps.network_types,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use virtrigaud_provider::error::ProviderError;

    #[test]
    fn provider_err_to_status_maps_every_kind() {
        use ProviderError::*;
        let cases = [
            (NotFound("x".into()), tonic::Code::NotFound),
            (InvalidSpec("x".into()), tonic::Code::InvalidArgument),
            (Unauthorized("x".into()), tonic::Code::Unauthenticated),
            (Unavailable("x".into()), tonic::Code::Unavailable),
            (Unimplemented("x".into()), tonic::Code::Unimplemented),
            (DeadlineExceeded("x".into()), tonic::Code::DeadlineExceeded),
            (Canceled("x".into()), tonic::Code::Cancelled),
            (Retryable("x".into()), tonic::Code::Unavailable),
            (Internal("x".into()), tonic::Code::Internal),
            (ResourceExhausted("x".into()), tonic::Code::ResourceExhausted),
            (AlreadyExists("x".into()), tonic::Code::AlreadyExists),
        ];
        for (err, expected) in cases {
            assert_eq!(provider_err_to_status(err).code(), expected);
        }
    }

    #[test]
    fn power_state_round_trips_through_pb_representation() {
        for state in [dto::PowerState::On, dto::PowerState::Off, dto::PowerState::Suspended, dto::PowerState::Unknown] {
            let pb_value = power_state_to_pb(state);
            assert!(pb::PowerState::try_from(pb_value).is_ok());
        }
    }

    #[test]
    fn power_op_from_pb_defaults_unspecified_to_graceful_shutdown() {
        assert_eq!(power_op_from_pb(pb::PowerOp::Unspecified as i32), dto::PowerOp::ShutdownGraceful);
        assert_eq!(power_op_from_pb(999), dto::PowerOp::ShutdownGraceful);
        assert_eq!(power_op_from_pb(pb::PowerOp::On as i32), dto::PowerOp::On);
    }
}
