//! Migration reconciler: a resumable state machine moving a VM's disk
//! across providers (spec.md §4.5).

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use tracing::warn;

use virtrigaud_proto::provider::{
    ExportDiskRequest, GetCapabilitiesRequest, ImportDiskRequest, SnapshotCreateRequest,
    SnapshotParams, TaskStatusRequest,
};
use virtrigaud_types::common::{annotations, LocalObjectRef, MIGRATION_STORAGE_COMPONENT};
use virtrigaud_types::condition::{condition_types, reasons, set_condition, ConditionStatus};
use virtrigaud_types::migration::{weighted_progress, MigrationPhase, VMMigration};
use virtrigaud_types::provider::Provider;
use virtrigaud_types::vm::{ImportedDiskRef, VirtualMachine, VirtualMachineSpec};

use crate::error::{Error, Result};
use crate::metrics;
use crate::reconcilers::{backoff_duration, Ctx};

const MAX_RETRIES: u32 = 5;
const POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_PVC_SIZE: &str = "20Gi";

pub async fn reconcile(migration: std::sync::Arc<VMMigration>, ctx: std::sync::Arc<Ctx>) -> Result<Action> {
    let start = std::time::Instant::now();
    let namespace = migration
        .namespace()
        .ok_or_else(|| Error::InvalidSpec("VMMigration must be namespaced".to_string()))?;
    let api: Api<VMMigration> = Api::namespaced(ctx.client.clone(), &namespace);

    let result = run(&migration, &namespace, &api, &ctx).await;

    let outcome = match &result {
        Ok(_) => "success",
        Err(e) if !e.is_retryable() => "terminal",
        Err(_) => "error",
    };
    metrics::observe_reconcile("VMMigration", outcome, start.elapsed().as_secs_f64());
    result
}

pub fn on_error(_migration: std::sync::Arc<VMMigration>, error: &Error, _ctx: std::sync::Arc<Ctx>) -> Action {
    warn!(error = %error, "VMMigration reconcile failed");
    metrics::record_error("reconcile_error", "migration");
    Action::requeue(backoff_duration(0))
}

async fn run(
    migration: &VMMigration,
    namespace: &str,
    api: &Api<VMMigration>,
    ctx: &Ctx,
) -> Result<Action> {
    let name = migration.name_any();
    let mut status = migration.status.clone().unwrap_or_default();
    status.observed_generation = migration.metadata.generation.unwrap_or(0);

    if status.phase == MigrationPhase::Ready || status.phase == MigrationPhase::Failed {
        return Ok(Action::await_change());
    }

    let vm_api: Api<VirtualMachine> = Api::namespaced(ctx.client.clone(), namespace);
    let source_vm = match vm_api.get_opt(&migration.spec.source_vm_ref.name).await? {
        Some(vm) => vm,
        None => return fail(api, &name, status, "source VirtualMachine not found").await,
    };

    let provider_api: Api<Provider> = Api::namespaced(ctx.client.clone(), namespace);
    let source_provider = match provider_api.get_opt(&source_vm.spec.provider_ref.name).await? {
        Some(p) => p,
        None => return fail(api, &name, status, "source Provider not found").await,
    };
    let target_provider = match provider_api
        .get_opt(&migration.spec.target_provider_ref.name)
        .await?
    {
        Some(p) => p,
        None => return fail(api, &name, status, "target Provider not found").await,
    };

    let step = match status.phase {
        MigrationPhase::Pending => {
            status.phase = MigrationPhase::Validating;
            Ok(Duration::ZERO)
        }
        MigrationPhase::Validating => {
            step_validating(ctx, namespace, &source_vm, &target_provider, &mut status).await
        }
        MigrationPhase::Snapshotting => {
            step_snapshotting(ctx, &source_vm, &source_provider, &mut status).await
        }
        MigrationPhase::Exporting => {
            step_exporting(ctx, &source_vm, &source_provider, &mut status).await
        }
        MigrationPhase::Transferring => {
            step_transferring(ctx, &source_provider, &mut status).await
        }
        MigrationPhase::Converting => {
            status.phase = MigrationPhase::Importing;
            Ok(Duration::ZERO)
        }
        MigrationPhase::Importing => {
            step_importing(ctx, migration, &target_provider, &mut status).await
        }
        MigrationPhase::Creating => {
            step_creating(ctx, namespace, migration, &source_vm, &mut status).await
        }
        MigrationPhase::ValidatingTarget => step_validating_target(ctx, namespace, &mut status).await,
        MigrationPhase::Ready | MigrationPhase::Failed => Ok(Duration::ZERO),
    };

    let requeue = match step {
        Ok(d) => d,
        Err(e) => {
            status.retry_count += 1;
            warn!(error = %e, phase = ?status.phase, retry = status.retry_count, "migration step failed");
            if status.retry_count > MAX_RETRIES {
                status.phase = MigrationPhase::Failed;
                set_condition(
                    &mut status.conditions,
                    condition_types::READY,
                    ConditionStatus::False,
                    reasons::RETRIES_EXHAUSTED,
                    e.to_string(),
                    status.observed_generation,
                );
                write_status(api, &name, status).await?;
                return Ok(Action::await_change());
            }
            write_status(api, &name, status).await?;
            return Ok(Action::requeue(backoff_duration(status.retry_count)));
        }
    };

    if status.phase == MigrationPhase::Ready {
        finish(ctx, namespace, migration, &mut status).await;
    }

    write_status(api, &name, status).await?;
    Ok(Action::requeue(requeue))
}

async fn step_validating(
    ctx: &Ctx,
    namespace: &str,
    _source_vm: &VirtualMachine,
    target_provider: &Provider,
    status: &mut virtrigaud_types::migration::VMMigrationStatus,
) -> Result<Duration> {
    let mut stub = ctx.resolver.resolve(target_provider).await?;
    let caps = stub
        .get_capabilities(tonic::Request::new(GetCapabilitiesRequest {}))
        .await?
        .into_inner();
    if !caps.flags.iter().any(|f| f == "image-import") {
        return Err(Error::CapabilityMissing(
            "target provider does not support image-import".to_string(),
        ));
    }

    let pvc_name = ensure_intermediate_pvc(ctx, namespace, status).await?;
    status.intermediate_pvc_name = Some(pvc_name);
    status.phase = MigrationPhase::Snapshotting;
    Ok(Duration::ZERO)
}

async fn ensure_intermediate_pvc(
    ctx: &Ctx,
    namespace: &str,
    status: &virtrigaud_types::migration::VMMigrationStatus,
) -> Result<String> {
    if let Some(existing) = &status.intermediate_pvc_name {
        return Ok(existing.clone());
    }
    let pvc_api: Api<PersistentVolumeClaim> = Api::namespaced(ctx.client.clone(), namespace);
    let name = format!("migration-storage-{}", uuid::Uuid::new_v4());

    let mut labels = BTreeMap::new();
    labels.insert(
        annotations::COMPONENT.to_string(),
        MIGRATION_STORAGE_COMPONENT.to_string(),
    );
    let mut requests = BTreeMap::new();
    requests.insert("storage".to_string(), Quantity(DEFAULT_PVC_SIZE.to_string()));

    let pvc = PersistentVolumeClaim {
        metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteMany".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(requests),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    };
    match pvc_api.create(&PostParams::default(), &pvc).await {
        Ok(_) => {}
        Err(kube::Error::Api(e)) if e.code == 409 => {}
        Err(e) => return Err(e.into()),
    }
    Ok(name)
}

async fn step_snapshotting(
    ctx: &Ctx,
    source_vm: &VirtualMachine,
    source_provider: &Provider,
    status: &mut virtrigaud_types::migration::VMMigrationStatus,
) -> Result<Duration> {
    let vm_id = source_vm
        .status
        .as_ref()
        .and_then(|s| s.id.clone())
        .ok_or_else(|| Error::InvalidSpec("source VM has no provider id yet".to_string()))?;

    let already_off = source_vm
        .status
        .as_ref()
        .map(|s| s.power_state == virtrigaud_types::common::PowerState::Off)
        .unwrap_or(false);

    if already_off {
        status.phase = MigrationPhase::Exporting;
        return Ok(Duration::ZERO);
    }

    let mut stub = ctx.resolver.resolve(source_provider).await?;
    let resp = stub
        .snapshot_create(tonic::Request::new(SnapshotCreateRequest {
            id: vm_id,
            params: Some(SnapshotParams {
                name: format!("migration-{}", uuid::Uuid::new_v4()),
                include_memory: false,
                quiesce: true,
            }),
        }))
        .await?
        .into_inner();

    status.snapshot_id = Some(resp.snapshot_id);
    status.phase = MigrationPhase::Exporting;
    Ok(Duration::ZERO)
}

async fn step_exporting(
    ctx: &Ctx,
    source_vm: &VirtualMachine,
    source_provider: &Provider,
    status: &mut virtrigaud_types::migration::VMMigrationStatus,
) -> Result<Duration> {
    let vm_id = source_vm
        .status
        .as_ref()
        .and_then(|s| s.id.clone())
        .ok_or_else(|| Error::InvalidSpec("source VM has no provider id".to_string()))?;
    let pvc_name = status
        .intermediate_pvc_name
        .clone()
        .ok_or_else(|| Error::Other("missing intermediate pvc".to_string()))?;

    let mut stub = ctx.resolver.resolve(source_provider).await?;
    let destination = format!("/mnt/migration-storage/{pvc_name}/disk.img");
    let resp = stub
        .export_disk(tonic::Request::new(ExportDiskRequest {
            vm_id,
            snapshot_id: status.snapshot_id.clone(),
            destination_url: destination.clone(),
            format: "qcow2".to_string(),
            compress: false,
        }))
        .await?
        .into_inner();

    status.exported_disk_path = Some(destination);
    status.disk_size_bytes = Some(resp.estimated_size_bytes);
    status.source_checksum = resp.checksum;
    status.export_task_ref = resp.task.map(|t| t.id);
    status.phase = MigrationPhase::Transferring;
    Ok(Duration::ZERO)
}

async fn step_transferring(
    ctx: &Ctx,
    source_provider: &Provider,
    status: &mut virtrigaud_types::migration::VMMigrationStatus,
) -> Result<Duration> {
    let Some(task_id) = status.export_task_ref.clone() else {
        status.phase = MigrationPhase::Converting;
        return Ok(Duration::ZERO);
    };
    let mut stub = ctx.resolver.resolve(source_provider).await?;
    let resp = stub
        .task_status(tonic::Request::new(TaskStatusRequest {
            task: Some(virtrigaud_proto::provider::TaskRef { id: task_id }),
        }))
        .await?
        .into_inner();

    if let Some(err) = resp.error {
        return Err(Error::Other(format!("export task failed: {err}")));
    }
    status.progress.percentage = weighted_progress(status.phase, resp.progress_percent);
    if resp.done {
        status.phase = MigrationPhase::Converting;
        Ok(Duration::ZERO)
    } else {
        Ok(POLL_INTERVAL)
    }
}

async fn step_importing(
    ctx: &Ctx,
    migration: &VMMigration,
    target_provider: &Provider,
    status: &mut virtrigaud_types::migration::VMMigrationStatus,
) -> Result<Duration> {
    let source_path = status
        .exported_disk_path
        .clone()
        .ok_or_else(|| Error::Other("missing exported disk path".to_string()))?;

    let mut stub = ctx.resolver.resolve(target_provider).await?;
    let resp = stub
        .import_disk(tonic::Request::new(ImportDiskRequest {
            source_url: source_path,
            storage_hint: migration.spec.policy.intermediate_storage_hint.clone(),
            format: "qcow2".to_string(),
            target_name: format!("{}-import", migration.name_any()),
            expected_checksum: status.source_checksum.clone(),
        }))
        .await?
        .into_inner();

    status.imported_disk_id = Some(resp.disk_id);
    status.target_checksum = Some(resp.checksum);
    status.phase = MigrationPhase::Creating;
    Ok(Duration::ZERO)
}

async fn step_creating(
    ctx: &Ctx,
    namespace: &str,
    migration: &VMMigration,
    source_vm: &VirtualMachine,
    status: &mut virtrigaud_types::migration::VMMigrationStatus,
) -> Result<Duration> {
    let disk_id = status
        .imported_disk_id
        .clone()
        .ok_or_else(|| Error::Other("missing imported disk id".to_string()))?;
    let target_vm_name = format!("{}-target", migration.name_any());

    let vm_api: Api<VirtualMachine> = Api::namespaced(ctx.client.clone(), namespace);
    if vm_api.get_opt(&target_vm_name).await?.is_none() {
        let spec = VirtualMachineSpec {
            provider_ref: migration.spec.target_provider_ref.clone(),
            class_ref: source_vm.spec.class_ref.clone(),
            image_ref: None,
            imported_disk: Some(ImportedDiskRef {
                disk_id: disk_id.clone(),
                format: "qcow2".to_string(),
                source: "migration".to_string(),
                migration_ref: Some(LocalObjectRef { name: migration.name_any() }),
            }),
            disks: Vec::new(),
            networks: source_vm.spec.networks.clone(),
            user_data: source_vm.spec.user_data.clone(),
            meta_data: source_vm.spec.meta_data.clone(),
            power_state: source_vm.spec.power_state,
            tags: source_vm.spec.tags.clone(),
            placement: None,
        };
        let mut target_vm = VirtualMachine::new(&target_vm_name, spec);
        let annot = target_vm.annotations_mut();
        annot.insert(annotations::MIGRATED_FROM.to_string(), source_vm.name_any());
        annot.insert(annotations::MIGRATION.to_string(), migration.name_any());
        annot.insert(annotations::IMPORTED_DISK_ID.to_string(), disk_id);
        if let Some(checksum) = &status.target_checksum {
            annot.insert(annotations::DISK_CHECKSUM.to_string(), checksum.clone());
        }
        vm_api.create(&PostParams::default(), &target_vm).await?;
    }

    status.target_vm_name = Some(target_vm_name);
    status.phase = MigrationPhase::ValidatingTarget;
    Ok(Duration::ZERO)
}

async fn step_validating_target(
    ctx: &Ctx,
    namespace: &str,
    status: &mut virtrigaud_types::migration::VMMigrationStatus,
) -> Result<Duration> {
    let name = status
        .target_vm_name
        .clone()
        .ok_or_else(|| Error::Other("missing target vm name".to_string()))?;
    let vm_api: Api<VirtualMachine> = Api::namespaced(ctx.client.clone(), namespace);
    let target = vm_api.get_opt(&name).await?;
    let ready = target
        .and_then(|vm| vm.status)
        .map(|s| virtrigaud_types::condition::is_condition_true(&s.conditions, condition_types::READY))
        .unwrap_or(false);

    if ready {
        status.phase = MigrationPhase::Ready;
        status.progress.percentage = 100;
        Ok(Duration::ZERO)
    } else {
        Ok(POLL_INTERVAL)
    }
}

async fn finish(
    ctx: &Ctx,
    namespace: &str,
    migration: &VMMigration,
    status: &mut virtrigaud_types::migration::VMMigrationStatus,
) {
    status.completion_time = Some(chrono::Utc::now());
    set_condition(
        &mut status.conditions,
        condition_types::READY,
        ConditionStatus::True,
        reasons::MIGRATION_SUCCEEDED,
        "migration complete",
        status.observed_generation,
    );
    if !migration.spec.policy.keep_source {
        let vm_api: Api<VirtualMachine> = Api::namespaced(ctx.client.clone(), namespace);
        if let Err(e) = vm_api
            .delete(&migration.spec.source_vm_ref.name, &kube::api::DeleteParams::default())
            .await
        {
            warn!(error = %e, "failed to delete source VM after migration");
        }
    }
}

async fn fail(
    api: &Api<VMMigration>,
    name: &str,
    mut status: virtrigaud_types::migration::VMMigrationStatus,
    message: &str,
) -> Result<Action> {
    status.phase = MigrationPhase::Failed;
    set_condition(
        &mut status.conditions,
        condition_types::READY,
        ConditionStatus::False,
        reasons::MIGRATION_FAILED,
        message,
        status.observed_generation,
    );
    write_status(api, name, status).await?;
    Ok(Action::await_change())
}

async fn write_status(
    api: &Api<VMMigration>,
    name: &str,
    status: virtrigaud_types::migration::VMMigrationStatus,
) -> Result<()> {
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}
