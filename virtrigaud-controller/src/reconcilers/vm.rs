//! VirtualMachine reconciler — the heart of the system (spec.md §4.4).

use std::sync::Arc;
use std::time::Duration;

use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use tracing::warn;

use virtrigaud_proto::provider::{
    CreateParams as PbCreateParams, CreateRequest, DeleteRequest, DescribeRequest,
    DiskSpec as PbDiskSpec, NetworkSpec as PbNetworkSpec, PowerOp as PbPowerOp, PowerRequest,
    ReconfigureParams as PbReconfigureParams, ReconfigureRequest, TaskRef as PbTaskRef,
    TaskStatusRequest,
};
use virtrigaud_types::common::PowerState;
use virtrigaud_types::condition::{condition_types, reasons, set_condition, ConditionStatus};
use virtrigaud_types::provider::Provider;
use virtrigaud_types::vm::{VirtualMachine, VirtualMachinePhase};
use virtrigaud_types::vmclass::VMClass;
use virtrigaud_types::vmimage::VMImage;

use crate::error::{classify_status, Error, Result, StatusClass};
use crate::finalizer;
use crate::metrics;
use crate::reconcilers::{backoff_duration, Ctx, MAX_RESYNC};

pub async fn reconcile(vm: Arc<VirtualMachine>, ctx: Arc<Ctx>) -> Result<Action> {
    let start = std::time::Instant::now();
    let namespace = vm.namespace().ok_or_else(|| {
        Error::InvalidSpec("VirtualMachine must be namespaced".to_string())
    })?;
    let name = vm.name_any();
    let api: Api<VirtualMachine> = Api::namespaced(ctx.client.clone(), &namespace);

    let result = run(&vm, &namespace, &name, &api, &ctx).await;

    let outcome = match &result {
        Ok(_) => "success",
        Err(e) if !e.is_retryable() => "terminal",
        Err(_) => "error",
    };
    metrics::observe_reconcile("VirtualMachine", outcome, start.elapsed().as_secs_f64());

    result
}

pub fn on_error(_vm: Arc<VirtualMachine>, error: &Error, _ctx: Arc<Ctx>) -> Action {
    warn!(error = %error, "VirtualMachine reconcile failed");
    metrics::record_error("reconcile_error", "vm");
    Action::requeue(backoff_duration(0))
}

async fn run(
    vm: &VirtualMachine,
    namespace: &str,
    name: &str,
    api: &Api<VirtualMachine>,
    ctx: &Ctx,
) -> Result<Action> {
    // Step 2: finalizer management / teardown branch.
    if finalizer::is_deleting(vm) {
        return teardown(vm, namespace, name, api, ctx).await;
    }
    if !finalizer::has_finalizer(vm) {
        finalizer::add(api, vm).await?;
        return Ok(Action::requeue(Duration::ZERO));
    }

    // Step 3: validate source (invariant 1).
    if !vm.spec.has_exactly_one_source() {
        let mut status = vm.status.clone().unwrap_or_default();
        status.observed_generation = vm.metadata.generation.unwrap_or(0);
        status.phase = VirtualMachinePhase::Failed;
        set_condition(
            &mut status.conditions,
            condition_types::READY,
            ConditionStatus::False,
            reasons::INVALID_SPEC,
            "exactly one of imageRef or importedDisk must be set",
            vm.metadata.generation.unwrap_or(0),
        );
        write_status(api, name, status).await?;
        return Ok(Action::await_change());
    }

    // Step 1 (continued): load dependency context.
    let provider_api: Api<Provider> = Api::namespaced(ctx.client.clone(), namespace);
    let provider = match provider_api.get_opt(&vm.spec.provider_ref.name).await? {
        Some(p) => p,
        None => {
            return dependency_not_found(api, vm, name, "Provider").await;
        }
    };

    let class_api: Api<VMClass> = Api::namespaced(ctx.client.clone(), namespace);
    let class = match class_api.get_opt(&vm.spec.class_ref.name).await? {
        Some(c) => c,
        None => return dependency_not_found(api, vm, name, "VMClass").await,
    };

    if let Some(image_ref) = vm.spec.image_ref.as_ref() {
        let image_api: Api<VMImage> = Api::namespaced(ctx.client.clone(), namespace);
        if image_api.get_opt(&image_ref.name).await?.is_none() {
            return dependency_not_found(api, vm, name, "VMImage").await;
        }
    }

    // Step 4: resolve provider stub.
    let mut stub = match ctx.resolver.resolve(&provider).await {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "provider unavailable");
            set_and_write_condition(
                api,
                vm,
                name,
                ConditionStatus::False,
                reasons::PROVIDER_UNAVAILABLE,
                e.to_string(),
            )
            .await?;
            return Ok(Action::requeue(backoff_duration(0)));
        }
    };

    let mut status = vm.status.clone().unwrap_or_default();
    status.observed_generation = vm.metadata.generation.unwrap_or(0);

    // Step 5: drive outstanding task.
    if let Some(task_id) = status.last_task_ref.clone() {
        let resp = stub
            .task_status(TaskStatusRequest {
                task: Some(PbTaskRef { id: task_id }),
            })
            .await;
        match resp {
            Ok(r) => {
                let r = r.into_inner();
                if !r.done {
                    write_status(api, name, status).await?;
                    return Ok(Action::requeue(Duration::from_secs(5)));
                }
                if let Some(err) = r.error {
                    status.last_task_ref = None;
                    set_condition(
                        &mut status.conditions,
                        condition_types::READY,
                        ConditionStatus::False,
                        reasons::CREATE_FAILED,
                        err,
                        vm.metadata.generation.unwrap_or(0),
                    );
                    write_status(api, name, status).await?;
                    return Ok(Action::requeue(backoff_duration(0)));
                }
                status.last_task_ref = None;
            }
            Err(e) => return handle_rpc_error(api, vm, name, status, e).await,
        }
    }
    if let Some(task_id) = status.reconfigure_task_ref.clone() {
        let resp = stub
            .task_status(TaskStatusRequest {
                task: Some(PbTaskRef { id: task_id }),
            })
            .await;
        match resp {
            Ok(r) => {
                let r = r.into_inner();
                if !r.done {
                    write_status(api, name, status).await?;
                    return Ok(Action::requeue(Duration::from_secs(5)));
                }
                if let Some(err) = r.error {
                    status.reconfigure_task_ref = None;
                    set_condition(
                        &mut status.conditions,
                        condition_types::READY,
                        ConditionStatus::False,
                        reasons::RECONFIGURE_FAILED,
                        err,
                        vm.metadata.generation.unwrap_or(0),
                    );
                    write_status(api, name, status).await?;
                    return Ok(Action::requeue(backoff_duration(0)));
                }
                status.reconfigure_task_ref = None;
            }
            Err(e) => return handle_rpc_error(api, vm, name, status, e).await,
        }
    }

    // Step 6: observe.
    let describe = if let Some(id) = status.id.clone() {
        match stub.describe(DescribeRequest { id }).await {
            Ok(r) => Some(r.into_inner()),
            Err(e) => return handle_rpc_error(api, vm, name, status, e).await,
        }
    } else {
        None
    };

    // Step 7: converge.
    let exists = describe.as_ref().map(|d| d.exists).unwrap_or(false);

    if !exists {
        let params = build_create_params(vm, &class);
        match stub.create(CreateRequest { params: Some(params) }).await {
            Ok(r) => {
                let r = r.into_inner();
                status.id = Some(r.id);
                status.last_task_ref = r.task.map(|t| t.id);
                status.phase = VirtualMachinePhase::Provisioning;
                metrics::VM_OPERATIONS_TOTAL
                    .with_label_values(&["create", &provider.spec.type_.to_string(), "success"])
                    .inc();
            }
            Err(e) => {
                metrics::VM_OPERATIONS_TOTAL
                    .with_label_values(&["create", &provider.spec.type_.to_string(), "error"])
                    .inc();
                return handle_rpc_error(api, vm, name, status, e).await;
            }
        }
        write_status(api, name, status).await?;
        return Ok(Action::requeue(Duration::from_secs(5)));
    }

    let describe = describe.unwrap();

    if needs_reconfigure(vm, &class, &describe) {
        let params = build_reconfigure_params(vm, &class);
        let id = status.id.clone().unwrap_or_default();
        match stub
            .reconfigure(ReconfigureRequest {
                id,
                params: Some(params),
            })
            .await
        {
            Ok(r) => {
                let r = r.into_inner();
                status.reconfigure_task_ref = r.task.map(|t| t.id);
                status.phase = VirtualMachinePhase::Reconfiguring;
            }
            Err(e) => return handle_rpc_error(api, vm, name, status, e).await,
        }
        write_status(api, name, status).await?;
        return Ok(Action::requeue(Duration::from_secs(5)));
    }

    let desired_power = pb_power_state_matches(vm.spec.power_state, describe.power_state);
    if !desired_power {
        let op = match vm.spec.power_state {
            PowerState::On => PbPowerOp::On,
            PowerState::Off => PbPowerOp::ShutdownGraceful,
        };
        let id = status.id.clone().unwrap_or_default();
        match stub
            .power(PowerRequest {
                id,
                op: op as i32,
            })
            .await
        {
            Ok(r) => {
                let r = r.into_inner();
                status.last_task_ref = r.task.map(|t| t.id);
            }
            Err(e) if classify_status(&e) == StatusClass::Unimplemented
                && matches!(vm.spec.power_state, PowerState::Off) =>
            {
                warn!("graceful shutdown unsupported, falling back to hard off");
                set_condition(
                    &mut status.conditions,
                    condition_types::READY,
                    ConditionStatus::True,
                    reasons::GRACEFUL_SHUTDOWN_UNSUPPORTED,
                    "provider does not support graceful shutdown, used hard power off",
                    vm.metadata.generation.unwrap_or(0),
                );
                let id = status.id.clone().unwrap_or_default();
                let r = stub
                    .power(PowerRequest {
                        id,
                        op: PbPowerOp::Off as i32,
                    })
                    .await?
                    .into_inner();
                status.last_task_ref = r.task.map(|t| t.id);
            }
            Err(e) => return handle_rpc_error(api, vm, name, status, e).await,
        }
        write_status(api, name, status).await?;
        return Ok(Action::requeue(Duration::from_secs(5)));
    }

    // Nothing to do.
    status.phase = VirtualMachinePhase::Running;
    status.power_state = vm.spec.power_state;
    status.ips = describe.ips.clone();
    status.console_url = describe.console_url.clone();
    status.current_resources.vcpus = describe.vcpus;
    status.current_resources.memory = format!("{}Mi", describe.memory_mib);
    set_condition(
        &mut status.conditions,
        condition_types::READY,
        ConditionStatus::True,
        reasons::RECONCILE_SUCCEEDED,
        "virtual machine reconciled",
        vm.metadata.generation.unwrap_or(0),
    );
    write_status(api, name, status).await?;

    Ok(Action::requeue(MAX_RESYNC))
}

async fn teardown(
    vm: &VirtualMachine,
    namespace: &str,
    name: &str,
    api: &Api<VirtualMachine>,
    ctx: &Ctx,
) -> Result<Action> {
    let mut status = vm.status.clone().unwrap_or_default();
    status.observed_generation = vm.metadata.generation.unwrap_or(0);
    status.phase = VirtualMachinePhase::Deleting;

    let Some(id) = status.id.clone() else {
        finalizer::remove(api, vm).await?;
        return Ok(Action::await_change());
    };

    let provider_api: Api<Provider> = Api::namespaced(ctx.client.clone(), namespace);
    let provider = match provider_api.get_opt(&vm.spec.provider_ref.name).await? {
        Some(p) => p,
        None => {
            // Provider is gone too; nothing left to tear down against.
            finalizer::remove(api, vm).await?;
            return Ok(Action::await_change());
        }
    };

    let mut stub = match ctx.resolver.resolve(&provider).await {
        Ok(s) => s,
        Err(_) => return Ok(Action::requeue(backoff_duration(0))),
    };

    if let Some(task_id) = status.last_task_ref.clone() {
        let r = stub
            .task_status(TaskStatusRequest {
                task: Some(PbTaskRef { id: task_id }),
            })
            .await?
            .into_inner();
        if r.done {
            status.last_task_ref = None;
            finalizer::remove(api, vm).await?;
            return Ok(Action::await_change());
        }
        write_status(api, name, status).await?;
        return Ok(Action::requeue(Duration::from_secs(5)));
    }

    let describe = stub.describe(DescribeRequest { id: id.clone() }).await?.into_inner();
    if !describe.exists {
        finalizer::remove(api, vm).await?;
        return Ok(Action::await_change());
    }

    let r = stub.delete(DeleteRequest { id }).await?.into_inner();
    status.last_task_ref = r.task.map(|t| t.id);
    write_status(api, name, status).await?;
    Ok(Action::requeue(Duration::from_secs(5)))
}

async fn dependency_not_found(
    api: &Api<VirtualMachine>,
    vm: &VirtualMachine,
    name: &str,
    what: &str,
) -> Result<Action> {
    set_and_write_condition(
        api,
        vm,
        name,
        ConditionStatus::False,
        reasons::DEPENDENCY_NOT_FOUND,
        format!("{what} not found"),
    )
    .await?;
    Ok(Action::requeue(backoff_duration(0)))
}

async fn set_and_write_condition(
    api: &Api<VirtualMachine>,
    vm: &VirtualMachine,
    name: &str,
    status_val: ConditionStatus,
    reason: &str,
    message: impl Into<String>,
) -> Result<()> {
    let mut status = vm.status.clone().unwrap_or_default();
    status.observed_generation = vm.metadata.generation.unwrap_or(0);
    set_condition(
        &mut status.conditions,
        condition_types::READY,
        status_val,
        reason,
        message,
        vm.metadata.generation.unwrap_or(0),
    );
    write_status(api, name, status).await
}

async fn handle_rpc_error(
    api: &Api<VirtualMachine>,
    vm: &VirtualMachine,
    name: &str,
    mut status: virtrigaud_types::vm::VirtualMachineStatus,
    err: tonic::Status,
) -> Result<Action> {
    let class = classify_status(&err);
    let (reason, action) = match class {
        StatusClass::NotFound => (reasons::DEPENDENCY_NOT_FOUND, Action::requeue(backoff_duration(0))),
        StatusClass::InvalidSpec => (reasons::INVALID_SPEC, Action::await_change()),
        StatusClass::Unauthorized => (reasons::UNAUTHORIZED, Action::await_change()),
        StatusClass::Unimplemented => (reasons::CAPABILITY_MISSING, Action::await_change()),
        StatusClass::Canceled => return Ok(Action::await_change()),
        StatusClass::Retryable => {
            metrics::record_error("retryable", "vm");
            (reasons::PROVIDER_UNAVAILABLE, Action::requeue(backoff_duration(0)))
        }
    };
    set_condition(
        &mut status.conditions,
        condition_types::READY,
        ConditionStatus::False,
        reason,
        err.message().to_string(),
        vm.metadata.generation.unwrap_or(0),
    );
    write_status(api, name, status).await?;
    Ok(action)
}

/// Step 9 write-back: `observedGeneration` is stamped unconditionally, even
/// on error paths, so a caller always sees which spec revision was last
/// attempted (spec.md §4.4 step 9).
async fn write_status(
    api: &Api<VirtualMachine>,
    name: &str,
    status: virtrigaud_types::vm::VirtualMachineStatus,
) -> Result<()> {
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

fn build_create_params(vm: &VirtualMachine, class: &VMClass) -> PbCreateParams {
    PbCreateParams {
        name: vm.name_any(),
        vcpus: class.spec.vcpus,
        memory_mib: parse_memory_mib(&class.spec.memory),
        image_name: vm.spec.image_ref.as_ref().map(|r| r.name.clone()),
        imported_disk_id: vm.spec.imported_disk.as_ref().map(|d| d.disk_id.clone()),
        disks: vm
            .spec
            .disks
            .iter()
            .map(|d| PbDiskSpec {
                name: d.name.clone(),
                size_gib: d.size_gib,
                bus: d.bus.clone(),
            })
            .collect(),
        networks: vm
            .spec
            .networks
            .iter()
            .map(|n| PbNetworkSpec {
                name: n.name.clone(),
                vlan: n.vlan.map(|v| v as u32),
                nic_model: Some(format!("{:?}", n.nic_model).to_lowercase()),
                mac_address: n.mac_address.clone(),
                static_ip: n.static_ip.clone(),
            })
            .collect(),
        user_data: vm.spec.user_data.clone(),
        meta_data: vm.spec.meta_data.clone(),
        placement_host: vm.spec.placement.as_ref().and_then(|p| p.host.clone()),
        tags: vm.spec.tags.clone().into_iter().collect(),
    }
}

fn build_reconfigure_params(vm: &VirtualMachine, class: &VMClass) -> PbReconfigureParams {
    PbReconfigureParams {
        vcpus: Some(class.spec.vcpus),
        memory_mib: Some(parse_memory_mib(&class.spec.memory)),
        disks: vm
            .spec
            .disks
            .iter()
            .map(|d| PbDiskSpec {
                name: d.name.clone(),
                size_gib: d.size_gib,
                bus: d.bus.clone(),
            })
            .collect(),
        disks_set: !vm.spec.disks.is_empty(),
        networks: vm
            .spec
            .networks
            .iter()
            .map(|n| PbNetworkSpec {
                name: n.name.clone(),
                vlan: n.vlan.map(|v| v as u32),
                nic_model: Some(format!("{:?}", n.nic_model).to_lowercase()),
                mac_address: n.mac_address.clone(),
                static_ip: n.static_ip.clone(),
            })
            .collect(),
        networks_set: !vm.spec.networks.is_empty(),
    }
}

fn needs_reconfigure(
    vm: &VirtualMachine,
    class: &VMClass,
    describe: &virtrigaud_proto::provider::DescribeResponse,
) -> bool {
    describe.vcpus != class.spec.vcpus || describe.memory_mib != parse_memory_mib(&class.spec.memory)
}

fn pb_power_state_matches(
    desired: PowerState,
    actual: i32,
) -> bool {
    use virtrigaud_proto::provider::PowerState as PbPowerState;
    let actual = PbPowerState::try_from(actual).unwrap_or(PbPowerState::Unknown);
    match desired {
        PowerState::On => actual == PbPowerState::On,
        PowerState::Off => matches!(actual, PbPowerState::Off | PbPowerState::Suspended),
    }
}

/// Parses a Kubernetes-style memory quantity (`"4Gi"`, `"512Mi"`) into MiB.
/// Schema validation upstream guarantees a well-formed quantity string
/// (spec.md §6); this is a narrow parser for the binary suffixes VMClass
/// actually uses, not a general resource.Quantity implementation.
fn parse_memory_mib(memory: &str) -> u64 {
    let memory = memory.trim();
    if let Some(v) = memory.strip_suffix("Gi") {
        v.parse::<u64>().unwrap_or(0) * 1024
    } else if let Some(v) = memory.strip_suffix("Mi") {
        v.parse::<u64>().unwrap_or(0)
    } else if let Some(v) = memory.strip_suffix("Ki") {
        v.parse::<u64>().unwrap_or(0) / 1024
    } else {
        memory.parse::<u64>().unwrap_or(0) / (1024 * 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use virtrigaud_types::vmclass::VMClassSpec;

    #[test]
    fn parse_memory_mib_handles_binary_suffixes() {
        assert_eq!(parse_memory_mib("4Gi"), 4096);
        assert_eq!(parse_memory_mib("512Mi"), 512);
        assert_eq!(parse_memory_mib("1048576Ki"), 1024);
        assert_eq!(parse_memory_mib("not-a-quantity"), 0);
    }

    #[test]
    fn pb_power_state_matches_on_and_off() {
        use virtrigaud_proto::provider::PowerState as PbPowerState;
        assert!(pb_power_state_matches(PowerState::On, PbPowerState::On as i32));
        assert!(!pb_power_state_matches(PowerState::On, PbPowerState::Off as i32));
        assert!(pb_power_state_matches(PowerState::Off, PbPowerState::Off as i32));
        assert!(pb_power_state_matches(PowerState::Off, PbPowerState::Suspended as i32));
        assert!(!pb_power_state_matches(PowerState::Off, PbPowerState::On as i32));
    }

    #[test]
    fn needs_reconfigure_compares_against_class() {
        let class = VMClass::new(
            "small",
            VMClassSpec {
                vcpus: 2,
                memory: "4Gi".to_string(),
                firmware: Default::default(),
                disk_defaults: Default::default(),
                guest_tools_policy: Default::default(),
                performance: None,
                security: None,
                resource_limits: None,
            },
        );
        let vm = VirtualMachine::new(
            "vm-1",
            virtrigaud_types::vm::VirtualMachineSpec {
                provider_ref: virtrigaud_types::common::LocalObjectRef::new("provider-1"),
                class_ref: virtrigaud_types::common::LocalObjectRef::new("small"),
                image_ref: Some(virtrigaud_types::common::LocalObjectRef::new("image-1")),
                imported_disk: None,
                disks: Vec::new(),
                networks: Vec::new(),
                user_data: None,
                meta_data: None,
                power_state: PowerState::On,
                tags: Default::default(),
                placement: None,
            },
        );

        let matching = virtrigaud_proto::provider::DescribeResponse {
            exists: true,
            power_state: 1,
            ips: Vec::new(),
            console_url: None,
            vcpus: 2,
            memory_mib: 4096,
            raw_details: None,
        };
        assert!(!needs_reconfigure(&vm, &class, &matching));

        let drifted = virtrigaud_proto::provider::DescribeResponse {
            vcpus: 4,
            ..matching
        };
        assert!(needs_reconfigure(&vm, &class, &drifted));
    }
}
