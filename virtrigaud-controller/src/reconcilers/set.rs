//! Set reconciler: replica-set style orchestration of VirtualMachines
//! (spec.md §4.6).

use std::sync::Arc;
use std::time::Duration;

use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::{Api, Resource, ResourceExt};
use sha2::{Digest, Sha256};
use tracing::warn;

use virtrigaud_types::condition::is_condition_true;
use virtrigaud_types::set::{
    UpdateStatus, UpdateStrategyType, VMSet, VmStatusSummary, VMSetStatus, VM_STATUS_CAP,
};
use virtrigaud_types::vm::{VirtualMachine, VirtualMachineSpec};

use crate::error::{Error, Result};
use crate::metrics;
use crate::reconcilers::{backoff_duration, Ctx, MAX_RESYNC};

pub async fn reconcile(set: Arc<VMSet>, ctx: Arc<Ctx>) -> Result<Action> {
    let start = std::time::Instant::now();
    let namespace = set
        .namespace()
        .ok_or_else(|| Error::InvalidSpec("VMSet must be namespaced".to_string()))?;
    let api: Api<VMSet> = Api::namespaced(ctx.client.clone(), &namespace);

    let result = run(&set, &namespace, &api, &ctx).await;

    let outcome = match &result {
        Ok(_) => "success",
        Err(e) if !e.is_retryable() => "terminal",
        Err(_) => "error",
    };
    metrics::observe_reconcile("VMSet", outcome, start.elapsed().as_secs_f64());
    result
}

pub fn on_error(_set: Arc<VMSet>, error: &Error, _ctx: Arc<Ctx>) -> Action {
    warn!(error = %error, "VMSet reconcile failed");
    metrics::record_error("reconcile_error", "set");
    Action::requeue(backoff_duration(0))
}

async fn run(set: &VMSet, namespace: &str, api: &Api<VMSet>, ctx: &Ctx) -> Result<Action> {
    let name = set.name_any();
    let vm_api: Api<VirtualMachine> = Api::namespaced(ctx.client.clone(), namespace);

    let revision = template_revision(set);
    let uid = set.uid().unwrap_or_default();

    let owned = vm_api
        .list(&ListParams::default())
        .await?
        .items
        .into_iter()
        .filter(|vm| {
            vm.owner_references()
                .iter()
                .any(|or| or.uid == uid)
        })
        .collect::<Vec<_>>();

    let mut status = set.status.clone().unwrap_or_default();
    status.observed_generation = set.metadata.generation.unwrap_or(0);
    status.current_revision.clone_from(&revision);

    let requeue = match set.spec.update_strategy.strategy_type {
        UpdateStrategyType::Recreate => recreate(&vm_api, set, &owned, &revision, &mut status).await?,
        UpdateStrategyType::RollingUpdate => {
            rolling_update(&vm_api, set, &owned, &revision, &mut status).await?
        }
    };

    let refreshed = vm_api.list(&ListParams::default()).await?.items;
    summarize(&refreshed, &uid, &mut status);

    write_status(api, &name, status).await?;
    Ok(Action::requeue(requeue))
}

async fn recreate(
    vm_api: &Api<VirtualMachine>,
    set: &VMSet,
    owned: &[VirtualMachine],
    revision: &str,
    status: &mut VMSetStatus,
) -> Result<Duration> {
    let stale: Vec<&VirtualMachine> = owned.iter().filter(|vm| current_revision(vm) != revision).collect();
    if !stale.is_empty() {
        for vm in &owned {
            vm_api
                .delete(&vm.name_any(), &kube::api::DeleteParams::default())
                .await?;
        }
        status.update_status = Some(UpdateStatus {
            in_progress: true,
            surge_count: 0,
            unavailable_count: owned.len() as i32,
        });
        return Ok(Duration::from_secs(5));
    }

    let deficit = set.spec.replicas - owned.len() as i32;
    if deficit > 0 {
        for _ in 0..deficit {
            create_replica(vm_api, set, revision).await?;
        }
        return Ok(Duration::from_secs(5));
    }

    status.update_status = None;
    Ok(MAX_RESYNC)
}

async fn rolling_update(
    vm_api: &Api<VirtualMachine>,
    set: &VMSet,
    owned: &[VirtualMachine],
    revision: &str,
    status: &mut VMSetStatus,
) -> Result<Duration> {
    let strategy = &set.spec.update_strategy;
    let replicas = set.spec.replicas;

    let current_count = owned.iter().filter(|vm| current_revision(vm) == revision).count() as i32;
    let mut stale: Vec<&VirtualMachine> = owned.iter().filter(|vm| current_revision(vm) != revision).collect();
    stale.sort_by_key(|vm| (vm.creation_timestamp().map(|t| t.0), vm.name_any()));

    let unavailable = stale.iter().filter(|vm| !vm_ready(vm)).count() as i32;
    let surge = (owned.len() as i32 - replicas).max(0);

    if !stale.is_empty() {
        let deletable = strategy.max_unavailable.saturating_sub(unavailable).max(0);
        for vm in stale.iter().take(deletable as usize) {
            vm_api
                .delete(&vm.name_any(), &kube::api::DeleteParams::default())
                .await?;
        }
    }

    let max_total = replicas + strategy.max_surge;
    let creatable = (max_total - owned.len() as i32).max(0);
    for _ in 0..creatable {
        create_replica(vm_api, set, revision).await?;
    }

    let in_progress = !stale.is_empty() || current_count < replicas;
    status.update_status = Some(UpdateStatus {
        in_progress,
        surge_count: surge,
        unavailable_count: unavailable,
    });

    if in_progress {
        Ok(Duration::from_secs(5))
    } else {
        Ok(MAX_RESYNC)
    }
}

async fn create_replica(vm_api: &Api<VirtualMachine>, set: &VMSet, revision: &str) -> Result<()> {
    let name = format!("{}-{}", set.name_any(), &uuid::Uuid::new_v4().to_string()[..8]);
    let template = &set.spec.template;
    let spec = VirtualMachineSpec {
        provider_ref: template.provider_ref.clone(),
        class_ref: template.class_ref.clone(),
        image_ref: Some(template.image_ref.clone()),
        imported_disk: None,
        disks: Vec::new(),
        networks: template.networks.clone(),
        user_data: template.user_data.clone(),
        meta_data: None,
        power_state: Default::default(),
        tags: Default::default(),
        placement: None,
    };
    let mut vm = VirtualMachine::new(&name, spec);
    vm.labels_mut().insert("virtrigaud.io/revision".to_string(), revision.to_string());
    vm.labels_mut().insert("virtrigaud.io/set-name".to_string(), set.name_any());
    if let Some(owner_ref) = set.controller_owner_ref(&()) {
        vm.owner_references_mut().push(owner_ref);
    }
    vm_api.create(&PostParams::default(), &vm).await?;
    Ok(())
}

fn current_revision(vm: &VirtualMachine) -> String {
    vm.labels()
        .get("virtrigaud.io/revision")
        .cloned()
        .unwrap_or_default()
}

fn vm_ready(vm: &VirtualMachine) -> bool {
    vm.status
        .as_ref()
        .map(|s| is_condition_true(&s.conditions, virtrigaud_types::condition::condition_types::READY))
        .unwrap_or(false)
}

fn summarize(all_vms: &[VirtualMachine], set_uid: &str, status: &mut VMSetStatus) {
    let owned: Vec<&VirtualMachine> = all_vms
        .iter()
        .filter(|vm| vm.owner_references().iter().any(|or| or.uid == set_uid))
        .collect();

    status.replicas = owned.len() as i32;
    status.ready_replicas = owned.iter().filter(|vm| vm_ready(vm)).count() as i32;
    status.available_replicas = status.ready_replicas;
    status.updated_replicas = owned
        .iter()
        .filter(|vm| current_revision(vm) == status.current_revision)
        .count() as i32;

    status.vm_status = owned
        .into_iter()
        .take(VM_STATUS_CAP)
        .map(|vm| VmStatusSummary {
            name: vm.name_any(),
            revision: current_revision(vm),
            ready: vm_ready(vm),
        })
        .collect();
}

fn template_revision(set: &VMSet) -> String {
    let serialized = serde_json::to_vec(&set.spec.template).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&serialized);
    hex::encode(hasher.finalize())[..16].to_string()
}

async fn write_status(api: &Api<VMSet>, name: &str, status: VMSetStatus) -> Result<()> {
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use virtrigaud_types::common::LocalObjectRef;
    use virtrigaud_types::set::{VMSet, VMSetSpec, VmTemplate};

    fn set_with_template(user_data: Option<&str>) -> VMSet {
        let template = VmTemplate {
            provider_ref: LocalObjectRef::new("provider-1"),
            class_ref: LocalObjectRef::new("class-1"),
            image_ref: LocalObjectRef::new("image-1"),
            networks: Vec::new(),
            user_data: user_data.map(str::to_string),
        };
        VMSet::new(
            "set-1",
            VMSetSpec {
                replicas: 3,
                template,
                update_strategy: Default::default(),
            },
        )
    }

    #[test]
    fn template_revision_is_stable_and_sensitive_to_changes() {
        let a = set_with_template(Some("#cloud-config\nruncmd: []\n"));
        let b = set_with_template(Some("#cloud-config\nruncmd: []\n"));
        let c = set_with_template(Some("#cloud-config\nruncmd: [echo hi]\n"));

        assert_eq!(template_revision(&a), template_revision(&b));
        assert_ne!(template_revision(&a), template_revision(&c));
        assert_eq!(template_revision(&a).len(), 16);
    }

    #[test]
    fn current_revision_reads_label_or_defaults_empty() {
        let mut vm = VirtualMachine::new(
            "vm-1",
            VirtualMachineSpec {
                provider_ref: LocalObjectRef::new("provider-1"),
                class_ref: LocalObjectRef::new("class-1"),
                image_ref: Some(LocalObjectRef::new("image-1")),
                imported_disk: None,
                disks: Vec::new(),
                networks: Vec::new(),
                user_data: None,
                meta_data: None,
                power_state: Default::default(),
                tags: Default::default(),
                placement: None,
            },
        );
        assert_eq!(current_revision(&vm), "");

        vm.labels_mut().insert("virtrigaud.io/revision".to_string(), "abc123".to_string());
        assert_eq!(current_revision(&vm), "abc123");
    }
}
