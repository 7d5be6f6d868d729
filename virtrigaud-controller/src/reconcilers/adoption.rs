//! Adoption pass (spec.md §4.7): discovers unmanaged VMs on a provider and
//! synthesizes `VirtualMachine`/`VMClass` objects for them. Invoked from the
//! Provider reconciler once a worker is `Running`.

use std::collections::{BTreeMap, HashSet};

use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
use tracing::warn;

use virtrigaud_proto::provider::{ListVmsRequest, VmSummary};
use virtrigaud_types::adoption::{AdoptionFilter, AdoptionStatus};
use virtrigaud_types::common::{LocalObjectRef, PowerState};
use virtrigaud_types::provider::Provider;
use virtrigaud_types::vm::{ImportedDiskRef, VirtualMachine, VirtualMachineSpec, VirtualMachineStatus};
use virtrigaud_types::vmclass::{VMClass, VMClassSpec};

use crate::error::Result;
use crate::resolver::Resolver;

const ADOPT_FILTER_ANNOTATION: &str = virtrigaud_types::common::annotations::ADOPT_FILTER;

/// Runs one adoption pass for `provider` and returns the resulting counts.
pub async fn run(client: &Client, resolver: &Resolver, provider: &Provider) -> Result<AdoptionStatus> {
    let namespace = provider.namespace().unwrap_or_default();
    let filter = parse_filter(provider);

    let mut stub = match resolver.resolve(provider).await {
        Ok(stub) => stub,
        Err(e) => {
            warn!(error = %e, "adoption: failed to resolve provider stub");
            return Ok(AdoptionStatus {
                last_run: Some(chrono::Utc::now()),
                ..Default::default()
            });
        }
    };

    let vms = stub
        .list_vms(tonic::Request::new(ListVmsRequest {}))
        .await?
        .into_inner()
        .vms;

    let managed = managed_provider_ids(client, &namespace, &provider.name_any()).await?;

    let mut discovered = 0i32;
    let mut adopted = 0i32;
    let mut failed = 0i32;

    let vm_api: Api<VirtualMachine> = Api::namespaced(client.clone(), &namespace);
    let class_api: Api<VMClass> = Api::namespaced(client.clone(), &namespace);

    for vm_info in vms {
        if managed.contains(&vm_info.id) {
            continue;
        }
        discovered += 1;
        if !passes_filter(&vm_info, &filter) {
            continue;
        }

        match adopt_one(&vm_api, &class_api, provider, &vm_info).await {
            Ok(()) => adopted += 1,
            Err(e) => {
                warn!(error = %e, vm = %vm_info.name, "adoption: failed to synthesize VirtualMachine");
                failed += 1;
            }
        }
    }

    Ok(AdoptionStatus {
        discovered,
        adopted,
        failed,
        last_run: Some(chrono::Utc::now()),
    })
}

fn parse_filter(provider: &Provider) -> AdoptionFilter {
    provider
        .annotations()
        .get(ADOPT_FILTER_ANNOTATION)
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default()
}

fn passes_filter(vm: &VmSummary, filter: &AdoptionFilter) -> bool {
    if let Some(pattern) = &filter.name_pattern {
        if let Ok(re) = regex::Regex::new(pattern) {
            if !re.is_match(&vm.name) {
                return false;
            }
        }
    }
    if let Some(power_state) = &filter.power_state {
        let vm_power = match vm.power_state {
            1 => "on",
            2 => "off",
            _ => "unknown",
        };
        if !power_state.eq_ignore_ascii_case(vm_power) {
            return false;
        }
    }
    if let Some(min_cpu) = filter.min_cpu {
        if vm.vcpus < min_cpu {
            return false;
        }
    }
    if let Some(max_cpu) = filter.max_cpu {
        if vm.vcpus > max_cpu {
            return false;
        }
    }
    if let Some(min_mem) = filter.min_memory_mib {
        if vm.memory_mib < min_mem {
            return false;
        }
    }
    if let Some(max_mem) = filter.max_memory_mib {
        if vm.memory_mib > max_mem {
            return false;
        }
    }
    true
}

async fn managed_provider_ids(
    client: &Client,
    namespace: &str,
    provider_name: &str,
) -> Result<HashSet<String>> {
    let api: Api<VirtualMachine> = Api::namespaced(client.clone(), namespace);
    let list = api.list(&Default::default()).await?;
    Ok(list
        .items
        .into_iter()
        .filter(|vm| vm.spec.provider_ref.name == provider_name)
        .filter_map(|vm| vm.status.and_then(|s| s.id))
        .collect())
}

async fn adopt_one(
    vm_api: &Api<VirtualMachine>,
    class_api: &Api<VMClass>,
    provider: &Provider,
    vm_info: &VmSummary,
) -> Result<()> {
    let class_name = ensure_class(class_api, vm_info.vcpus, vm_info.memory_mib).await?;
    let vm_name = sanitize_name(&vm_info.name);

    let spec = VirtualMachineSpec {
        provider_ref: LocalObjectRef { name: provider.name_any() },
        class_ref: LocalObjectRef { name: class_name },
        image_ref: None,
        imported_disk: Some(ImportedDiskRef {
            disk_id: vm_info.id.clone(),
            format: "unknown".to_string(),
            source: "manual".to_string(),
            migration_ref: None,
        }),
        disks: Vec::new(),
        networks: Vec::new(),
        user_data: None,
        meta_data: None,
        power_state: if vm_info.power_state == 1 { PowerState::On } else { PowerState::Off },
        tags: BTreeMap::new(),
        placement: None,
    };

    let mut vm = VirtualMachine::new(&vm_name, spec);
    vm.labels_mut()
        .insert(virtrigaud_types::common::annotations::ADOPTED.into(), "true".into());
    vm.status = Some(VirtualMachineStatus {
        id: Some(vm_info.id.clone()),
        ips: vm_info.ips.clone(),
        ..Default::default()
    });

    match vm_api.get_opt(&vm_name).await? {
        Some(_) => {}
        None => {
            let created = vm_api.create(&PostParams::default(), &vm).await?;
            let status_patch = serde_json::json!({ "status": vm.status });
            vm_api
                .patch_status(&created.name_any(), &PatchParams::default(), &Patch::Merge(&status_patch))
                .await?;
        }
    }
    Ok(())
}

async fn ensure_class(class_api: &Api<VMClass>, vcpus: u32, memory_mib: u64) -> Result<String> {
    let name = format!("adopted-{vcpus}cpu-{memory_mib}mb");
    if class_api.get_opt(&name).await?.is_some() {
        return Ok(name);
    }
    let spec = VMClassSpec {
        vcpus,
        memory: format!("{memory_mib}Mi"),
        firmware: Default::default(),
        disk_defaults: Default::default(),
        guest_tools_policy: Default::default(),
        performance: None,
        security: None,
        resource_limits: None,
    };
    let class = VMClass::new(&name, spec);
    match class_api.create(&PostParams::default(), &class).await {
        Ok(_) => {}
        Err(kube::Error::Api(e)) if e.code == 409 => {}
        Err(e) => return Err(e.into()),
    }
    Ok(name)
}

fn sanitize_name(source: &str) -> String {
    let mut out: String = source
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    out = out.trim_matches('-').to_string();
    if out.is_empty() {
        out = "adopted-vm".to_string();
    }
    out.truncate(63);
    out.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm_summary(name: &str, power_state: i32, vcpus: u32, memory_mib: u64) -> VmSummary {
        VmSummary {
            id: format!("id-{name}"),
            name: name.to_string(),
            power_state,
            vcpus,
            memory_mib,
            ..Default::default()
        }
    }

    #[test]
    fn sanitize_name_normalizes_and_truncates() {
        assert_eq!(sanitize_name("My VM #42!"), "my-vm-42");
        assert_eq!(sanitize_name("---"), "adopted-vm");
        assert_eq!(sanitize_name(&"x".repeat(100)).len(), 63);
    }

    #[test]
    fn passes_filter_matches_name_pattern() {
        let filter = AdoptionFilter {
            name_pattern: Some("^prod-.*".to_string()),
            ..Default::default()
        };
        assert!(passes_filter(&vm_summary("prod-web-1", 1, 2, 2048), &filter));
        assert!(!passes_filter(&vm_summary("dev-web-1", 1, 2, 2048), &filter));
    }

    #[test]
    fn passes_filter_matches_power_state_and_ranges() {
        let filter = AdoptionFilter {
            power_state: Some("on".to_string()),
            min_cpu: Some(2),
            max_cpu: Some(4),
            min_memory_mib: Some(1024),
            max_memory_mib: Some(8192),
            ..Default::default()
        };
        assert!(passes_filter(&vm_summary("vm-a", 1, 4, 4096), &filter));
        assert!(!passes_filter(&vm_summary("vm-b", 2, 4, 4096), &filter));
        assert!(!passes_filter(&vm_summary("vm-c", 1, 8, 4096), &filter));
        assert!(!passes_filter(&vm_summary("vm-d", 1, 4, 16384), &filter));
    }
}
