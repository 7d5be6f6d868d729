//! Generic finalizer add/remove helpers shared by every reconciler.
//!
//! Every VirtRigaud kind carries the same finalizer token
//! (`virtrigaud_types::common::FINALIZER`) and the same add/remove shape, so
//! this is generic over the resource kind instead of duplicated per
//! reconciler.

use kube::api::{Patch, PatchParams};
use kube::{Api, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt::Debug;

use virtrigaud_types::common::FINALIZER;

use crate::error::Result;

/// Adds the finalizer if it isn't already present. Returns the (possibly
/// unmodified) resource.
pub async fn add<K>(api: &Api<K>, obj: &K) -> Result<K>
where
    K: Clone + Debug + DeserializeOwned + Serialize + Resource,
{
    if obj.finalizers().iter().any(|f| f == FINALIZER) {
        return Ok(obj.clone());
    }

    let mut finalizers = obj.finalizers().to_vec();
    finalizers.push(FINALIZER.to_string());
    patch_finalizers(api, &obj.name_any(), finalizers).await
}

/// Removes the finalizer if present. Returns the updated resource.
pub async fn remove<K>(api: &Api<K>, obj: &K) -> Result<K>
where
    K: Clone + Debug + DeserializeOwned + Serialize + Resource,
{
    let finalizers: Vec<String> = obj
        .finalizers()
        .iter()
        .filter(|f| *f != FINALIZER)
        .cloned()
        .collect();
    patch_finalizers(api, &obj.name_any(), finalizers).await
}

async fn patch_finalizers<K>(api: &Api<K>, name: &str, finalizers: Vec<String>) -> Result<K>
where
    K: Clone + Debug + DeserializeOwned + Serialize + Resource,
{
    let patch: Value = json!({
        "metadata": {
            "finalizers": finalizers,
        }
    });
    let patched = api
        .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(patched)
}

/// True if the resource has a deletion timestamp set.
pub fn is_deleting<K: Resource>(obj: &K) -> bool {
    obj.meta().deletion_timestamp.is_some()
}

/// True if the resource still carries the VirtRigaud finalizer.
pub fn has_finalizer<K: Resource>(obj: &K) -> bool {
    obj.finalizers().iter().any(|f| f == FINALIZER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use virtrigaud_types::common::{LocalObjectRef, PowerState};
    use virtrigaud_types::vm::{VirtualMachine, VirtualMachineSpec};

    fn vm_with(finalizers: Vec<String>, deleting: bool) -> VirtualMachine {
        let spec = VirtualMachineSpec {
            provider_ref: LocalObjectRef::new("provider-1"),
            class_ref: LocalObjectRef::new("class-1"),
            image_ref: Some(LocalObjectRef::new("image-1")),
            imported_disk: None,
            disks: Vec::new(),
            networks: Vec::new(),
            user_data: None,
            meta_data: None,
            power_state: PowerState::default(),
            tags: Default::default(),
            placement: None,
        };
        let mut vm = VirtualMachine::new("vm-1", spec);
        vm.meta_mut().finalizers = Some(finalizers);
        if deleting {
            vm.meta_mut().deletion_timestamp = Some(Time(chrono::Utc::now()));
        }
        vm
    }

    #[test]
    fn detects_finalizer_presence() {
        let with = vm_with(vec![FINALIZER.to_string()], false);
        assert!(has_finalizer(&with));

        let without = vm_with(vec!["other/finalizer".to_string()], false);
        assert!(!has_finalizer(&without));
    }

    #[test]
    fn detects_deletion_timestamp() {
        assert!(is_deleting(&vm_with(vec![], true)));
        assert!(!is_deleting(&vm_with(vec![], false)));
    }
}
