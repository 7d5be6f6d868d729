//! `VMImage` — template identity (spec.md §3).

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infra.virtrigaud.io",
    version = "v1beta1",
    kind = "VMImage",
    namespaced,
    status = "VMImageStatus",
    shortname = "vmi"
)]
#[serde(rename_all = "camelCase")]
pub struct VMImageSpec {
    /// Exactly one of these identifies the template; schema validation in
    /// the real API server enforces that (spec.md §6).
    #[serde(default)]
    pub name_in_hypervisor: Option<String>,
    #[serde(default)]
    pub local_path: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    pub format: String,
    #[serde(default)]
    pub checksum: Option<String>,
}

impl VMImageSpec {
    pub fn source_count(&self) -> usize {
        [
            self.name_in_hypervisor.is_some(),
            self.local_path.is_some(),
            self.url.is_some(),
        ]
        .into_iter()
        .filter(|b| *b)
        .count()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct VMImageStatus {
    #[serde(default)]
    pub ready: bool,
}
