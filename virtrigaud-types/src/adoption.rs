//! Adoption filter — parsed from the `virtrigaud.io/adopt-filter` annotation
//! (spec.md §4.7).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdoptionFilter {
    #[serde(default)]
    pub name_pattern: Option<String>,
    #[serde(default)]
    pub power_state: Option<String>,
    #[serde(default)]
    pub min_cpu: Option<u32>,
    #[serde(default)]
    pub max_cpu: Option<u32>,
    #[serde(default)]
    pub min_memory_mib: Option<u64>,
    #[serde(default)]
    pub max_memory_mib: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdoptionStatus {
    #[serde(default)]
    pub discovered: i32,
    #[serde(default)]
    pub adopted: i32,
    #[serde(default)]
    pub failed: i32,
    pub last_run: Option<chrono::DateTime<chrono::Utc>>,
}
