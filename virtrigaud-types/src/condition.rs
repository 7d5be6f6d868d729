//! Condition type shared by every resource's status (spec.md §3).

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Tri-state condition status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionStatus::True => write!(f, "True"),
            ConditionStatus::False => write!(f, "False"),
            ConditionStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

/// `(type, status, reason, message, lastTransitionTime, observedGeneration)` record.
///
/// Reconcilers communicate outcomes exclusively through conditions; nothing
/// else on status is load-bearing for the universal invariants in spec.md §8.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
    #[serde(rename = "observedGeneration", skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Well-known condition type strings kept stable across every resource kind
/// that emits them (spec.md §6: "phases and reasons are the same stable
/// string set across versions").
pub mod condition_types {
    pub const READY: &str = "Ready";
    pub const PROVIDER_RUNTIME_READY: &str = "ProviderRuntimeReady";
    pub const PROVIDER_AVAILABLE: &str = "ProviderAvailable";
}

pub mod reasons {
    pub const RECONCILE_SUCCEEDED: &str = "ReconcileSucceeded";
    pub const DEPENDENCY_NOT_FOUND: &str = "DependencyNotFound";
    pub const CAPABILITY_MISSING: &str = "CapabilityMissing";
    pub const PROVIDER_UNAVAILABLE: &str = "ProviderUnavailable";
    pub const INVALID_SPEC: &str = "InvalidSpec";
    pub const UNAUTHORIZED: &str = "Unauthorized";
    pub const CREATE_FAILED: &str = "CreateFailed";
    pub const RECONFIGURE_FAILED: &str = "ReconfigureFailed";
    pub const POWER_FAILED: &str = "PowerFailed";
    pub const DELETE_FAILED: &str = "DeleteFailed";
    pub const GRACEFUL_SHUTDOWN_UNSUPPORTED: &str = "GracefulShutdownUnsupported";
    pub const WAITING_FOR_TASK: &str = "WaitingForTask";
    pub const MIGRATION_FAILED: &str = "MigrationFailed";
    pub const MIGRATION_SUCCEEDED: &str = "MigrationSucceeded";
    pub const RETRIES_EXHAUSTED: &str = "RetriesExhausted";
}

/// Insert-or-update a condition by `type_`. Mirrors the upstream
/// `meta.setStatusCondition` idiom: the transition timestamp only moves when
/// `status` actually changes.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: ConditionStatus,
    reason: &str,
    message: impl Into<String>,
    observed_generation: i64,
) {
    let message = message.into();
    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == type_) {
        if existing.status != status {
            existing.last_transition_time = Utc::now();
        }
        existing.status = status;
        existing.reason = reason.to_string();
        existing.message = message;
        existing.observed_generation = Some(observed_generation);
    } else {
        conditions.push(Condition {
            type_: type_.to_string(),
            status,
            reason: reason.to_string(),
            message,
            last_transition_time: Utc::now(),
            observed_generation: Some(observed_generation),
        });
    }
}

/// Read helper: is the named condition `True`?
pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    conditions
        .iter()
        .any(|c| c.type_ == type_ && c.status == ConditionStatus::True)
}

pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}
