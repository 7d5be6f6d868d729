//! Per-kind reconcile loops (spec.md §4.4-§4.7).

pub mod adoption;
pub mod migration;
pub mod provider;
pub mod set;
pub mod vm;

use std::sync::Arc;
use std::time::Duration;

use kube::Client;

use crate::resolver::Resolver;

/// Shared context injected into every `kube::runtime::Controller`, mirroring
/// the `ContextData` pattern used for kube-rs controllers in this workspace.
pub struct Ctx {
    pub client: Client,
    pub resolver: Resolver,
}

impl Ctx {
    pub fn new(client: Client, resolver: Resolver) -> Arc<Self> {
        Arc::new(Self { client, resolver })
    }
}

/// Backoff schedule applied to `Retryable`/`Unavailable`/`Internal` errors
/// (spec.md §4.4 "Failure semantics"): initial 1s, x2 multiplier, 5min cap,
/// 10% jitter.
pub fn backoff_duration(attempt: u32) -> Duration {
    use rand::Rng;
    let base = 1u64.saturating_mul(1u64 << attempt.min(9));
    let capped = base.min(300);
    let jitter_range = (capped as f64 * 0.10) as u64;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..=jitter_range)
    } else {
        0
    };
    Duration::from_secs(capped.saturating_add(jitter))
}

/// A scheduled resync fires at most every 5 minutes regardless of errors
/// (spec.md §4.4).
pub const MAX_RESYNC: Duration = Duration::from_secs(300);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let d0 = backoff_duration(0).as_secs_f64();
        let d3 = backoff_duration(3).as_secs_f64();
        assert!(d0 >= 1.0 && d0 <= 1.1);
        assert!(d3 >= 8.0 && d3 <= 8.8);

        let capped = backoff_duration(20).as_secs_f64();
        assert!(capped >= 300.0 && capped <= 330.0);
    }
}
