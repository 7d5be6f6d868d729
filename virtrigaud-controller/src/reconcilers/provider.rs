//! Provider reconciler: drives the runtime manager and gates adoption
//! (spec.md §4.3, §4.7).

use std::sync::Arc;
use std::time::Duration;

use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use tracing::warn;

use virtrigaud_types::common::annotations;
use virtrigaud_types::condition::{condition_types, reasons, set_condition, ConditionStatus};
use virtrigaud_types::provider::{Provider, ProviderRuntimePhase};

use crate::error::{Error, Result};
use crate::finalizer;
use crate::metrics;
use crate::reconcilers::{adoption, backoff_duration, Ctx, MAX_RESYNC};
use crate::runtime_manager;

pub async fn reconcile(provider: Arc<Provider>, ctx: Arc<Ctx>) -> Result<Action> {
    let start = std::time::Instant::now();
    let name = provider.name_any();
    let namespace = provider
        .namespace()
        .ok_or_else(|| Error::InvalidSpec("Provider must be namespaced".to_string()))?;
    let api: Api<Provider> = Api::namespaced(ctx.client.clone(), &namespace);

    let result = run(&provider, &namespace, &name, &api, &ctx).await;

    let outcome = match &result {
        Ok(_) => "success",
        Err(e) if !e.is_retryable() => "terminal",
        Err(_) => "error",
    };
    metrics::observe_reconcile("Provider", outcome, start.elapsed().as_secs_f64());

    result
}

pub fn on_error(_provider: Arc<Provider>, error: &Error, _ctx: Arc<Ctx>) -> Action {
    warn!(error = %error, "Provider reconcile failed");
    metrics::record_error("reconcile_error", "provider");
    Action::requeue(backoff_duration(0))
}

async fn run(
    provider: &Provider,
    namespace: &str,
    name: &str,
    api: &Api<Provider>,
    ctx: &Ctx,
) -> Result<Action> {
    if finalizer::is_deleting(provider) {
        runtime_manager::teardown(&ctx.client, provider).await?;
        ctx.resolver.evict(namespace, name).await;
        finalizer::remove(api, provider).await?;
        return Ok(Action::await_change());
    }
    if !finalizer::has_finalizer(provider) {
        finalizer::add(api, provider).await?;
        return Ok(Action::requeue(Duration::ZERO));
    }

    if !provider.is_remote_mode() {
        let mut status = provider.status.clone().unwrap_or_default();
        status.observed_generation = provider.metadata.generation.unwrap_or(0);
        set_condition(
            &mut status.conditions,
            condition_types::READY,
            ConditionStatus::False,
            reasons::INVALID_SPEC,
            "only runtimeMode=Remote is supported",
            provider.metadata.generation.unwrap_or(0),
        );
        write_status(api, name, status).await?;
        return Ok(Action::await_change());
    }

    if provider.spec.runtime.image.is_empty() {
        return invalid_spec(api, provider, name, "runtime.image must be set").await;
    }

    let outcome = match runtime_manager::reconcile(&ctx.client, provider).await {
        Ok(o) => o,
        Err(e) => {
            warn!(error = %e, "runtime manager reconcile failed");
            return Ok(Action::requeue(backoff_duration(0)));
        }
    };

    let mut status = provider.status.clone().unwrap_or_default();
    status.observed_generation = provider.metadata.generation.unwrap_or(0);
    status.runtime.phase = outcome.phase;
    status.runtime.endpoint = outcome.endpoint.clone();
    status.runtime.ready_replicas = outcome.ready_replicas;
    status.runtime.available_replicas = outcome.available_replicas;

    let requeue = if outcome.phase == ProviderRuntimePhase::Running {
        set_condition(
            &mut status.conditions,
            condition_types::PROVIDER_RUNTIME_READY,
            ConditionStatus::True,
            reasons::RECONCILE_SUCCEEDED,
            "worker deployment ready",
            provider.metadata.generation.unwrap_or(0),
        );
        set_condition(
            &mut status.conditions,
            condition_types::PROVIDER_AVAILABLE,
            ConditionStatus::True,
            reasons::RECONCILE_SUCCEEDED,
            "provider available",
            provider.metadata.generation.unwrap_or(0),
        );
        status.healthy = true;
        status.last_health_check = Some(chrono::Utc::now());

        if provider
            .annotations()
            .get(annotations::ADOPT_VMS)
            .map(|v| v == "true")
            .unwrap_or(false)
        {
            match adoption::run(&ctx.client, &ctx.resolver, provider).await {
                Ok(adoption_status) => status.adoption = Some(adoption_status),
                Err(e) => warn!(error = %e, "adoption pass failed"),
            }
        }

        MAX_RESYNC
    } else {
        set_condition(
            &mut status.conditions,
            condition_types::PROVIDER_RUNTIME_READY,
            ConditionStatus::False,
            reasons::PROVIDER_UNAVAILABLE,
            "waiting for worker deployment to become ready",
            provider.metadata.generation.unwrap_or(0),
        );
        status.healthy = false;
        Duration::from_secs(30)
    };

    write_status(api, name, status).await?;
    Ok(Action::requeue(requeue))
}

async fn invalid_spec(
    api: &Api<Provider>,
    provider: &Provider,
    name: &str,
    message: &str,
) -> Result<Action> {
    let mut status = provider.status.clone().unwrap_or_default();
    status.observed_generation = provider.metadata.generation.unwrap_or(0);
    set_condition(
        &mut status.conditions,
        condition_types::READY,
        ConditionStatus::False,
        reasons::INVALID_SPEC,
        message,
        provider.metadata.generation.unwrap_or(0),
    );
    write_status(api, name, status).await?;
    Ok(Action::await_change())
}

async fn write_status(
    api: &Api<Provider>,
    name: &str,
    status: virtrigaud_types::provider::ProviderStatus,
) -> Result<()> {
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}
