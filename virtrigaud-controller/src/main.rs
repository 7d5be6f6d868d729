//! # virtrigaud-controller
//!
//! The control plane: watches the seven VirtRigaud custom resources and
//! reconciles them onto provider worker processes over gRPC.
//!
//! ## Usage
//! ```bash
//! virtrigaud-controller --config /etc/virtrigaud/controller.yaml
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use futures::StreamExt;
use kube::runtime::watcher;
use kube::runtime::Controller;
use kube::{Api, Client};
use tracing::{error, info, warn};

mod cli;
mod config;
mod error;
mod finalizer;
mod health;
mod leader;
mod metrics;
mod reconcilers;
mod resolver;
mod runtime_manager;

use cli::Args;
use config::Config;
use reconcilers::Ctx;
use resolver::Resolver;

use virtrigaud_types::migration::VMMigration;
use virtrigaud_types::provider::Provider;
use virtrigaud_types::set::VMSet;
use virtrigaud_types::vm::VirtualMachine;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.log_format == "json" {
        virtrigaud_common::init_logging_json(&args.log_level)?;
    } else {
        virtrigaud_common::init_logging(&args.log_level)?;
    }

    info!(version = env!("CARGO_PKG_VERSION"), "starting virtrigaud-controller");

    let default_config_path = "/etc/virtrigaud/controller.yaml";
    let config = match Config::load(&args.config) {
        Ok(cfg) => {
            info!(config_path = %args.config, "configuration loaded");
            cfg
        }
        Err(_) if args.config == default_config_path => {
            info!("no config file found, using defaults");
            Config::default()
        }
        Err(e) => {
            error!(error = %e, path = %args.config, "failed to load configuration");
            return Err(e);
        }
    };
    let config = config.with_cli_overrides(&args);

    metrics::register()?;

    let client = Client::try_default().await?;
    let ready = health::ReadyState::new();

    let health_ready = ready.clone();
    let health_listen = config.metrics.listen_address.clone();
    tokio::spawn(async move {
        if let Err(e) = health::run(&health_listen, health_ready).await {
            error!(error = %e, "health/metrics server exited");
        }
    });

    if config.leader_election.enabled {
        let elector = leader::LeaderElector::new(
            client.clone(),
            config.leader_election.lease_namespace.clone(),
            config.leader_election.lease_name.clone(),
            Duration::from_secs(config.leader_election.lease_duration_seconds),
            Duration::from_secs(config.leader_election.renew_deadline_seconds),
            Duration::from_secs(config.leader_election.retry_period_seconds),
        );
        info!(identity = %elector.identity(), "waiting to acquire leader lease");
        elector.acquire().await?;
        ready.set_ready(true);

        let renewal_elector = elector;
        tokio::spawn(async move {
            if let Err(e) = renewal_elector.run_renewal().await {
                error!(error = %e, "lost leadership, exiting");
                std::process::exit(1);
            }
        });
    } else {
        ready.set_ready(true);
    }

    let resolver = Resolver::new();
    let ctx = Ctx::new(client.clone(), resolver);

    run_controllers(client, ctx, &config).await;

    Ok(())
}

async fn run_controllers(client: Client, ctx: Arc<Ctx>, config: &Config) {
    let namespace = config.namespace.clone();

    let vm_api: Api<VirtualMachine> = api_for(&client, &namespace);
    let provider_api: Api<Provider> = api_for(&client, &namespace);
    let migration_api: Api<VMMigration> = api_for(&client, &namespace);
    let set_api: Api<VMSet> = api_for(&client, &namespace);

    // Scheduled resyncs of idle objects are bounded by `reconcilers::MAX_RESYNC`,
    // requeued explicitly from each reconciler rather than driven by the watcher.
    let vm_ctx = ctx.clone();
    let vm_concurrency = config.reconcile.vm_concurrency;
    let vm_task = tokio::spawn(async move {
        Controller::new(vm_api, watcher::Config::default())
            .shutdown_on_signal()
            .run(reconcilers::vm::reconcile, reconcilers::vm::on_error, vm_ctx)
            .for_each_concurrent(vm_concurrency, |res| async move {
                log_reconcile_result("VirtualMachine", res);
            })
            .await;
    });

    let provider_ctx = ctx.clone();
    let provider_concurrency = config.reconcile.provider_concurrency;
    let provider_task = tokio::spawn(async move {
        Controller::new(provider_api, watcher::Config::default())
            .shutdown_on_signal()
            .run(reconcilers::provider::reconcile, reconcilers::provider::on_error, provider_ctx)
            .for_each_concurrent(provider_concurrency, |res| async move {
                log_reconcile_result("Provider", res);
            })
            .await;
    });

    let migration_ctx = ctx.clone();
    let migration_concurrency = config.reconcile.migration_concurrency;
    let migration_task = tokio::spawn(async move {
        Controller::new(migration_api, watcher::Config::default())
            .shutdown_on_signal()
            .run(reconcilers::migration::reconcile, reconcilers::migration::on_error, migration_ctx)
            .for_each_concurrent(migration_concurrency, |res| async move {
                log_reconcile_result("VMMigration", res);
            })
            .await;
    });

    let set_ctx = ctx.clone();
    let set_concurrency = config.reconcile.set_concurrency;
    let set_task = tokio::spawn(async move {
        Controller::new(set_api, watcher::Config::default())
            .shutdown_on_signal()
            .run(reconcilers::set::reconcile, reconcilers::set::on_error, set_ctx)
            .for_each_concurrent(set_concurrency, |res| async move {
                log_reconcile_result("VMSet", res);
            })
            .await;
    });

    let shutdown_grace = Duration::from_secs(config.reconcile.shutdown_grace_seconds);
    tokio::select! {
        _ = vm_task => warn!("VirtualMachine controller loop exited"),
        _ = provider_task => warn!("Provider controller loop exited"),
        _ = migration_task => warn!("VMMigration controller loop exited"),
        _ = set_task => warn!("VMSet controller loop exited"),
    }

    info!(grace = ?shutdown_grace, "draining and closing provider connections");
    tokio::time::sleep(shutdown_grace.min(Duration::from_secs(1))).await;
    ctx.resolver.close_all().await;
}

fn api_for<K>(client: &Client, namespace: &Option<String>) -> Api<K>
where
    K: kube::Resource<Scope = kube::core::NamespaceResourceScope> + serde::de::DeserializeOwned + Clone + std::fmt::Debug,
    <K as kube::Resource>::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

fn log_reconcile_result<K, E>(
    kind: &str,
    res: std::result::Result<(kube::runtime::reflector::ObjectRef<K>, kube::runtime::controller::Action), E>,
) where
    K: kube::Resource,
    E: std::fmt::Display,
{
    match res {
        Ok((obj, _)) => info!(kind, object = %obj.name, "reconciled"),
        Err(e) => warn!(kind, error = %e, "reconcile failed"),
    }
}
