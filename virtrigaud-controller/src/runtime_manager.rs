//! Provider runtime manager (spec.md §4.3): reconciles a `Provider` onto a
//! live worker Deployment + Service.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, ExecAction, HTTPGetAction, LifecycleHandler,
    PersistentVolumeClaim, PersistentVolumeClaimVolumeSource, PodSecurityContext, PodSpec,
    PodTemplateSpec, Probe, ResourceRequirements, SecretVolumeSource, SecurityContext, Service,
    ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use tracing::info;

use virtrigaud_types::common::MIGRATION_STORAGE_COMPONENT;
use virtrigaud_types::provider::{Provider, ProviderRuntimePhase};

use crate::error::Result;

const GRPC_PORT: i32 = 9443;
const METRICS_PORT: i32 = 8080;
const APPLY_MANAGER: &str = "virtrigaud-controller";

pub struct RuntimeOutcome {
    pub phase: ProviderRuntimePhase,
    pub endpoint: Option<String>,
    pub ready_replicas: i32,
    pub available_replicas: i32,
}

/// Drives the Deployment/Service for a Provider towards the spec and reports
/// the observed state (spec.md §4.3 steps 1-5).
pub async fn reconcile(client: &Client, provider: &Provider) -> Result<RuntimeOutcome> {
    let namespace = provider.namespace().unwrap_or_default();
    let name = provider.name_any();
    let worker_name = Provider::worker_name(&namespace, &name);

    let migration_pvcs = discover_migration_pvcs(client, &namespace).await?;

    let deployment = build_deployment(provider, &worker_name, &migration_pvcs);
    let service = build_service(provider, &worker_name);

    let deploy_api: Api<Deployment> = Api::namespaced(client.clone(), &namespace);
    let svc_api: Api<Service> = Api::namespaced(client.clone(), &namespace);
    let pp = PatchParams::apply(APPLY_MANAGER).force();

    let deployment = deploy_api
        .patch(&worker_name, &pp, &Patch::Apply(&deployment))
        .await?;
    svc_api
        .patch(&worker_name, &pp, &Patch::Apply(&service))
        .await?;

    let status = deployment.status.unwrap_or_default();
    let ready_replicas = status.ready_replicas.unwrap_or(0);
    let available_replicas = status.available_replicas.unwrap_or(0);

    if ready_replicas >= 1 {
        let port = provider.spec.runtime.service_port.unwrap_or(GRPC_PORT);
        Ok(RuntimeOutcome {
            phase: ProviderRuntimePhase::Running,
            endpoint: Some(format!("{worker_name}.{namespace}.svc.cluster.local:{port}")),
            ready_replicas,
            available_replicas,
        })
    } else {
        info!(provider = %name, namespace = %namespace, "worker not yet ready, requeueing");
        Ok(RuntimeOutcome {
            phase: ProviderRuntimePhase::Pending,
            endpoint: None,
            ready_replicas,
            available_replicas,
        })
    }
}

/// Deletes the worker Deployment/Service for a deleted Provider. Owner
/// references on transient sub-resources (e.g. the pod's ReplicaSet) handle
/// cascading cleanup; the Deployment and Service themselves are not owned by
/// anything and must be deleted explicitly (spec.md §4.3 step 6).
pub async fn teardown(client: &Client, provider: &Provider) -> Result<()> {
    let namespace = provider.namespace().unwrap_or_default();
    let worker_name = Provider::worker_name(&namespace, &provider.name_any());

    let deploy_api: Api<Deployment> = Api::namespaced(client.clone(), &namespace);
    let svc_api: Api<Service> = Api::namespaced(client.clone(), &namespace);

    let dp = kube::api::DeleteParams::default();
    match deploy_api.delete(&worker_name, &dp).await {
        Ok(_) => {}
        Err(kube::Error::Api(e)) if e.code == 404 => {}
        Err(e) => return Err(e.into()),
    }
    match svc_api.delete(&worker_name, &dp).await {
        Ok(_) => {}
        Err(kube::Error::Api(e)) if e.code == 404 => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn discover_migration_pvcs(client: &Client, namespace: &str) -> Result<Vec<String>> {
    let api: Api<PersistentVolumeClaim> = Api::namespaced(client.clone(), namespace);
    let lp = kube::api::ListParams::default().labels(&format!(
        "{}={}",
        virtrigaud_types::common::annotations::COMPONENT,
        MIGRATION_STORAGE_COMPONENT
    ));
    let list = api.list(&lp).await?;
    Ok(list.items.into_iter().map(|p| p.name_any()).collect())
}

fn build_labels(name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app.kubernetes.io/name".to_string(), "virtrigaud-provider".to_string());
    labels.insert("app.kubernetes.io/instance".to_string(), name.to_string());
    labels.insert("virtrigaud.io/provider".to_string(), name.to_string());
    labels
}

fn build_deployment(
    provider: &Provider,
    worker_name: &str,
    migration_pvcs: &[String],
) -> Deployment {
    let namespace = provider.namespace().unwrap_or_default();
    let labels = build_labels(worker_name);

    let mut volumes = vec![Volume {
        name: "credentials".to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(provider.spec.credential_ref.clone()),
            ..Default::default()
        }),
        ..Default::default()
    }];
    let mut mounts = vec![
        VolumeMount {
            name: "credentials".to_string(),
            mount_path: "/etc/virtrigaud/credentials".to_string(),
            read_only: Some(true),
            ..Default::default()
        },
        VolumeMount {
            name: "scratch".to_string(),
            mount_path: "/tmp".to_string(),
            ..Default::default()
        },
    ];
    volumes.push(Volume {
        name: "scratch".to_string(),
        empty_dir: Some(Default::default()),
        ..Default::default()
    });

    for pvc_name in migration_pvcs {
        let vol_name = format!("migration-{pvc_name}");
        volumes.push(Volume {
            name: vol_name.clone(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: pvc_name.clone(),
                read_only: Some(false),
            }),
            ..Default::default()
        });
        mounts.push(VolumeMount {
            name: vol_name,
            mount_path: format!("/mnt/migration-storage/{pvc_name}"),
            ..Default::default()
        });
    }

    let security_context = SecurityContext {
        run_as_non_root: Some(true),
        read_only_root_filesystem: Some(true),
        allow_privilege_escalation: Some(false),
        capabilities: Some(k8s_openapi::api::core::v1::Capabilities {
            drop: Some(vec!["ALL".to_string()]),
            add: None,
        }),
        ..Default::default()
    };

    let container = Container {
        name: "provider".to_string(),
        image: Some(provider.spec.runtime.image.clone()),
        ports: Some(vec![
            ContainerPort {
                name: Some("grpc".to_string()),
                container_port: GRPC_PORT,
                ..Default::default()
            },
            ContainerPort {
                name: Some("metrics".to_string()),
                container_port: METRICS_PORT,
                ..Default::default()
            },
        ]),
        env: Some(vec![EnvVar {
            name: "VIRTRIGAUD_PROVIDER_TYPE".to_string(),
            value: Some(provider.spec.type_.to_string()),
            ..Default::default()
        }]),
        volume_mounts: Some(mounts),
        security_context: Some(security_context),
        liveness_probe: Some(Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/healthz".to_string()),
                port: IntOrString::Int(METRICS_PORT),
                ..Default::default()
            }),
            initial_delay_seconds: Some(5),
            period_seconds: Some(10),
            ..Default::default()
        }),
        readiness_probe: Some(Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/readyz".to_string()),
                port: IntOrString::Int(METRICS_PORT),
                ..Default::default()
            }),
            initial_delay_seconds: Some(2),
            period_seconds: Some(5),
            ..Default::default()
        }),
        lifecycle: Some(k8s_openapi::api::core::v1::Lifecycle {
            pre_stop: Some(LifecycleHandler {
                exec: Some(ExecAction {
                    command: Some(vec!["sleep".to_string(), "15".to_string()]),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }),
        resources: Some(ResourceRequirements::default()),
        ..Default::default()
    };

    let pod_spec = PodSpec {
        containers: vec![container],
        volumes: Some(volumes),
        node_selector: Some(provider.spec.runtime.node_selector.clone().into_iter().collect()),
        security_context: Some(PodSecurityContext {
            run_as_non_root: Some(true),
            ..Default::default()
        }),
        termination_grace_period_seconds: Some(30),
        ..Default::default()
    };

    Deployment {
        metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
            name: Some(worker_name.to_string()),
            namespace: Some(namespace),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(provider.spec.runtime.replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(pod_spec),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn build_service(provider: &Provider, worker_name: &str) -> Service {
    let namespace = provider.namespace().unwrap_or_default();
    let labels = build_labels(worker_name);

    Service {
        metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
            name: Some(worker_name.to_string()),
            namespace: Some(namespace),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(labels),
            ports: Some(vec![
                ServicePort {
                    name: Some("grpc".to_string()),
                    port: provider.spec.runtime.service_port.unwrap_or(GRPC_PORT),
                    target_port: Some(IntOrString::Int(GRPC_PORT)),
                    ..Default::default()
                },
                ServicePort {
                    name: Some("metrics".to_string()),
                    port: METRICS_PORT,
                    target_port: Some(IntOrString::Int(METRICS_PORT)),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use virtrigaud_types::common::ProviderType;
    use virtrigaud_types::provider::{ProviderRuntimeSpec, ProviderSpec};

    fn test_provider() -> Provider {
        let mut provider = Provider::new(
            "vc-west",
            ProviderSpec {
                type_: ProviderType::Vsphere,
                endpoint: "vcenter.example.com".to_string(),
                credential_ref: "vc-west-creds".to_string(),
                insecure_skip_verify: false,
                runtime: ProviderRuntimeSpec {
                    image: "ghcr.io/virtrigaud/runtime:latest".to_string(),
                    replicas: 1,
                    service_port: None,
                    node_selector: Default::default(),
                    run_as_non_root: true,
                },
                runtime_mode: "Remote".to_string(),
            },
        );
        provider.metadata.namespace = Some("infra".to_string());
        provider
    }

    #[test]
    fn build_labels_identifies_the_provider() {
        let labels = build_labels("virtrigaud-provider-infra-vc-west");
        assert_eq!(labels.get("app.kubernetes.io/name").unwrap(), "virtrigaud-provider");
        assert_eq!(
            labels.get("virtrigaud.io/provider").unwrap(),
            "virtrigaud-provider-infra-vc-west"
        );
    }

    #[test]
    fn build_service_exposes_grpc_and_metrics_ports() {
        let provider = test_provider();
        let worker_name = Provider::worker_name("infra", &provider.name_any());
        let service = build_service(&provider, &worker_name);

        let ports = service.spec.unwrap().ports.unwrap();
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].port, GRPC_PORT);
        assert_eq!(ports[1].port, METRICS_PORT);
    }

    #[test]
    fn build_deployment_mounts_discovered_migration_pvcs() {
        let provider = test_provider();
        let worker_name = Provider::worker_name("infra", &provider.name_any());
        let pvcs = vec!["migration-abc123".to_string()];
        let deployment = build_deployment(&provider, &worker_name, &pvcs);

        let pod_spec = deployment.spec.unwrap().template.spec.unwrap();
        let container = &pod_spec.containers[0];

        assert!(pod_spec
            .volumes
            .as_ref()
            .unwrap()
            .iter()
            .any(|v| v.name == "migration-migration-abc123"));
        assert!(container
            .volume_mounts
            .as_ref()
            .unwrap()
            .iter()
            .any(|m| m.mount_path == "/mnt/migration-storage/migration-abc123"));
    }
}
