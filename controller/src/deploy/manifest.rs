//! Workload and service manifests for a deployment

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::DeploymentSpec;
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PersistentVolumeClaimVolumeSource, PodSpec,
    PodTemplateSpec, ResourceRequirements, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::cluster::resources::{ServiceResource, WorkloadResource};
use crate::http::registry::ArtifactUri;
use crate::models::deployment::{service_name, Deployment, DeploymentImage, DeploymentTarget};

/// Port the model server listens on inside the container
pub const CONTAINER_PORT: i32 = 80;

pub const MODEL_ENV_VAR: &str = "MLEAP_MODEL";
pub const APP_LABEL: &str = "app";
pub const VERSION_LABEL: &str = "seed/deployment-version";

pub const STORAGE_VOLUME: &str = "hdfs-pvc";
pub const STORAGE_MOUNT_PATH: &str = "/srv/storage/";

type Labels = BTreeMap<String, String>;

/// CPU quantities are expressed in millicores
pub fn normalize_cpu(value: &str) -> String {
    if value.ends_with('m') {
        value.to_string()
    } else {
        format!("{}m", value)
    }
}

fn quantities(cpu: Option<&str>, memory: Option<&str>) -> Option<BTreeMap<String, Quantity>> {
    let mut map = BTreeMap::new();
    if let Some(cpu) = cpu.filter(|v| !v.is_empty()) {
        map.insert("cpu".to_string(), Quantity(normalize_cpu(cpu)));
    }
    if let Some(memory) = memory.filter(|v| !v.is_empty()) {
        map.insert("memory".to_string(), Quantity(memory.to_string()));
    }
    (!map.is_empty()).then_some(map)
}

/// Build the replicated workload running `image` with the model at `model_uri`
pub fn build_workload_spec(
    deployment: &Deployment,
    image: &DeploymentImage,
    target: &DeploymentTarget,
    model_uri: &ArtifactUri,
) -> WorkloadResource {
    let name = deployment.resolved_internal_name();
    let version = deployment.version.to_string();

    let (volumes, volume_mounts) = if model_uri.scheme() == "file" {
        (
            Some(vec![Volume {
                name: STORAGE_VOLUME.to_string(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: STORAGE_VOLUME.to_string(),
                    read_only: None,
                }),
                ..Default::default()
            }]),
            Some(vec![VolumeMount {
                name: STORAGE_VOLUME.to_string(),
                mount_path: STORAGE_MOUNT_PATH.to_string(),
                ..Default::default()
            }]),
        )
    } else {
        (None, None)
    };

    let container = Container {
        name: name.clone(),
        image: Some(image.reference()),
        image_pull_policy: Some("Always".to_string()),
        ports: Some(vec![ContainerPort {
            container_port: CONTAINER_PORT,
            ..Default::default()
        }]),
        resources: Some(ResourceRequirements {
            requests: quantities(
                deployment.request_cpu.as_deref(),
                Some(deployment.request_memory.as_str()),
            ),
            limits: quantities(
                deployment.limit_cpu.as_deref(),
                deployment.limit_memory.as_deref(),
            ),
            ..Default::default()
        }),
        env: Some(vec![EnvVar {
            name: MODEL_ENV_VAR.to_string(),
            value: Some(model_uri.as_str().to_string()),
            value_from: None,
        }]),
        volume_mounts,
        ..Default::default()
    };

    let pod_labels = Labels::from([
        (APP_LABEL.to_string(), name.clone()),
        (VERSION_LABEL.to_string(), version.clone()),
    ]);

    WorkloadResource {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(target.namespace.clone()),
            labels: Some(Labels::from([(VERSION_LABEL.to_string(), version)])),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(i32::try_from(deployment.replicas).unwrap_or(i32::MAX)),
            selector: LabelSelector {
                match_labels: Some(Labels::from([(APP_LABEL.to_string(), name)])),
                match_expressions: None,
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes,
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

/// Build the node-port service exposing a deployment's workload on `port`
pub fn build_service_spec(
    deployment: &Deployment,
    target: &DeploymentTarget,
    port: u16,
) -> ServiceResource {
    let internal_name = deployment.resolved_internal_name();

    ServiceResource {
        metadata: ObjectMeta {
            name: Some(service_name(&internal_name)),
            namespace: Some(target.namespace.clone()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(Labels::from([(APP_LABEL.to_string(), internal_name)])),
            ports: Some(vec![ServicePort {
                name: Some("api".to_string()),
                node_port: Some(i32::from(port)),
                port: CONTAINER_PORT,
                target_port: Some(IntOrString::Int(CONTAINER_PORT)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            type_: Some("NodePort".to_string()),
            ..Default::default()
        }),
        status: None,
    }
}
