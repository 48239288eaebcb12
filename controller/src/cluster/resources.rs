//! Kubernetes objects submitted by the controller
//!
//! Thin accessors over the `k8s-openapi` types so callers do not have to walk
//! the optional fields by hand.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, Service};

/// The replicated workload running a model server
pub type WorkloadResource = Deployment;

/// The node-port service exposing a workload
pub type ServiceResource = Service;

pub trait WorkloadExt {
    /// The single container of the pod template
    fn container(&self) -> Option<&Container>;

    fn replicas(&self) -> Option<i32>;
}

impl WorkloadExt for WorkloadResource {
    fn container(&self) -> Option<&Container> {
        self.spec.as_ref()?.template.spec.as_ref()?.containers.first()
    }

    fn replicas(&self) -> Option<i32> {
        self.spec.as_ref()?.replicas
    }
}

pub trait ServiceExt {
    /// Every `port` the service exposes
    fn ports(&self) -> Vec<u16>;

    /// Every `nodePort` the service exposes
    fn node_ports(&self) -> Vec<u16>;

    /// The first `nodePort`
    fn node_port(&self) -> Option<u16> {
        self.node_ports().first().copied()
    }
}

impl ServiceExt for ServiceResource {
    fn ports(&self) -> Vec<u16> {
        service_ports(self)
            .filter_map(|p| u16::try_from(p.port).ok())
            .collect()
    }

    fn node_ports(&self) -> Vec<u16> {
        service_ports(self)
            .filter_map(|p| p.node_port.and_then(|n| u16::try_from(n).ok()))
            .collect()
    }
}

fn service_ports(
    service: &ServiceResource,
) -> impl Iterator<Item = &k8s_openapi::api::core::v1::ServicePort> {
    service
        .spec
        .iter()
        .flat_map(|spec| spec.ports.iter().flatten())
}

/// Value of a plain environment variable
pub fn env_value<'a>(container: &'a Container, name: &str) -> Option<&'a str> {
    container
        .env
        .iter()
        .flatten()
        .find(|e| e.name == name)
        .and_then(|e| e.value.as_deref())
}
