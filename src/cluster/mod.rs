//! Cluster capability consumed by the orchestrator.
//!
//! Everything the orchestrator needs from Kubernetes goes through
//! [`ClusterApi`], scoped to the single namespace sandboxes live in. The
//! production implementation talks to the API server through `kube`; tests
//! use an in-memory double.

mod error;
mod kubernetes;
#[cfg(test)]
pub(crate) mod memory;

pub(crate) use kubernetes::KubeCluster;
pub use error::ClusterError;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod, Service};
use k8s_openapi::api::networking::v1::Ingress;

use crate::compose::IngressRoute;

/// Kinds of namespaced objects removed on teardown. Storage claims are
/// never deleted, so they have no kind here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    ConfigMap,
    Deployment,
    Service,
    Ingress,
    IngressRoute,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfigMap => write!(f, "configmap"),
            Self::Deployment => write!(f, "deployment"),
            Self::Service => write!(f, "service"),
            Self::Ingress => write!(f, "ingress"),
            Self::IngressRoute => write!(f, "ingressroute"),
        }
    }
}

/// Operations against the sandbox namespace.
///
/// Lookups return `Ok(None)` for missing objects and `delete` returns
/// `Ok(false)`, so callers never have to inspect status codes.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Creates the namespace unless it already exists.
    async fn ensure_namespace(&self) -> Result<(), ClusterError>;

    async fn get_claim(&self, name: &str) -> Result<Option<PersistentVolumeClaim>, ClusterError>;

    async fn create_claim(&self, claim: &PersistentVolumeClaim) -> Result<(), ClusterError>;

    async fn get_config_map(&self, name: &str) -> Result<Option<ConfigMap>, ClusterError>;

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<(), ClusterError>;

    async fn get_deployment(&self, name: &str) -> Result<Option<Deployment>, ClusterError>;

    /// Lists deployments, optionally restricted by an equality label selector.
    async fn list_deployments(&self, selector: Option<&str>)
        -> Result<Vec<Deployment>, ClusterError>;

    async fn create_deployment(&self, deployment: &Deployment) -> Result<(), ClusterError>;

    async fn list_pods(&self, selector: &str) -> Result<Vec<Pod>, ClusterError>;

    async fn create_service(&self, service: &Service) -> Result<(), ClusterError>;

    async fn create_ingress(&self, ingress: &Ingress) -> Result<(), ClusterError>;

    async fn create_ingress_route(&self, route: &IngressRoute) -> Result<(), ClusterError>;

    /// Deletes an object. Returns whether it existed.
    async fn delete(&self, kind: ResourceKind, name: &str) -> Result<bool, ClusterError>;
}
