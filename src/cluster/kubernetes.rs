//! `kube`-backed cluster access.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, PersistentVolumeClaim, Pod, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, PostParams,
};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use super::{ClusterApi, ClusterError, ResourceKind};
use crate::compose::{IngressRoute, INGRESS_ROUTE_GROUP, INGRESS_ROUTE_KIND, INGRESS_ROUTE_VERSION};

/// Talks to the API server selected by the ambient kubeconfig or in-cluster
/// service account.
#[derive(Clone)]
pub(crate) struct KubeCluster {
    client: Client,
    namespace: String,
    timeout: Option<Duration>,
    ingress_routes: ApiResource,
}

impl KubeCluster {
    /// Connects using in-cluster credentials, falling back to `~/.kube/config`.
    pub async fn connect(namespace: &str, timeout: Option<Duration>) -> Result<Self, ClusterError> {
        let client = Client::try_default().await?;
        Ok(Self::new(client, namespace, timeout))
    }

    pub fn new(client: Client, namespace: &str, timeout: Option<Duration>) -> Self {
        let gvk = GroupVersionKind::gvk(INGRESS_ROUTE_GROUP, INGRESS_ROUTE_VERSION, INGRESS_ROUTE_KIND);
        Self {
            client,
            namespace: namespace.to_string(),
            timeout,
            ingress_routes: ApiResource::from_gvk_with_plural(&gvk, "ingressroutes"),
        }
    }

    fn api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn routes(&self) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), &self.namespace, &self.ingress_routes)
    }

    /// Runs one API call under the configured timeout.
    async fn call<T, F>(&self, fut: F) -> Result<T, ClusterError>
    where
        F: Future<Output = Result<T, kube::Error>>,
    {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| ClusterError::timeout(limit))?
                .map_err(ClusterError::from),
            None => fut.await.map_err(ClusterError::from),
        }
    }

    async fn get_opt<K>(&self, name: &str) -> Result<Option<K>, ClusterError>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Debug,
        <K as Resource>::DynamicType: Default,
    {
        self.call(self.api::<K>().get_opt(name)).await
    }

    async fn create<K>(&self, object: &K) -> Result<(), ClusterError>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + Serialize
            + DeserializeOwned
            + Debug,
        <K as Resource>::DynamicType: Default,
    {
        debug!(
            kind = %K::kind(&Default::default()),
            name = object.meta().name.as_deref().unwrap_or_default(),
            "Creating object"
        );
        self.call(self.api::<K>().create(&PostParams::default(), object))
            .await
            .map(|_| ())
    }

    async fn delete_typed<K>(&self, name: &str) -> Result<bool, ClusterError>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let result = self
            .call(self.api::<K>().delete(name, &DeleteParams::default()))
            .await;
        absent_is_false(result.map(|_| ()))
    }
}

/// Maps a 404 on delete to `Ok(false)`.
fn absent_is_false(result: Result<(), ClusterError>) -> Result<bool, ClusterError> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn ensure_namespace(&self) -> Result<(), ClusterError> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        if self.call(namespaces.get_opt(&self.namespace)).await?.is_some() {
            return Ok(());
        }

        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(self.namespace.clone()),
                ..Default::default()
            },
            ..Default::default()
        };
        match self
            .call(namespaces.create(&PostParams::default(), &namespace))
            .await
        {
            Ok(_) => Ok(()),
            // Lost a race with a concurrent create
            Err(e) if e.is_conflict() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn get_claim(&self, name: &str) -> Result<Option<PersistentVolumeClaim>, ClusterError> {
        self.get_opt(name).await
    }

    async fn create_claim(&self, claim: &PersistentVolumeClaim) -> Result<(), ClusterError> {
        self.create(claim).await
    }

    async fn get_config_map(&self, name: &str) -> Result<Option<ConfigMap>, ClusterError> {
        self.get_opt(name).await
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<(), ClusterError> {
        self.create(config_map).await
    }

    async fn get_deployment(&self, name: &str) -> Result<Option<Deployment>, ClusterError> {
        self.get_opt(name).await
    }

    async fn list_deployments(
        &self,
        selector: Option<&str>,
    ) -> Result<Vec<Deployment>, ClusterError> {
        let params = match selector {
            Some(selector) => ListParams::default().labels(selector),
            None => ListParams::default(),
        };
        let list = self.call(self.api::<Deployment>().list(&params)).await?;
        Ok(list.items)
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<(), ClusterError> {
        self.create(deployment).await
    }

    async fn list_pods(&self, selector: &str) -> Result<Vec<Pod>, ClusterError> {
        let params = ListParams::default().labels(selector);
        let list = self.call(self.api::<Pod>().list(&params)).await?;
        Ok(list.items)
    }

    async fn create_service(&self, service: &Service) -> Result<(), ClusterError> {
        self.create(service).await
    }

    async fn create_ingress(&self, ingress: &Ingress) -> Result<(), ClusterError> {
        self.create(ingress).await
    }

    async fn create_ingress_route(&self, route: &IngressRoute) -> Result<(), ClusterError> {
        let spec = serde_json::to_value(&route.spec).map_err(|source| ClusterError::Encode {
            kind: INGRESS_ROUTE_KIND,
            source,
        })?;
        let mut object = DynamicObject::new(&route.name, &self.ingress_routes)
            .within(&self.namespace)
            .data(serde_json::json!({ "spec": spec }));
        object.metadata.labels = Some(route.labels.clone());

        debug!(name = %route.name, "Creating IngressRoute");
        self.call(self.routes().create(&PostParams::default(), &object))
            .await
            .map(|_| ())
    }

    async fn delete(&self, kind: ResourceKind, name: &str) -> Result<bool, ClusterError> {
        debug!(%kind, name, "Deleting object");
        match kind {
            ResourceKind::ConfigMap => self.delete_typed::<ConfigMap>(name).await,
            ResourceKind::Deployment => self.delete_typed::<Deployment>(name).await,
            ResourceKind::Service => self.delete_typed::<Service>(name).await,
            ResourceKind::Ingress => self.delete_typed::<Ingress>(name).await,
            ResourceKind::IngressRoute => {
                let result = self
                    .call(self.routes().delete(name, &DeleteParams::default()))
                    .await;
                absent_is_false(result.map(|_| ()))
            }
        }
    }
}
