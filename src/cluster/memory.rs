//! In-memory cluster for tests.
//!
//! Stores objects per kind, records every call in order, and can be told to
//! fail chosen calls so partial-failure paths are reachable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::core::ErrorResponse;
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{ClusterApi, ClusterError, ResourceKind};
use crate::compose::IngressRoute;

#[derive(Debug, Default)]
struct Store {
    namespace_ready: bool,
    claims: BTreeMap<String, PersistentVolumeClaim>,
    config_maps: BTreeMap<String, ConfigMap>,
    deployments: BTreeMap<String, Deployment>,
    services: BTreeMap<String, Service>,
    ingresses: BTreeMap<String, Ingress>,
    routes: BTreeMap<String, IngressRoute>,
    pods: Vec<Pod>,
    calls: Vec<String>,
    /// Call prefixes to fail, with the HTTP status to fail them with.
    failures: Vec<(String, Option<u16>)>,
}

impl Store {
    /// Records `call` and fails it if it was marked as failing.
    fn record(&mut self, call: String) -> Result<(), ClusterError> {
        let failure = self
            .failures
            .iter()
            .find(|(prefix, _)| call.starts_with(prefix.as_str()))
            .map(|(_, code)| *code);
        self.calls.push(call.clone());
        match failure {
            None => Ok(()),
            Some(None) => Err(ClusterError::rejected(format!("injected failure: {call}"))),
            Some(Some(code)) => Err(status_error(code, "Injected", &call)),
        }
    }

    fn contains(&self, kind: ResourceKind, name: &str) -> bool {
        match kind {
            ResourceKind::ConfigMap => self.config_maps.contains_key(name),
            ResourceKind::Deployment => self.deployments.contains_key(name),
            ResourceKind::Service => self.services.contains_key(name),
            ResourceKind::Ingress => self.ingresses.contains_key(name),
            ResourceKind::IngressRoute => self.routes.contains_key(name),
        }
    }

    fn remove(&mut self, kind: ResourceKind, name: &str) -> bool {
        match kind {
            ResourceKind::ConfigMap => self.config_maps.remove(name).is_some(),
            ResourceKind::Deployment => self.deployments.remove(name).is_some(),
            ResourceKind::Service => self.services.remove(name).is_some(),
            ResourceKind::Ingress => self.ingresses.remove(name).is_some(),
            ResourceKind::IngressRoute => self.routes.remove(name).is_some(),
        }
    }
}

/// A [`ClusterApi`] backed by maps.
#[derive(Debug)]
pub(crate) struct InMemoryCluster {
    store: Mutex<Store>,
    now: Mutex<DateTime<Utc>>,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self {
            store: Mutex::new(Store::default()),
            now: Mutex::new(Utc::now()),
        }
    }

    /// Sets the clock used to stamp created deployments.
    pub fn set_now(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    /// Makes every call whose record starts with `call` fail,
    /// e.g. `"create service"` or `"delete deployment alice-deployment"`.
    pub fn fail_on(&self, call: &str) {
        self.store
            .lock()
            .unwrap()
            .failures
            .push((call.to_string(), None));
    }

    /// Like [`fail_on`](Self::fail_on), but fails with an API error carrying
    /// the HTTP status `code`.
    pub fn fail_with_status(&self, call: &str, code: u16) {
        self.store
            .lock()
            .unwrap()
            .failures
            .push((call.to_string(), Some(code)));
    }

    /// Calls made so far, as `"<verb> <kind> <name>"`.
    pub fn calls(&self) -> Vec<String> {
        self.store.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.store.lock().unwrap().calls.clear();
    }

    pub fn add_deployment(&self, deployment: Deployment) {
        let name = deployment.metadata.name.clone().unwrap_or_default();
        self.store
            .lock()
            .unwrap()
            .deployments
            .insert(name, deployment);
    }

    pub fn add_config_map(&self, config_map: ConfigMap) {
        let name = config_map.metadata.name.clone().unwrap_or_default();
        self.store
            .lock()
            .unwrap()
            .config_maps
            .insert(name, config_map);
    }

    pub fn add_pod(&self, pod: Pod) {
        self.store.lock().unwrap().pods.push(pod);
    }

    pub fn exists(&self, kind: ResourceKind, name: &str) -> bool {
        self.store.lock().unwrap().contains(kind, name)
    }

    pub fn has_claim(&self, name: &str) -> bool {
        self.store.lock().unwrap().claims.contains_key(name)
    }

    pub fn deployment(&self, name: &str) -> Option<Deployment> {
        self.store.lock().unwrap().deployments.get(name).cloned()
    }

    pub fn config_map(&self, name: &str) -> Option<ConfigMap> {
        self.store.lock().unwrap().config_maps.get(name).cloned()
    }

    pub fn route(&self, name: &str) -> Option<IngressRoute> {
        self.store.lock().unwrap().routes.get(name).cloned()
    }

    pub fn namespace_ready(&self) -> bool {
        self.store.lock().unwrap().namespace_ready
    }

    /// Total number of stored objects, pods excluded.
    pub fn object_count(&self) -> usize {
        let store = self.store.lock().unwrap();
        store.claims.len()
            + store.config_maps.len()
            + store.deployments.len()
            + store.services.len()
            + store.ingresses.len()
            + store.routes.len()
    }

    fn insert<T>(
        &self,
        kind: &str,
        meta: &ObjectMeta,
        object: T,
        pick: impl FnOnce(&mut Store) -> &mut BTreeMap<String, T>,
    ) -> Result<(), ClusterError> {
        let name = meta.name.clone().unwrap_or_default();
        let mut store = self.store.lock().unwrap();
        store.record(format!("create {kind} {name}"))?;
        let objects = pick(&mut store);
        if objects.contains_key(&name) {
            return Err(status_error(409, "AlreadyExists", &format!("{kind} {name}")));
        }
        objects.insert(name, object);
        Ok(())
    }
}

fn status_error(code: u16, reason: &str, what: &str) -> ClusterError {
    ClusterError::Api(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{what}: {reason}"),
        reason: reason.to_string(),
        code,
    }))
}

/// Matches equality selectors of the form `k=v,k2=v2`.
fn matches_selector(labels: Option<&BTreeMap<String, String>>, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => {
                labels.and_then(|l| l.get(key)).map(String::as_str) == Some(value)
            }
            None => false,
        })
}

#[async_trait]
impl ClusterApi for InMemoryCluster {
    async fn ensure_namespace(&self) -> Result<(), ClusterError> {
        let mut store = self.store.lock().unwrap();
        store.record("ensure namespace".to_string())?;
        store.namespace_ready = true;
        Ok(())
    }

    async fn get_claim(&self, name: &str) -> Result<Option<PersistentVolumeClaim>, ClusterError> {
        let mut store = self.store.lock().unwrap();
        store.record(format!("get persistentvolumeclaim {name}"))?;
        Ok(store.claims.get(name).cloned())
    }

    async fn create_claim(&self, claim: &PersistentVolumeClaim) -> Result<(), ClusterError> {
        self.insert(
            "persistentvolumeclaim",
            &claim.metadata,
            claim.clone(),
            |s| &mut s.claims,
        )
    }

    async fn get_config_map(&self, name: &str) -> Result<Option<ConfigMap>, ClusterError> {
        let mut store = self.store.lock().unwrap();
        store.record(format!("get configmap {name}"))?;
        Ok(store.config_maps.get(name).cloned())
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<(), ClusterError> {
        self.insert(
            &ResourceKind::ConfigMap.to_string(),
            &config_map.metadata,
            config_map.clone(),
            |s| &mut s.config_maps,
        )
    }

    async fn get_deployment(&self, name: &str) -> Result<Option<Deployment>, ClusterError> {
        let mut store = self.store.lock().unwrap();
        store.record(format!("get deployment {name}"))?;
        Ok(store.deployments.get(name).cloned())
    }

    async fn list_deployments(
        &self,
        selector: Option<&str>,
    ) -> Result<Vec<Deployment>, ClusterError> {
        let mut store = self.store.lock().unwrap();
        store.record("list deployment".to_string())?;
        Ok(store
            .deployments
            .values()
            .filter(|d| selector.map_or(true, |s| matches_selector(d.metadata.labels.as_ref(), s)))
            .cloned()
            .collect())
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<(), ClusterError> {
        let mut stamped = deployment.clone();
        if stamped.metadata.creation_timestamp.is_none() {
            stamped.metadata.creation_timestamp = Some(Time(*self.now.lock().unwrap()));
        }
        self.insert(
            &ResourceKind::Deployment.to_string(),
            &deployment.metadata,
            stamped,
            |s| &mut s.deployments,
        )
    }

    async fn list_pods(&self, selector: &str) -> Result<Vec<Pod>, ClusterError> {
        let mut store = self.store.lock().unwrap();
        store.record("list pod".to_string())?;
        Ok(store
            .pods
            .iter()
            .filter(|p| matches_selector(p.metadata.labels.as_ref(), selector))
            .cloned()
            .collect())
    }

    async fn create_service(&self, service: &Service) -> Result<(), ClusterError> {
        self.insert(
            &ResourceKind::Service.to_string(),
            &service.metadata,
            service.clone(),
            |s| &mut s.services,
        )
    }

    async fn create_ingress(&self, ingress: &Ingress) -> Result<(), ClusterError> {
        self.insert(
            &ResourceKind::Ingress.to_string(),
            &ingress.metadata,
            ingress.clone(),
            |s| &mut s.ingresses,
        )
    }

    async fn create_ingress_route(&self, route: &IngressRoute) -> Result<(), ClusterError> {
        let meta = ObjectMeta {
            name: Some(route.name.clone()),
            ..Default::default()
        };
        self.insert(&ResourceKind::IngressRoute.to_string(), &meta, route.clone(), |s| {
            &mut s.routes
        })
    }

    async fn delete(&self, kind: ResourceKind, name: &str) -> Result<bool, ClusterError> {
        let mut store = self.store.lock().unwrap();
        store.record(format!("delete {kind} {name}"))?;
        Ok(store.remove(kind, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labeled(name: &str, labels: &[(&str, &str)]) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(
                labels
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn test_selector_matching() {
        let labels = BTreeMap::from([
            ("app".to_string(), "user-sandbox".to_string()),
            ("user".to_string(), "alice".to_string()),
        ]);
        assert!(matches_selector(Some(&labels), "app=user-sandbox"));
        assert!(matches_selector(Some(&labels), "app=user-sandbox,user=alice"));
        assert!(!matches_selector(Some(&labels), "user=bob"));
        assert!(!matches_selector(None, "app=user-sandbox"));
        assert!(!matches_selector(Some(&labels), "app"));
    }

    #[tokio::test]
    async fn test_create_twice_conflicts() {
        let cluster = InMemoryCluster::new();
        let service = Service {
            metadata: labeled("alice-service", &[]),
            ..Default::default()
        };
        cluster.create_service(&service).await.unwrap();
        let err = cluster.create_service(&service).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_delete_missing_is_false() {
        let cluster = InMemoryCluster::new();
        assert!(!cluster
            .delete(ResourceKind::Service, "nope")
            .await
            .unwrap());
        assert_eq!(cluster.calls(), vec!["delete service nope"]);
    }

    #[tokio::test]
    async fn test_injected_failure_is_recorded() {
        let cluster = InMemoryCluster::new();
        cluster.fail_on("list deployment");
        assert!(cluster.list_deployments(None).await.is_err());
        assert_eq!(cluster.calls(), vec!["list deployment"]);
    }

    #[tokio::test]
    async fn test_injected_status_failure() {
        let cluster = InMemoryCluster::new();
        cluster.fail_with_status("create persistentvolumeclaim", 409);
        let claim = PersistentVolumeClaim {
            metadata: labeled("alice-pvc", &[]),
            ..Default::default()
        };
        let err = cluster.create_claim(&claim).await.unwrap_err();
        assert!(err.is_conflict());
        assert!(!cluster.has_claim("alice-pvc"));
    }

    #[tokio::test]
    async fn test_created_deployment_is_stamped() {
        let cluster = InMemoryCluster::new();
        let now = Utc::now();
        cluster.set_now(now);
        let deployment = Deployment {
            metadata: labeled("alice-deployment", &[("app", "user-sandbox")]),
            ..Default::default()
        };
        cluster.create_deployment(&deployment).await.unwrap();
        let stored = cluster.deployment("alice-deployment").unwrap();
        assert_eq!(stored.metadata.creation_timestamp, Some(Time(now)));

        let listed = cluster
            .list_deployments(Some("app=user-sandbox"))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert!(cluster
            .list_deployments(Some("app=other"))
            .await
            .unwrap()
            .is_empty());
    }
}
