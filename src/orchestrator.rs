//! Sandbox lifecycle: create, delete, list and status.
//!
//! Creation issues one call per object in dependency order and stops at the
//! first failure without undoing earlier steps. Teardown is best effort: every
//! step runs regardless of earlier failures and the outcome of each is
//! recorded in a [`TeardownReport`]. The storage claim is never deleted.

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cluster::{ClusterApi, ClusterError, ResourceKind};
use crate::compose::{self, EndpointRole, Entrypoints, SandboxRequest, USER_LABEL};
use crate::config::{Config, EntrypointStyle};
use crate::error::SandboxError;
use crate::identity::{NamingConvention, SandboxId};
use crate::status::{self, SandboxStatus, SandboxView};

/// Key of the image tag in the image tag ConfigMap.
const IMAGE_TAG_KEY: &str = "container-image-tag";

/// Message attached to a status when the deployment has no pods.
pub const NO_PODS_MESSAGE: &str = "No pods found for this deployment";

/// Result of one teardown step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Deleted,
    /// The object did not exist.
    Absent,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownStep {
    pub kind: ResourceKind,
    pub name: String,
    pub outcome: StepOutcome,
}

/// Per-step outcomes of deleting one sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    pub user_id: String,
    pub steps: Vec<TeardownStep>,
}

impl TeardownReport {
    fn new(id: &SandboxId) -> Self {
        Self {
            user_id: id.to_string(),
            steps: Vec::new(),
        }
    }

    fn record(&mut self, kind: ResourceKind, name: impl Into<String>, outcome: StepOutcome) {
        self.steps.push(TeardownStep {
            kind,
            name: name.into(),
            outcome,
        });
    }

    /// Number of steps that deleted an object or found it already gone.
    pub fn succeeded(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| !matches!(s.outcome, StepOutcome::Failed(_)))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.steps.len() - self.succeeded()
    }

    /// Returns true if no step failed.
    pub fn is_clean(&self) -> bool {
        self.failed() == 0
    }

    /// Returns true if the deployment step removed a deployment.
    pub fn deployment_deleted(&self) -> bool {
        self.steps
            .iter()
            .any(|s| s.kind == ResourceKind::Deployment && s.outcome == StepOutcome::Deleted)
    }
}

/// A deployment recognised as a sandbox.
#[derive(Debug, Clone)]
pub(crate) struct Workload {
    pub user_id: String,
    pub deployment_name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub status: SandboxStatus,
}

/// Drives sandbox operations against a cluster.
pub struct Orchestrator<C> {
    cluster: Arc<C>,
    config: Arc<Config>,
    naming: NamingConvention,
}

impl<C: ClusterApi> Orchestrator<C> {
    pub fn new(cluster: Arc<C>, config: Arc<Config>) -> Self {
        let naming = config.naming.convention();
        Self {
            cluster,
            config,
            naming,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Provisions a sandbox for `user_id`.
    ///
    /// An existing storage claim is reused. On failure the objects created so
    /// far are left in place.
    pub async fn create(
        &self,
        user_id: &str,
        env: BTreeMap<String, String>,
        app_env: BTreeMap<String, String>,
    ) -> Result<SandboxId, SandboxError> {
        let id = SandboxId::parse(user_id)?;
        let request = SandboxRequest { id, env, app_env };
        let id = &request.id;
        info!(user_id = %id, "Creating sandbox");

        self.cluster
            .ensure_namespace()
            .await
            .map_err(|e| SandboxError::upstream("ensure namespace", e))?;

        let image = self.resolve_image().await?;
        let deployment_name = self.naming.deployment_name(id);
        let resources = compose::compose(&request, &deployment_name, &image, &self.config);

        let claim_name = compose::claim_name(id);
        let existing = self
            .cluster
            .get_claim(&claim_name)
            .await
            .map_err(|e| SandboxError::upstream("look up storage claim", e))?;
        if existing.is_some() {
            debug!(user_id = %id, claim = %claim_name, "Reusing existing storage claim");
        } else {
            match self.cluster.create_claim(&resources.claim).await {
                Ok(()) => debug!(user_id = %id, claim = %claim_name, "Created storage claim"),
                Err(e) if e.is_conflict() => {
                    debug!(user_id = %id, claim = %claim_name, "Storage claim appeared concurrently");
                }
                Err(e) => return Err(SandboxError::upstream("create storage claim", e)),
            }
        }

        if let Some(env_file) = &resources.env_file {
            self.cluster
                .create_config_map(env_file)
                .await
                .map_err(|e| SandboxError::upstream("create env config map", e))?;
            debug!(user_id = %id, "Created env config map");
        }

        self.cluster
            .create_deployment(&resources.deployment)
            .await
            .map_err(|e| SandboxError::upstream("create deployment", e))?;
        debug!(user_id = %id, deployment = %deployment_name, %image, "Created deployment");

        self.cluster
            .create_service(&resources.service)
            .await
            .map_err(|e| SandboxError::upstream("create service", e))?;
        debug!(user_id = %id, "Created service");

        match &resources.entrypoints {
            Entrypoints::Ingress(ingress) => {
                self.cluster
                    .create_ingress(ingress)
                    .await
                    .map_err(|e| SandboxError::upstream("create ingress", e))?;
            }
            Entrypoints::Routes(routes) => {
                for route in routes {
                    self.cluster
                        .create_ingress_route(route)
                        .await
                        .map_err(|e| {
                            SandboxError::upstream(format!("create ingress route {}", route.name), e)
                        })?;
                }
            }
        }
        debug!(user_id = %id, entrypoint = %self.config.cluster.entrypoint, "Created entrypoints");

        info!(user_id = %id, "Sandbox created");
        Ok(request.id)
    }

    /// Image reference for new sandboxes, with the tag taken from the image
    /// tag ConfigMap when one is configured.
    async fn resolve_image(&self) -> Result<String, SandboxError> {
        let workload = &self.config.workload;
        let Some(map_name) = &workload.image_tag_config_map else {
            return Ok(workload.image.clone());
        };

        let map = self
            .cluster
            .get_config_map(map_name)
            .await
            .map_err(|e| SandboxError::upstream("resolve image tag", e))?;
        let tag = map
            .and_then(|m| m.data)
            .and_then(|mut data| data.remove(IMAGE_TAG_KEY))
            .filter(|tag| !tag.is_empty())
            .ok_or_else(|| {
                SandboxError::config(format!("ConfigMap {map_name} has no {IMAGE_TAG_KEY} key"))
            })?;
        Ok(with_tag(&workload.image, &tag))
    }

    /// Tears down everything but the storage claim. Never fails; see the
    /// report for what happened.
    pub async fn delete(&self, id: &SandboxId) -> TeardownReport {
        self.teardown(id, None).await
    }

    /// Tears down a sandbox found by listing, removing the deployment under
    /// the name it was listed with.
    pub(crate) async fn delete_workload(
        &self,
        id: &SandboxId,
        deployment_name: &str,
    ) -> TeardownReport {
        self.teardown(id, Some(deployment_name)).await
    }

    async fn teardown(&self, id: &SandboxId, deployment_name: Option<&str>) -> TeardownReport {
        info!(user_id = %id, "Deleting sandbox");
        let mut report = TeardownReport::new(id);

        match self.config.cluster.entrypoint {
            EntrypointStyle::Ingress => {
                self.delete_step(&mut report, ResourceKind::Ingress, compose::ingress_name(id))
                    .await;
            }
            EntrypointStyle::IngressRoute => {
                for role in EndpointRole::ALL {
                    self.delete_step(
                        &mut report,
                        ResourceKind::IngressRoute,
                        compose::route_name(id, role),
                    )
                    .await;
                }
            }
        }

        self.delete_step(&mut report, ResourceKind::Service, compose::service_name(id))
            .await;
        match deployment_name {
            Some(name) => {
                self.delete_step(&mut report, ResourceKind::Deployment, name.to_string())
                    .await;
            }
            None => self.delete_deployment(&mut report, id).await,
        }
        self.delete_step(&mut report, ResourceKind::ConfigMap, compose::env_file_name(id))
            .await;

        if report.is_clean() {
            info!(user_id = %id, steps = report.steps.len(), "Sandbox deleted");
        } else {
            warn!(
                user_id = %id,
                failed = report.failed(),
                "Sandbox deleted with failures"
            );
        }
        report
    }

    async fn delete_step(&self, report: &mut TeardownReport, kind: ResourceKind, name: String) {
        let outcome = self.delete_one(&report.user_id, kind, &name).await;
        report.record(kind, name, outcome);
    }

    async fn delete_one(&self, user_id: &str, kind: ResourceKind, name: &str) -> StepOutcome {
        match self.cluster.delete(kind, name).await {
            Ok(true) => {
                debug!(user_id, %kind, name, "Deleted");
                StepOutcome::Deleted
            }
            Ok(false) => {
                debug!(user_id, %kind, name, "Already absent");
                StepOutcome::Absent
            }
            Err(e) => {
                warn!(user_id, %kind, name, error = %e, "Failed to delete, continuing");
                StepOutcome::Failed(e.to_string())
            }
        }
    }

    /// Deletes the deployment under the first candidate name that exists,
    /// falling back to the deployment a listing attributes to `id`.
    async fn delete_deployment(&self, report: &mut TeardownReport, id: &SandboxId) {
        let candidates = self.naming.deployment_candidates(id);
        for name in &candidates {
            let outcome = self
                .delete_one(&report.user_id, ResourceKind::Deployment, name)
                .await;
            if outcome != StepOutcome::Absent {
                report.record(ResourceKind::Deployment, name.clone(), outcome);
                return;
            }
        }

        match self.locate(id).await {
            Ok(Some(deployment)) => {
                let name = deployment.metadata.name.unwrap_or_default();
                self.delete_step(report, ResourceKind::Deployment, name).await;
            }
            Ok(None) => report.record(
                ResourceKind::Deployment,
                self.naming.deployment_name(id),
                StepOutcome::Absent,
            ),
            Err(e) => {
                warn!(user_id = %id, error = %e, "Failed to list deployments, continuing");
                report.record(
                    ResourceKind::Deployment,
                    self.naming.deployment_name(id),
                    StepOutcome::Failed(e.to_string()),
                );
            }
        }
    }

    /// Finds a deployment whose recovered user ID is `id`, for sandboxes
    /// whose deployment matches none of the naming candidates.
    async fn locate(&self, id: &SandboxId) -> Result<Option<Deployment>, ClusterError> {
        let deployments = self.cluster.list_deployments(None).await?;
        Ok(deployments
            .into_iter()
            .find(|d| self.user_id_of(d).as_deref() == Some(id.as_str())))
    }

    fn user_id_of(&self, deployment: &Deployment) -> Option<String> {
        let name = deployment.metadata.name.as_deref().unwrap_or_default();
        let label = deployment
            .metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(USER_LABEL))
            .map(String::as_str);
        self.naming.derive(name, label)
    }

    /// Lists sandboxes with their coarse status.
    pub async fn list(&self) -> Result<Vec<SandboxView>, SandboxError> {
        let workloads = self.workloads(self.config.cluster.list_labeled_only).await?;
        Ok(workloads
            .into_iter()
            .map(|w| SandboxView::new(w.user_id, w.status, w.created_at))
            .collect())
    }

    /// Deployments in the namespace whose user ID can be recovered.
    pub(crate) async fn workloads(&self, labeled_only: bool) -> Result<Vec<Workload>, SandboxError> {
        let selector = labeled_only.then(compose::sandbox_selector);
        let deployments = self
            .cluster
            .list_deployments(selector.as_deref())
            .await
            .map_err(|e| SandboxError::upstream("list deployments", e))?;

        Ok(deployments
            .into_iter()
            .filter_map(|d| self.recognise(d))
            .collect())
    }

    fn recognise(&self, deployment: Deployment) -> Option<Workload> {
        let Some(user_id) = self.user_id_of(&deployment) else {
            debug!(
                deployment = deployment.metadata.name.as_deref().unwrap_or_default(),
                "Skipping deployment without recoverable user ID"
            );
            return None;
        };
        let name = deployment.metadata.name.unwrap_or_default();

        Some(Workload {
            user_id,
            created_at: deployment.metadata.creation_timestamp.map(|t| t.0),
            status: status::coarse_status(deployment.status.as_ref()),
            deployment_name: name,
        })
    }

    /// Detailed status of one sandbox.
    ///
    /// Pod lookup failures leave the coarse status in place.
    pub async fn status(&self, user_id: &str) -> Result<SandboxView, SandboxError> {
        let id = SandboxId::parse(user_id)?;
        let deployment = self
            .find_deployment(&id)
            .await?
            .ok_or_else(|| SandboxError::not_found(id.as_str()))?;
        let selector = pod_selector_of(&deployment).unwrap_or_else(|| compose::pod_selector(&id));

        let mut view = SandboxView::new(
            id.as_str(),
            status::coarse_status(deployment.status.as_ref()),
            deployment.metadata.creation_timestamp.map(|t| t.0),
        );

        match self.cluster.list_pods(&selector).await {
            Ok(pods) => match status::newest_pod(&pods) {
                Some(pod) => status::refine(&mut view, pod),
                None => view.message = Some(NO_PODS_MESSAGE.to_string()),
            },
            Err(e) => {
                warn!(user_id = %id, error = %e, "Failed to list pods, reporting deployment status only");
            }
        }

        Ok(view)
    }

    async fn find_deployment(&self, id: &SandboxId) -> Result<Option<Deployment>, SandboxError> {
        for name in self.naming.deployment_candidates(id) {
            let found = self
                .cluster
                .get_deployment(&name)
                .await
                .map_err(|e| SandboxError::upstream("get deployment", e))?;
            if found.is_some() {
                return Ok(found);
            }
        }
        self.locate(id)
            .await
            .map_err(|e| SandboxError::upstream("list deployments", e))
    }
}

/// Equality selector built from a deployment's `matchLabels`.
fn pod_selector_of(deployment: &Deployment) -> Option<String> {
    let labels = deployment
        .spec
        .as_ref()?
        .selector
        .match_labels
        .as_ref()
        .filter(|labels| !labels.is_empty())?;
    Some(
        labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(","),
    )
}

/// Replaces the tag of `image` with `tag`.
fn with_tag(image: &str, tag: &str) -> String {
    let name_start = image.rfind('/').map_or(0, |i| i + 1);
    let repository = match image[name_start..].rfind(':') {
        Some(i) => &image[..name_start + i],
        None => image,
    };
    format!("{repository}:{tag}")
}
