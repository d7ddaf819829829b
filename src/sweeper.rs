//! Age-based sandbox reclamation.
//!
//! The periodic sweep runs on its own task and reclaims labeled sandboxes
//! older than the configured expiration. The on-demand sweep is guarded by a
//! shared token, looks at every deployment in the namespace and takes its
//! threshold from the caller.

use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cluster::ClusterApi;
use crate::error::SandboxError;
use crate::identity::SandboxId;
use crate::orchestrator::{Orchestrator, Workload};

/// Returns true if a workload created at `created` has reached `threshold`.
/// Workloads without a creation time never expire.
pub fn is_expired(created: Option<DateTime<Utc>>, now: DateTime<Utc>, threshold: TimeDelta) -> bool {
    created.is_some_and(|created| now - created >= threshold)
}

/// Checks an on-demand sweep token against the configured one. An unset
/// token rejects everything.
pub fn authorize(expected: Option<&str>, token: &str) -> Result<(), SandboxError> {
    if expected == Some(token) {
        return Ok(());
    }
    warn!("Rejected on-demand sweep with invalid token");
    Err(SandboxError::Unauthorized)
}

pub struct Sweeper<C> {
    orchestrator: Arc<Orchestrator<C>>,
}

impl<C: ClusterApi + 'static> Sweeper<C> {
    pub fn new(orchestrator: Arc<Orchestrator<C>>) -> Self {
        Self { orchestrator }
    }

    /// Starts the periodic sweep. The task exits once `cancel` fires; a sweep
    /// already in progress runs to completion first.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let cleanup = &self.orchestrator.config().cleanup;
            let mut ticker = tokio::time::interval(cleanup.interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                expiration_minutes = cleanup.expiration_minutes,
                interval_secs = cleanup.interval().as_secs(),
                "Expiry sweeper started"
            );

            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        info!("Expiry sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_expired(Utc::now()).await {
                            error!(error = %e, "Expiry sweep failed");
                        }
                    }
                }
            }
        })
    }

    /// One pass of the periodic sweep. Returns the number of sandboxes
    /// reclaimed.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, SandboxError> {
        let threshold = self.orchestrator.config().cleanup.expiration();
        let workloads = self.orchestrator.workloads(true).await?;
        debug!(count = workloads.len(), "Checking sandboxes for expiry");
        Ok(self.reclaim(workloads, threshold, now).await)
    }

    /// Reclaims every sandbox at least `threshold` old, if `token` matches
    /// the configured cleanup token. Returns the number reclaimed.
    pub async fn sweep_on_demand(
        &self,
        threshold: TimeDelta,
        token: &str,
    ) -> Result<usize, SandboxError> {
        self.sweep_on_demand_at(threshold, token, Utc::now()).await
    }

    async fn sweep_on_demand_at(
        &self,
        threshold: TimeDelta,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<usize, SandboxError> {
        authorize(self.orchestrator.config().cleanup.auth_token.as_deref(), token)?;

        let workloads = self.orchestrator.workloads(false).await?;
        info!(
            count = workloads.len(),
            threshold_minutes = threshold.num_minutes(),
            "Running on-demand sweep"
        );
        Ok(self.reclaim(workloads, threshold, now).await)
    }

    async fn reclaim(&self, workloads: Vec<Workload>, threshold: TimeDelta, now: DateTime<Utc>) -> usize {
        let mut reclaimed = 0;
        for workload in workloads {
            if !is_expired(workload.created_at, now, threshold) {
                continue;
            }

            let id = match SandboxId::parse(workload.user_id.as_str()) {
                Ok(id) => id,
                Err(e) => {
                    warn!(
                        deployment = %workload.deployment_name,
                        user_id = %workload.user_id,
                        reason = %e,
                        "Skipping expired deployment with unusable user ID"
                    );
                    continue;
                }
            };

            let age = workload.created_at.map(|created| now - created);
            info!(
                user_id = %id,
                deployment = %workload.deployment_name,
                age_secs = age.map(|a| a.num_seconds()),
                "Reclaiming expired sandbox"
            );

            let report = self
                .orchestrator
                .delete_workload(&id, &workload.deployment_name)
                .await;
            if !report.is_clean() {
                warn!(user_id = %id, failed = report.failed(), "Expired sandbox only partly reclaimed");
            } else if !report.deployment_deleted() {
                warn!(
                    user_id = %id,
                    deployment = %workload.deployment_name,
                    "Expired deployment was already gone"
                );
            } else {
                reclaimed += 1;
            }
        }
        reclaimed
    }
}
