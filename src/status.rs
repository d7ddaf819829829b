//! Composite sandbox status.
//!
//! A coarse status comes from the deployment's replica counters. When the
//! sandbox's pods can be listed, the newest pod refines it: image pull and
//! init-container problems surface while the pod is pending, and unready
//! containers surface once it runs.

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::DeploymentStatus;
use k8s_openapi::api::core::v1::{ContainerStatus, Pod};
use serde::Serialize;

/// Status reported for a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SandboxStatus {
    Running,
    Unavailable,
    Pending,
    Unknown,
    ImagePullBackOff,
    ErrImagePull,
    Initializing,
    ContainerCreating,
    InitContainerWaiting,
    InitContainerRunning,
    NotAllContainersReady,
}

impl SandboxStatus {
    /// Returns true if the sandbox is serving.
    pub fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns true for states that will not resolve without intervention.
    pub fn is_failing(self) -> bool {
        matches!(self, Self::ImagePullBackOff | Self::ErrImagePull)
    }
}

impl std::fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "Running",
            Self::Unavailable => "Unavailable",
            Self::Pending => "Pending",
            Self::Unknown => "Unknown",
            Self::ImagePullBackOff => "ImagePullBackOff",
            Self::ErrImagePull => "ErrImagePull",
            Self::Initializing => "Initializing",
            Self::ContainerCreating => "ContainerCreating",
            Self::InitContainerWaiting => "InitContainerWaiting",
            Self::InitContainerRunning => "InitContainerRunning",
            Self::NotAllContainersReady => "NotAllContainersReady",
        };
        f.write_str(s)
    }
}

/// Lifecycle state of one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerPhase {
    Running,
    Waiting,
    Terminated,
    Unknown,
}

/// One container of the sandbox pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDetail {
    pub name: String,
    pub ready: bool,
    pub state: ContainerPhase,
    pub restart_count: i32,
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// The pod a status was refined from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodDetail {
    pub name: String,
    pub phase: String,
    /// Condition types currently `True`.
    pub conditions: Vec<String>,
    pub containers: Vec<ContainerDetail>,
    pub init_containers: Vec<ContainerDetail>,
}

/// Read model for one sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxView {
    pub user_id: String,
    pub status: SandboxStatus,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod: Option<PodDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SandboxView {
    pub fn new(
        user_id: impl Into<String>,
        status: SandboxStatus,
        created_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            status,
            created_at,
            pod: None,
            message: None,
            reason: None,
        }
    }
}

/// Status from replica counters alone. Missing counters count as zero.
pub fn coarse_status(status: Option<&DeploymentStatus>) -> SandboxStatus {
    let count = |f: fn(&DeploymentStatus) -> Option<i32>| status.and_then(f).unwrap_or(0);

    if count(|s| s.available_replicas) > 0 {
        SandboxStatus::Running
    } else if count(|s| s.unavailable_replicas) > 0 {
        SandboxStatus::Unavailable
    } else if count(|s| s.ready_replicas) == 0 {
        SandboxStatus::Pending
    } else {
        SandboxStatus::Unknown
    }
}

/// Picks the most recently created pod.
pub fn newest_pod(pods: &[Pod]) -> Option<&Pod> {
    pods.iter()
        .max_by_key(|pod| pod.metadata.creation_timestamp.as_ref().map(|t| t.0))
}

/// Refines `view` with the state of `pod`.
pub fn refine(view: &mut SandboxView, pod: &Pod) {
    let status = pod.status.clone().unwrap_or_default();
    let containers = status.container_statuses.unwrap_or_default();
    let init_containers = status.init_container_statuses.unwrap_or_default();
    let phase = status.phase.unwrap_or_default();

    match phase.as_str() {
        "Pending" => {
            if let Some(refined) = pending_container_status(&containers) {
                view.status = refined;
            }
            if let Some(refined) = pending_init_status(&init_containers) {
                view.status = refined;
            }
        }
        "Running" => {
            if containers.iter().any(|c| !c.ready) {
                view.status = SandboxStatus::NotAllContainersReady;
            }
        }
        _ => {}
    }

    if status.message.is_some() {
        view.message = status.message;
    }
    if status.reason.is_some() {
        view.reason = status.reason;
    }

    view.pod = Some(PodDetail {
        name: pod.metadata.name.clone().unwrap_or_default(),
        phase,
        conditions: status
            .conditions
            .unwrap_or_default()
            .into_iter()
            .filter(|c| c.status == "True")
            .map(|c| c.type_)
            .collect(),
        containers: containers.iter().map(container_detail).collect(),
        init_containers: init_containers.iter().map(container_detail).collect(),
    });
}

fn waiting_reason(status: &ContainerStatus) -> Option<&str> {
    status
        .state
        .as_ref()?
        .waiting
        .as_ref()?
        .reason
        .as_deref()
}

fn pending_container_status(containers: &[ContainerStatus]) -> Option<SandboxStatus> {
    containers.iter().find_map(|c| match waiting_reason(c)? {
        "ImagePullBackOff" => Some(SandboxStatus::ImagePullBackOff),
        "ErrImagePull" => Some(SandboxStatus::ErrImagePull),
        "PodInitializing" => Some(SandboxStatus::Initializing),
        "ContainerCreating" => Some(SandboxStatus::ContainerCreating),
        _ => None,
    })
}

/// The first init container that has not completed decides.
fn pending_init_status(init_containers: &[ContainerStatus]) -> Option<SandboxStatus> {
    init_containers.iter().find_map(|c| {
        let state = c.state.as_ref()?;
        if state.waiting.is_some() {
            Some(SandboxStatus::InitContainerWaiting)
        } else if state.running.is_some() {
            Some(SandboxStatus::InitContainerRunning)
        } else {
            None
        }
    })
}

fn container_detail(status: &ContainerStatus) -> ContainerDetail {
    let (state, message, reason) = match status.state.as_ref() {
        Some(s) if s.running.is_some() => (ContainerPhase::Running, None, None),
        Some(s) if s.waiting.is_some() => {
            let waiting = s.waiting.as_ref();
            (
                ContainerPhase::Waiting,
                waiting.and_then(|w| w.message.clone()),
                waiting.and_then(|w| w.reason.clone()),
            )
        }
        Some(s) if s.terminated.is_some() => {
            let terminated = s.terminated.as_ref();
            let exit_code = terminated.map_or(0, |t| t.exit_code);
            let reason = if exit_code == 0 {
                Some("Completed".to_string())
            } else {
                terminated.and_then(|t| t.reason.clone())
            };
            (
                ContainerPhase::Terminated,
                terminated.and_then(|t| t.message.clone()),
                reason,
            )
        }
        _ => (ContainerPhase::Unknown, None, None),
    };

    ContainerDetail {
        name: status.name.clone(),
        ready: status.ready,
        state,
        restart_count: status.restart_count,
        image: status.image.clone(),
        message,
        reason,
    }
}
