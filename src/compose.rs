//! Declarative objects that make up one sandbox.
//!
//! Everything here is pure: given an identity, a request, and configuration,
//! build the Kubernetes objects. Creating them is the orchestrator's job.

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvVar,
    HTTPGetAction, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, Probe, ResourceRequirements,
    SeccompProfile, SecurityContext, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
    VolumeResourceRequirements,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::{Config, EntrypointStyle, WorkloadConfig};
use crate::identity::SandboxId;

pub const APP_LABEL: &str = "app";
pub const APP_LABEL_VALUE: &str = "user-sandbox";
pub const USER_LABEL: &str = "user";

pub const INGRESS_ROUTE_GROUP: &str = "traefik.io";
pub const INGRESS_ROUTE_VERSION: &str = "v1alpha1";
pub const INGRESS_ROUTE_KIND: &str = "IngressRoute";

const VNC_PORT: i32 = 6901;
const HTTP_PORT: i32 = 3000;
const HEALTH_PATH: &str = "/api/health";

const DATA_VOLUME: &str = "user-data";
const ENV_VOLUME: &str = "node-env";
const SHM_VOLUME: &str = "shm-volume";
const ENV_FILE_KEY: &str = "node.env";
const ENV_FILE_PATH: &str = "/app/.env";
const SHM_SIZE: &str = "512Mi";

/// The exposed roles of a sandbox, each with its own host and port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointRole {
    /// Remote desktop (noVNC).
    Display,
    /// Agent HTTP API.
    Api,
}

impl EndpointRole {
    pub const ALL: [Self; 2] = [Self::Display, Self::Api];

    /// Host label suffix, as in `<id>-vnc.<domain>`.
    pub fn host_label(self) -> &'static str {
        match self {
            Self::Display => "vnc",
            Self::Api => "api",
        }
    }

    /// Named service port the role routes to.
    pub fn port_name(self) -> &'static str {
        match self {
            Self::Display => "vnc",
            Self::Api => "http",
        }
    }

    pub fn port(self) -> i32 {
        match self {
            Self::Display => VNC_PORT,
            Self::Api => HTTP_PORT,
        }
    }
}

/// What a caller asks for when creating a sandbox.
#[derive(Debug, Clone)]
pub struct SandboxRequest {
    pub id: SandboxId,
    /// Environment variables for the sandbox container.
    pub env: BTreeMap<String, String>,
    /// Variables written to the application's `.env` file.
    pub app_env: BTreeMap<String, String>,
}

/// Traefik `IngressRoute`, kept as plain data and sent as a dynamic object.
#[derive(Debug, Clone, PartialEq)]
pub struct IngressRoute {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub spec: IngressRouteSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressRouteSpec {
    pub entry_points: Vec<String>,
    pub routes: Vec<Route>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<RouteTls>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Route {
    #[serde(rename = "match")]
    pub match_rule: String,
    pub kind: String,
    pub services: Vec<RouteService>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteService {
    pub name: String,
    pub port: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteTls {
    pub cert_resolver: String,
}

/// How the sandbox is exposed outside the cluster.
#[derive(Debug, Clone)]
pub enum Entrypoints {
    Ingress(Box<Ingress>),
    Routes(Vec<IngressRoute>),
}

/// All objects of one sandbox, in creation order.
#[derive(Debug, Clone)]
pub struct SandboxResources {
    pub claim: PersistentVolumeClaim,
    pub env_file: Option<ConfigMap>,
    pub deployment: Deployment,
    pub service: Service,
    pub entrypoints: Entrypoints,
}

pub fn claim_name(id: &SandboxId) -> String {
    format!("{id}-pvc")
}

pub fn env_file_name(id: &SandboxId) -> String {
    format!("{id}-node-env")
}

pub fn service_name(id: &SandboxId) -> String {
    format!("{id}-service")
}

pub fn ingress_name(id: &SandboxId) -> String {
    format!("{id}-ingress")
}

pub fn route_name(id: &SandboxId, role: EndpointRole) -> String {
    format!("{id}-{}", role.host_label())
}

pub fn host(id: &SandboxId, role: EndpointRole, domain: &str) -> String {
    format!("{id}-{}.{domain}", role.host_label())
}

/// Labels carried by every sandbox object and used as the pod selector.
pub fn sandbox_labels(id: &SandboxId) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_LABEL.to_string(), APP_LABEL_VALUE.to_string()),
        (USER_LABEL.to_string(), id.to_string()),
    ])
}

/// Label selector matching the pods of one sandbox.
pub fn pod_selector(id: &SandboxId) -> String {
    format!("{APP_LABEL}={APP_LABEL_VALUE},{USER_LABEL}={id}")
}

/// Label selector matching every sandbox deployment.
pub fn sandbox_selector() -> String {
    format!("{APP_LABEL}={APP_LABEL_VALUE}")
}

/// Renders variables as a dotenv file, one `KEY=VALUE` per line.
pub fn render_env_file(vars: &BTreeMap<String, String>) -> String {
    vars.iter().map(|(k, v)| format!("{k}={v}\n")).collect()
}

/// Builds every object for `request`. `image` is the fully resolved image
/// reference for the sandbox container.
pub fn compose(
    request: &SandboxRequest,
    deployment_name: &str,
    image: &str,
    config: &Config,
) -> SandboxResources {
    let id = &request.id;
    let env_file = (!request.app_env.is_empty()).then(|| env_config_map(id, &request.app_env));

    SandboxResources {
        claim: claim(id, &config.workload),
        deployment: deployment(
            request,
            deployment_name,
            image,
            env_file.is_some(),
            &config.workload,
        ),
        env_file,
        service: service(id),
        entrypoints: match config.cluster.entrypoint {
            EntrypointStyle::Ingress => {
                Entrypoints::Ingress(Box::new(ingress(id, &config.cluster.domain)))
            }
            EntrypointStyle::IngressRoute => Entrypoints::Routes(
                EndpointRole::ALL
                    .iter()
                    .map(|&role| {
                        ingress_route(id, role, &config.cluster.domain, &config.cluster.cert_resolver)
                    })
                    .collect(),
            ),
        },
    }
}

fn metadata(name: String, id: &SandboxId) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        labels: Some(sandbox_labels(id)),
        ..Default::default()
    }
}

fn quantities(cpu: &str, memory: &str) -> BTreeMap<String, Quantity> {
    BTreeMap::from([
        ("cpu".to_string(), Quantity(cpu.to_string())),
        ("memory".to_string(), Quantity(memory.to_string())),
    ])
}

fn claim(id: &SandboxId, workload: &WorkloadConfig) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: metadata(claim_name(id), id),
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: Some(workload.storage_class.clone()),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(workload.storage_size.clone()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn env_config_map(id: &SandboxId, vars: &BTreeMap<String, String>) -> ConfigMap {
    ConfigMap {
        metadata: metadata(env_file_name(id), id),
        data: Some(BTreeMap::from([(
            ENV_FILE_KEY.to_string(),
            render_env_file(vars),
        )])),
        ..Default::default()
    }
}

fn data_mounts(workload: &WorkloadConfig) -> Vec<VolumeMount> {
    workload
        .data_mount_paths
        .iter()
        .map(|path| VolumeMount {
            name: DATA_VOLUME.to_string(),
            mount_path: path.clone(),
            ..Default::default()
        })
        .collect()
}

fn http_probe(initial_delay: i32, timeout: i32, period: i32, failures: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(HEALTH_PATH.to_string()),
            port: IntOrString::Int(HTTP_PORT),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay),
        timeout_seconds: Some(timeout),
        period_seconds: Some(period),
        success_threshold: Some(1),
        failure_threshold: Some(failures),
        ..Default::default()
    }
}

/// Init step that opens up the data volume and clears stale browser locks.
fn permissions_init(workload: &WorkloadConfig) -> Container {
    let script = workload
        .data_mount_paths
        .iter()
        .map(|path| format!("chmod -R 777 {path} && rm -f {path}/browser/user-data/Singleton*"))
        .collect::<Vec<_>>()
        .join(" && ");

    Container {
        name: "volume-permissions".to_string(),
        image: Some(workload.init_image.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: Some(vec!["sh".to_string(), "-c".to_string(), script]),
        volume_mounts: Some(data_mounts(workload)),
        security_context: Some(SecurityContext {
            run_as_user: Some(0),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn deployment(
    request: &SandboxRequest,
    name: &str,
    image: &str,
    has_env_file: bool,
    workload: &WorkloadConfig,
) -> Deployment {
    let id = &request.id;

    let mut env: Vec<EnvVar> = request
        .env
        .iter()
        .filter(|(key, _)| key.as_str() != "USER_ID")
        .map(|(key, value)| EnvVar {
            name: key.clone(),
            value: Some(value.clone()),
            ..Default::default()
        })
        .collect();
    env.push(EnvVar {
        name: "USER_ID".to_string(),
        value: Some(id.to_string()),
        ..Default::default()
    });

    let mut mounts = data_mounts(workload);
    mounts.push(VolumeMount {
        name: SHM_VOLUME.to_string(),
        mount_path: "/dev/shm".to_string(),
        ..Default::default()
    });

    let mut volumes = vec![
        Volume {
            name: DATA_VOLUME.to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: claim_name(id),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: SHM_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource {
                medium: Some("Memory".to_string()),
                size_limit: Some(Quantity(SHM_SIZE.to_string())),
            }),
            ..Default::default()
        },
    ];

    if has_env_file {
        mounts.push(VolumeMount {
            name: ENV_VOLUME.to_string(),
            mount_path: ENV_FILE_PATH.to_string(),
            sub_path: Some(ENV_FILE_KEY.to_string()),
            ..Default::default()
        });
        volumes.push(Volume {
            name: ENV_VOLUME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: Some(env_file_name(id)),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    let resources = &workload.resources;
    let container = Container {
        name: "sandbox".to_string(),
        image: Some(image.to_string()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        security_context: Some(SecurityContext {
            seccomp_profile: Some(SeccompProfile {
                type_: "Unconfined".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ports: Some(
            EndpointRole::ALL
                .iter()
                .map(|role| ContainerPort {
                    container_port: role.port(),
                    name: Some(role.port_name().to_string()),
                    ..Default::default()
                })
                .collect(),
        ),
        env: Some(env),
        volume_mounts: Some(mounts),
        resources: Some(ResourceRequirements {
            requests: Some(quantities(&resources.cpu_request, &resources.memory_request)),
            limits: Some(quantities(&resources.cpu_limit, &resources.memory_limit)),
            ..Default::default()
        }),
        liveness_probe: workload.health_checks.then(|| http_probe(3, 2, 3, 10)),
        readiness_probe: workload.health_checks.then(|| http_probe(5, 1, 3, 2)),
        ..Default::default()
    };

    Deployment {
        metadata: metadata(name.to_string(), id),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(sandbox_labels(id)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(sandbox_labels(id)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    init_containers: workload
                        .init_permissions
                        .then(|| vec![permissions_init(workload)]),
                    containers: vec![container],
                    volumes: Some(volumes),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn service(id: &SandboxId) -> Service {
    Service {
        metadata: metadata(service_name(id), id),
        spec: Some(ServiceSpec {
            selector: Some(sandbox_labels(id)),
            ports: Some(
                EndpointRole::ALL
                    .iter()
                    .map(|role| ServicePort {
                        name: Some(role.port_name().to_string()),
                        port: role.port(),
                        target_port: Some(IntOrString::Int(role.port())),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn ingress(id: &SandboxId, domain: &str) -> Ingress {
    let rule = |role: EndpointRole| IngressRule {
        host: Some(host(id, role, domain)),
        http: Some(HTTPIngressRuleValue {
            paths: vec![HTTPIngressPath {
                path: Some("/".to_string()),
                path_type: "Prefix".to_string(),
                backend: IngressBackend {
                    service: Some(IngressServiceBackend {
                        name: service_name(id),
                        port: Some(ServiceBackendPort {
                            name: Some(role.port_name().to_string()),
                            number: None,
                        }),
                    }),
                    ..Default::default()
                },
            }],
        }),
    };

    let mut meta = metadata(ingress_name(id), id);
    meta.annotations = Some(BTreeMap::from([(
        "kubernetes.io/ingress.class".to_string(),
        "traefik".to_string(),
    )]));

    Ingress {
        metadata: meta,
        spec: Some(IngressSpec {
            rules: Some(EndpointRole::ALL.iter().map(|&role| rule(role)).collect()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn ingress_route(
    id: &SandboxId,
    role: EndpointRole,
    domain: &str,
    cert_resolver: &str,
) -> IngressRoute {
    IngressRoute {
        name: route_name(id, role),
        labels: sandbox_labels(id),
        spec: IngressRouteSpec {
            entry_points: vec!["websecure".to_string()],
            routes: vec![Route {
                match_rule: format!("Host(`{}`)", host(id, role, domain)),
                kind: "Rule".to_string(),
                services: vec![RouteService {
                    name: service_name(id),
                    port: role.port(),
                }],
            }],
            tls: Some(RouteTls {
                cert_resolver: cert_resolver.to_string(),
            }),
        },
    }
}
