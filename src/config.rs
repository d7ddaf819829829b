use anyhow::{Context, Result};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::identity::NamingConvention;

const CONFIG_FILE: &str = "sandboxer.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub naming: NamingConfig,
    #[serde(default)]
    pub workload: WorkloadConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

/// Where sandboxes live and how they are exposed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Namespace holding every sandbox (created on first use)
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Base domain for the `<id>-vnc` and `<id>-api` hosts
    #[serde(default = "default_domain")]
    pub domain: String,

    /// Entrypoint style: "ingress" or "ingress-route" (Traefik CRD)
    #[serde(default)]
    pub entrypoint: EntrypointStyle,

    /// Traefik certificate resolver for IngressRoutes
    #[serde(default = "default_cert_resolver")]
    pub cert_resolver: String,

    /// Only list deployments labeled `app=user-sandbox`
    #[serde(default = "default_true")]
    pub list_labeled_only: bool,

    /// Per-call timeout against the API server (0 = none)
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            domain: default_domain(),
            entrypoint: EntrypointStyle::default(),
            cert_resolver: default_cert_resolver(),
            list_labeled_only: true,
            call_timeout_secs: default_call_timeout(),
        }
    }
}

impl ClusterConfig {
    /// Per-call timeout, if one is configured.
    pub fn call_timeout(&self) -> Option<Duration> {
        (self.call_timeout_secs > 0).then(|| Duration::from_secs(self.call_timeout_secs))
    }
}

/// How a sandbox is reachable from outside the cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntrypointStyle {
    /// One networking/v1 Ingress with a rule per host.
    Ingress,
    /// Two Traefik IngressRoutes, one per host.
    #[default]
    IngressRoute,
}

impl std::fmt::Display for EntrypointStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ingress => write!(f, "ingress"),
            Self::IngressRoute => write!(f, "ingress-route"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamingConfig {
    /// Prefix for new deployment names (`<prefix>-<id>-deployment`)
    #[serde(default)]
    pub prefix: Option<String>,

    /// Prefixes older deployments may carry
    #[serde(default = "default_legacy_prefixes")]
    pub legacy_prefixes: Vec<String>,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            prefix: None,
            legacy_prefixes: default_legacy_prefixes(),
        }
    }
}

impl NamingConfig {
    pub fn convention(&self) -> NamingConvention {
        NamingConvention::new(self.prefix.clone(), self.legacy_prefixes.clone())
    }
}

/// What runs inside each sandbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadConfig {
    /// Container image, optionally without a tag when `image_tag_config_map` is set
    #[serde(default = "default_image")]
    pub image: String,

    /// ConfigMap whose `container-image-tag` key supplies the image tag
    #[serde(default)]
    pub image_tag_config_map: Option<String>,

    #[serde(default = "default_storage_class")]
    pub storage_class: String,

    #[serde(default = "default_storage_size")]
    pub storage_size: String,

    /// Paths the user-data claim is mounted at
    #[serde(default = "default_data_mount_paths")]
    pub data_mount_paths: Vec<String>,

    #[serde(default)]
    pub resources: ResourceConfig,

    /// Attach liveness/readiness probes on the HTTP port
    #[serde(default = "default_true")]
    pub health_checks: bool,

    /// Run the volume-permissions init container
    #[serde(default = "default_true")]
    pub init_permissions: bool,

    #[serde(default = "default_init_image")]
    pub init_image: String,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            image_tag_config_map: None,
            storage_class: default_storage_class(),
            storage_size: default_storage_size(),
            data_mount_paths: default_data_mount_paths(),
            resources: ResourceConfig::default(),
            health_checks: true,
            init_permissions: true,
            init_image: default_init_image(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    #[serde(default = "default_cpu_request")]
    pub cpu_request: String,
    #[serde(default = "default_memory_request")]
    pub memory_request: String,
    #[serde(default = "default_cpu_limit")]
    pub cpu_limit: String,
    #[serde(default = "default_memory_limit")]
    pub memory_limit: String,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            cpu_request: default_cpu_request(),
            memory_request: default_memory_request(),
            cpu_limit: default_cpu_limit(),
            memory_limit: default_memory_limit(),
        }
    }
}

/// Expiry sweep settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Sandboxes at least this old are reclaimed by the periodic sweep
    #[serde(default = "default_expiration_minutes")]
    pub expiration_minutes: u32,

    /// Seconds between periodic sweeps
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Shared secret for on-demand sweeps (unset rejects every request)
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            expiration_minutes: default_expiration_minutes(),
            interval_secs: default_interval_secs(),
            auth_token: None,
        }
    }
}

impl CleanupConfig {
    pub fn expiration(&self) -> TimeDelta {
        TimeDelta::minutes(i64::from(self.expiration_minutes))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_namespace() -> String {
    "user-sandboxes".to_string()
}

fn default_domain() -> String {
    "tryiris.dev".to_string()
}

fn default_cert_resolver() -> String {
    "letsencrypt".to_string()
}

fn default_call_timeout() -> u64 {
    30
}

fn default_legacy_prefixes() -> Vec<String> {
    vec!["iris".to_string()]
}

fn default_image() -> String {
    "shanurcsenitap/iris_agent:latest".to_string()
}

fn default_storage_class() -> String {
    "standard-rwo".to_string()
}

fn default_storage_size() -> String {
    "1Gi".to_string()
}

fn default_data_mount_paths() -> Vec<String> {
    vec!["/config".to_string()]
}

fn default_init_image() -> String {
    "busybox".to_string()
}

fn default_cpu_request() -> String {
    "500m".to_string()
}

fn default_memory_request() -> String {
    "1Gi".to_string()
}

fn default_cpu_limit() -> String {
    "1".to_string()
}

fn default_memory_limit() -> String {
    "2Gi".to_string()
}

fn default_expiration_minutes() -> u32 {
    30
}

fn default_interval_secs() -> u64 {
    60
}

impl Config {
    /// Load configuration from `path`, or from `sandboxer.toml` in `dir`,
    /// using defaults if neither exists
    pub fn load(path: Option<&Path>, dir: &Path) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let candidate = dir.join(CONFIG_FILE);
                if !candidate.exists() {
                    return Ok(Self::default());
                }
                candidate
            }
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        Ok(config)
    }
}
