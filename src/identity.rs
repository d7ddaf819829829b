//! Sandbox identity validation and recovery.
//!
//! A sandbox is addressed by its user ID. The ID ends up inside resource
//! names and public hostnames, so it must be a valid DNS-1035 label. When a
//! deployment carries no `user` label, the ID is recovered from the
//! deployment name under the naming convention in use, falling back to the
//! legacy forms older sandboxes were created with.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

/// Maximum length of a DNS label.
pub const MAX_IDENTITY_LEN: usize = 63;

/// Suffix every sandbox deployment name carries.
const DEPLOYMENT_SUFFIX: &str = "-deployment";

static DNS_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z]([-a-z0-9]*[a-z0-9])?$").expect("DNS label pattern is valid")
});

/// Reason a user ID was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InvalidIdentity {
    /// Empty string.
    #[error("Name cannot be empty")]
    Empty,
    /// Longer than a DNS label allows.
    #[error("Name must be 63 characters or less")]
    TooLong,
    /// Not a DNS-1035 label.
    #[error(
        "Name must consist of lower case alphanumeric characters or '-', \
         start with an alphabetic character, and end with an alphanumeric character"
    )]
    Malformed,
}

/// Checks that `name` can be used as a sandbox identity.
pub fn validate(name: &str) -> Result<(), InvalidIdentity> {
    if name.is_empty() {
        return Err(InvalidIdentity::Empty);
    }
    if name.len() > MAX_IDENTITY_LEN {
        return Err(InvalidIdentity::TooLong);
    }
    if !DNS_LABEL.is_match(name) {
        return Err(InvalidIdentity::Malformed);
    }
    Ok(())
}

/// A validated sandbox identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SandboxId(String);

impl SandboxId {
    /// Validates `name` and wraps it.
    pub fn parse(name: impl Into<String>) -> Result<Self, InvalidIdentity> {
        let name = name.into();
        validate(&name)?;
        Ok(Self(name))
    }

    /// Returns the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SandboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SandboxId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// How sandbox deployments are named.
///
/// New deployments are named `<id>-deployment`, or `<prefix>-<id>-deployment`
/// when a prefix is configured. `legacy_prefixes` lists prefixes that earlier
/// deployments may carry; they are stripped during recovery and tried during
/// lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamingConvention {
    prefix: Option<String>,
    legacy_prefixes: Vec<String>,
}

impl NamingConvention {
    /// Creates a convention with an optional prefix and the legacy prefixes to
    /// recognise.
    pub fn new(prefix: Option<String>, legacy_prefixes: Vec<String>) -> Self {
        Self {
            prefix: prefix.filter(|p| !p.is_empty()),
            legacy_prefixes: legacy_prefixes
                .into_iter()
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Deployment name for a new sandbox.
    pub fn deployment_name(&self, id: &SandboxId) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}-{id}{DEPLOYMENT_SUFFIX}"),
            None => format!("{id}{DEPLOYMENT_SUFFIX}"),
        }
    }

    /// Every deployment name a sandbox may exist under, canonical name first.
    pub fn deployment_candidates(&self, id: &SandboxId) -> Vec<String> {
        let mut names = vec![self.deployment_name(id)];
        let plain = format!("{id}{DEPLOYMENT_SUFFIX}");
        if !names.contains(&plain) {
            names.push(plain);
        }
        for prefix in &self.legacy_prefixes {
            let legacy = format!("{prefix}-{id}{DEPLOYMENT_SUFFIX}");
            if !names.contains(&legacy) {
                names.push(legacy);
            }
        }
        names
    }

    /// Recovers the user ID of a deployment.
    ///
    /// An explicit label wins. Otherwise the `-deployment` suffix and any known
    /// prefix are stripped from the name. As a last resort the second
    /// dash-separated segment of the name is used.
    pub fn derive(&self, resource_name: &str, explicit_label: Option<&str>) -> Option<String> {
        if let Some(label) = explicit_label.filter(|l| !l.is_empty()) {
            return Some(label.to_string());
        }

        if let Some(stem) = resource_name.strip_suffix(DEPLOYMENT_SUFFIX) {
            let id = self.strip_prefix(stem);
            if !id.is_empty() {
                return Some(id.to_string());
            }
        }

        let mut segments = resource_name.split('-');
        segments.next();
        segments
            .next()
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
    }

    fn strip_prefix<'a>(&self, stem: &'a str) -> &'a str {
        if let Some(prefix) = &self.prefix {
            return stem
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_prefix('-'))
                .unwrap_or(stem);
        }
        self.legacy_prefixes
            .iter()
            .find_map(|prefix| {
                stem.strip_prefix(prefix.as_str())
                    .and_then(|rest| rest.strip_prefix('-'))
                    .filter(|rest| !rest.is_empty())
            })
            .unwrap_or(stem)
    }
}
