//! Custom error types for skup.

use thiserror::Error;

/// Errors that can occur while upgrading a site.
#[derive(Error, Debug)]
pub enum SkupError {
    #[error("Kubernetes API error: {0}")]
    KubernetesApi(String),

    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: String, name: String },

    #[error("Site ({site}) is newer than library ({library}); cannot update")]
    SiteNewerThanLibrary { site: String, library: String },

    #[error("Invalid site configuration: {0}")]
    InvalidSiteConfig(String),

    #[error("Invalid workload {name}: {reason}")]
    InvalidWorkload { name: String, reason: String },

    #[error("Invalid credential request {name}: {reason}")]
    InvalidCredential { name: String, reason: String },

    #[error("Certificate signing failed for {name}: {reason}")]
    Certificate { name: String, reason: String },

    #[error("Could not determine whether routes are in use: {0}")]
    RouteDetection(String),
}

impl SkupError {
    /// Classify a `kube` client error for the object `kind/name`.
    ///
    /// 404 and 409/AlreadyExists are mapped to their own variants so callers
    /// can tolerate them; everything else is an API error.
    pub fn from_kube(kind: &str, name: &str, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 404 => Self::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                Self::AlreadyExists {
                    kind: kind.to_string(),
                    name: name.to_string(),
                }
            }
            other => Self::KubernetesApi(format!("{kind}/{name}: {other}")),
        }
    }

    pub fn not_found(kind: &str, name: &str) -> Self {
        Self::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }

    pub fn already_exists(kind: &str, name: &str) -> Self {
        Self::AlreadyExists {
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }

    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub const fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Returns true if re-running the same invocation may succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::KubernetesApi(_) | Self::RouteDetection(_))
    }
}
