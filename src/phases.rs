//! Upgrade phase implementations.
//!
//! Phases run in order: rename migration, workload update, cleanup. Each one
//! is idempotent so a failed invocation can simply be run again.

pub mod cleanup;
pub mod migration;
pub mod workloads;

use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

use crate::exposure::PollPolicy;
use crate::names::CONSOLE_PORT;

/// Site-wide inputs shared by every phase.
pub struct SiteContext<'a, S> {
    pub store: &'a S,
    pub namespace: &'a str,
    /// Owner references of the transport configuration record.
    pub owner_refs: Option<Vec<OwnerReference>>,
    pub poll: PollPolicy,
}

impl<S> SiteContext<'_, S> {
    /// Owner given to regenerated credentials.
    pub fn owner(&self) -> Option<&OwnerReference> {
        self.owner_refs.as_ref().and_then(|refs| refs.first())
    }
}

/// User-facing message produced by a phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The console moved to a newly assigned load balancer address.
    ConsoleAddress(String),
    /// Link tokens issued before the upgrade point at an IP that changed.
    RelinkRequired,
}

impl Notice {
    pub fn console_at(host: &str) -> Self {
        Self::ConsoleAddress(format!("http://{host}:{CONSOLE_PORT}"))
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConsoleAddress(url) => write!(f, "Console is now at {url}"),
            Self::RelinkRequired => {
                write!(f, "Sites previously linked to this one will require new tokens")
            }
        }
    }
}
