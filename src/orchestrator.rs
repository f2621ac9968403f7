//! Site upgrade orchestration.
//!
//! One [`Orchestrator::run`] brings a site recorded at an older version in
//! line with the library version:
//!
//! ```text
//! Idle -> VersionChecked -> MigrationStarted | MigrationSkipped
//!      -> RenamedOrSkipped -> WorkloadsUpdated -> CleanedUp -> Done
//! ```
//!
//! Any error moves to `Failed` and leaves the upgrade marker in place, so the
//! next invocation resumes where this one stopped.

use std::fmt;

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::ConfigMap;
use tracing::{debug, info};

use crate::authority::CertificateAuthority;
use crate::error::SkupError;
use crate::exposure::PollPolicy;
use crate::names::{
    DEFAULT_CONTROLLER_IMAGE_REPOSITORY, DEFAULT_ROUTER_IMAGE_REPOSITORY,
    NAMING_SCHEME_THRESHOLD, TRANSPORT_CONFIG_MAP,
};
use crate::phases::migration::{self, MigrationOutcome};
use crate::phases::workloads::{self, WorkloadPlan, WorkloadsOutcome};
use crate::phases::{Notice, SiteContext, cleanup};
use crate::site::RouterConfig;
use crate::state::UpgradeTracker;
use crate::store::{ObjectStore, get_required};
use crate::version;

/// Inputs of one upgrade invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeConfig {
    pub namespace: String,
    /// Version the site is brought to.
    pub library_version: String,
    pub router_image: String,
    pub controller_image: String,
    /// Restart both workloads even if nothing changed.
    pub force_restart: bool,
    pub poll: PollPolicy,
}

impl UpgradeConfig {
    /// Config using the default images for `library_version`.
    pub fn new(namespace: impl Into<String>, library_version: impl Into<String>) -> Self {
        let library_version = library_version.into();
        Self {
            namespace: namespace.into(),
            router_image: format!("{DEFAULT_ROUTER_IMAGE_REPOSITORY}:{library_version}"),
            controller_image: format!("{DEFAULT_CONTROLLER_IMAGE_REPOSITORY}:{library_version}"),
            library_version,
            force_restart: false,
            poll: PollPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeState {
    Idle,
    VersionChecked,
    MigrationSkipped,
    MigrationStarted,
    RenamedOrSkipped,
    WorkloadsUpdated,
    CleanedUp,
    Done,
    Failed,
}

impl fmt::Display for UpgradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::VersionChecked => "VersionChecked",
            Self::MigrationSkipped => "MigrationSkipped",
            Self::MigrationStarted => "MigrationStarted",
            Self::RenamedOrSkipped => "RenamedOrSkipped",
            Self::WorkloadsUpdated => "WorkloadsUpdated",
            Self::CleanedUp => "CleanedUp",
            Self::Done => "Done",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Decisions taken once per invocation and read by every phase.
///
/// Route usage and IP exposure are only known once the migration has looked
/// at the site; they are carried by [`MigrationOutcome`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeDecision {
    /// Migrate legacy names to the current naming scheme.
    pub rename: bool,
    /// Site metadata is rewritten to the library version.
    pub update_site: bool,
    /// Restart the transport even if its definition is unchanged.
    pub restart_transport: bool,
    /// Restart the controller even if its definition is unchanged.
    pub restart_controller: bool,
    /// A marker from an earlier invocation was found.
    pub resumed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeReport {
    /// Anything was changed.
    pub updated: bool,
    pub previous_version: String,
    pub version: String,
    pub decision: UpgradeDecision,
    pub migration: Option<MigrationOutcome>,
    pub workloads: WorkloadsOutcome,
    /// Legacy objects removed by cleanup.
    pub deleted: Vec<String>,
}

impl UpgradeReport {
    pub fn notices(&self) -> &[Notice] {
        &self.workloads.notices
    }
}

pub struct Orchestrator<'a, S, A> {
    store: &'a S,
    authority: &'a A,
    config: &'a UpgradeConfig,
    state: UpgradeState,
}

impl<'a, S, A> Orchestrator<'a, S, A>
where
    S: ObjectStore,
    A: CertificateAuthority,
{
    pub const fn new(store: &'a S, authority: &'a A, config: &'a UpgradeConfig) -> Self {
        Self {
            store,
            authority,
            config,
            state: UpgradeState::Idle,
        }
    }

    pub const fn state(&self) -> UpgradeState {
        self.state
    }

    fn transition(&mut self, next: UpgradeState) {
        debug!("Upgrade state: {} -> {}", self.state, next);
        self.state = next;
    }

    /// Run the upgrade to completion.
    pub async fn run(&mut self) -> Result<UpgradeReport> {
        match self.execute().await {
            Ok(report) => {
                self.transition(UpgradeState::Done);
                Ok(report)
            }
            Err(e) => {
                self.transition(UpgradeState::Failed);
                Err(e)
            }
        }
    }

    async fn execute(&mut self) -> Result<UpgradeReport> {
        let config = self.config;
        let tracker = UpgradeTracker::new(self.store);
        let library = config.library_version.as_str();

        let mut config_map: ConfigMap = get_required(self.store, TRANSPORT_CONFIG_MAP)
            .await
            .context("Loading site configuration")?;
        let mut router_config = RouterConfig::from_config_map(&config_map)?;
        let mut site = router_config.site_metadata()?;
        let previous_version = site.version.clone();

        if version::more_recent_than(&site.version, library) {
            return Err(SkupError::SiteNewerThanLibrary {
                site: site.version,
                library: library.to_string(),
            }
            .into());
        }
        self.transition(UpgradeState::VersionChecked);

        let status = tracker.status().await?;
        let resumed = status.in_progress;
        let mut in_progress = status.in_progress;
        let mut rename = status
            .original_version
            .as_deref()
            .is_some_and(|from| version::less_recent_than(from, NAMING_SCHEME_THRESHOLD));
        if resumed {
            info!(
                "Resuming upgrade started from {} (rename: {})",
                status.original_version.as_deref().unwrap_or_default(),
                rename
            );
        }

        let owner_refs = config_map.metadata.owner_references.clone();
        let update_site = version::needs_realignment(library, &site.version);
        if update_site {
            if !in_progress && version::less_recent_than(&site.version, NAMING_SCHEME_THRESHOLD) {
                tracker.start(&site.version, owner_refs.clone()).await?;
                in_progress = true;
                rename = true;
            }
            site.version = library.to_string();
            router_config.set_site_metadata(&site)?;
            router_config.write_to_config_map(&mut config_map)?;
            self.store
                .replace(&config_map)
                .await
                .context("Recording site version")?;
            info!("Site version {} -> {}", previous_version, library);
        }

        // The transport reads the site metadata at startup, so a version bump
        // needs a transport restart.
        let decision = UpgradeDecision {
            rename,
            update_site,
            restart_transport: config.force_restart || update_site,
            restart_controller: config.force_restart,
            resumed,
        };
        self.transition(if rename {
            UpgradeState::MigrationStarted
        } else {
            UpgradeState::MigrationSkipped
        });

        let ctx = SiteContext {
            store: self.store,
            namespace: &config.namespace,
            owner_refs,
            poll: config.poll,
        };

        let migration = if decision.rename {
            Some(migration::execute(&ctx, self.authority).await?)
        } else {
            None
        };
        self.transition(UpgradeState::RenamedOrSkipped);

        let transport = WorkloadPlan {
            image: &config.router_image,
            rename: decision.rename,
            force: decision.restart_transport,
        };
        let controller = WorkloadPlan {
            image: &config.controller_image,
            rename: decision.rename,
            force: decision.restart_controller,
        };
        let workloads =
            workloads::execute(&ctx, &transport, &controller, migration.as_ref()).await?;
        self.transition(UpgradeState::WorkloadsUpdated);

        let deleted = match &migration {
            Some(outcome) => cleanup::execute(&ctx, outcome).await?,
            None => Vec::new(),
        };
        self.transition(UpgradeState::CleanedUp);

        if in_progress {
            tracker.finish().await?;
        }

        Ok(UpgradeReport {
            updated: decision.update_site
                || workloads.transport_updated
                || workloads.controller_updated,
            previous_version,
            version: site.version,
            decision,
            migration,
            workloads,
            deleted,
        })
    }
}
