//! Persisted upgrade marker.
//!
//! The marker is a ConfigMap whose existence means "a migration started and
//! has not finished". It records the version the site had when the migration
//! started. Nothing else in the crate reads or writes it.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ObjectMeta;
use tracing::info;

use crate::names::{UPDATE_STATE_CONFIG_MAP, UPDATE_STATE_FROM_KEY};
use crate::store::{ObjectStore, ignore_not_found};

/// Result of [`UpgradeTracker::status`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeStatus {
    pub in_progress: bool,
    pub original_version: Option<String>,
}

pub struct UpgradeTracker<'a, S> {
    store: &'a S,
}

impl<'a, S: ObjectStore> UpgradeTracker<'a, S> {
    pub const fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Record that a migration from `from` has started.
    ///
    /// Fails if a marker already exists.
    pub async fn start(&self, from: &str, owner_refs: Option<Vec<OwnerReference>>) -> Result<()> {
        let marker = ConfigMap {
            metadata: ObjectMeta {
                name: Some(UPDATE_STATE_CONFIG_MAP.to_string()),
                owner_references: owner_refs,
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                UPDATE_STATE_FROM_KEY.to_string(),
                from.to_string(),
            )])),
            ..Default::default()
        };
        self.store
            .create(&marker)
            .await
            .context("Recording upgrade start")?;
        info!("Upgrade from {} started", from);
        Ok(())
    }

    /// Clear the marker. An already cleared marker is not an error.
    pub async fn finish(&self) -> Result<()> {
        let removed = ignore_not_found(self.store.delete::<ConfigMap>(UPDATE_STATE_CONFIG_MAP).await)
            .context("Clearing upgrade marker")?;
        if removed {
            info!("Upgrade marker cleared");
        }
        Ok(())
    }

    pub async fn status(&self) -> Result<UpgradeStatus> {
        let marker = self
            .store
            .get::<ConfigMap>(UPDATE_STATE_CONFIG_MAP)
            .await
            .context("Reading upgrade marker")?;
        Ok(marker.map_or_else(UpgradeStatus::default, |cm| UpgradeStatus {
            in_progress: true,
            original_version: Some(
                cm.data
                    .and_then(|mut d| d.remove(UPDATE_STATE_FROM_KEY))
                    .unwrap_or_default(),
            ),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SkupError;
    use crate::store::memory::MemoryStore;

    #[tokio::test]
    async fn test_status_without_marker() {
        let store = MemoryStore::new();
        let status = UpgradeTracker::new(&store).status().await.unwrap();
        assert!(!status.in_progress);
        assert!(status.original_version.is_none());
    }

    #[tokio::test]
    async fn test_start_status_finish() {
        let store = MemoryStore::new();
        let tracker = UpgradeTracker::new(&store);
        let owner = OwnerReference {
            name: "skupper-site".to_string(),
            kind: "ConfigMap".to_string(),
            ..Default::default()
        };

        tracker.start("0.4.2", Some(vec![owner])).await.unwrap();
        let status = tracker.status().await.unwrap();
        assert!(status.in_progress);
        assert_eq!(status.original_version.as_deref(), Some("0.4.2"));

        let marker: ConfigMap = store.read(UPDATE_STATE_CONFIG_MAP).unwrap();
        assert_eq!(marker.metadata.owner_references.unwrap()[0].name, "skupper-site");

        tracker.finish().await.unwrap();
        assert!(!tracker.status().await.unwrap().in_progress);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let store = MemoryStore::new();
        let tracker = UpgradeTracker::new(&store);
        tracker.start("0.4.2", None).await.unwrap();
        let err = tracker.start("0.4.2", None).await.unwrap_err();
        assert!(
            err.downcast_ref::<SkupError>()
                .is_some_and(SkupError::is_already_exists)
        );
    }

    #[tokio::test]
    async fn test_finish_without_marker() {
        let store = MemoryStore::new();
        UpgradeTracker::new(&store).finish().await.unwrap();
        assert_eq!(store.mutation_count(), 0);
    }
}
