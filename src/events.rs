//! Kubernetes events recorded on the site configuration record.

use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};

use crate::names::TRANSPORT_CONFIG_MAP;

pub const REASON_STARTED: &str = "UpgradeStarted";
pub const REASON_COMPLETED: &str = "UpgradeCompleted";
pub const REASON_FAILED: &str = "UpgradeFailed";
pub const REASON_SETTINGS: &str = "SettingsUpdated";

/// Reference to the configuration record of the site in `namespace`.
pub fn site_reference(namespace: &str) -> ObjectReference {
    ObjectReference {
        api_version: Some("v1".to_string()),
        kind: Some("ConfigMap".to_string()),
        name: Some(TRANSPORT_CONFIG_MAP.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

/// Event recorder bundled with its target `ObjectReference`.
pub struct EventRecorder {
    recorder: Recorder,
    obj_ref: ObjectReference,
}

impl EventRecorder {
    pub fn new(client: kube::Client, namespace: &str) -> Self {
        let reporter = Reporter {
            controller: "skup".into(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
            obj_ref: site_reference(namespace),
        }
    }

    async fn emit(&self, type_: EventType, reason: &str, message: &str) {
        self.recorder
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note: Some(message.into()),
                    action: reason.into(),
                    secondary: None,
                },
                &self.obj_ref,
            )
            .await
            .unwrap_or_else(|e| tracing::warn!("Failed to publish event: {}", e));
    }

    /// Publish a Normal event.
    pub async fn publish(&self, reason: &str, message: &str) {
        self.emit(EventType::Normal, reason, message).await;
    }

    /// Publish a Warning event.
    pub async fn publish_warning(&self, reason: &str, message: &str) {
        self.emit(EventType::Warning, reason, message).await;
    }
}
