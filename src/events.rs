//! Kubernetes Events emitted by the operator
//!
//! Events are fire-and-forget: a failed publish is logged and never fails
//! the reconcile or the admission request that produced it.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use tracing::warn;

/// Publishes Events about Kubernetes objects
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an Event about `resource_ref`
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publisher backed by `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Publisher reporting as `controller_name`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "failed to publish event");
        }
    }
}

/// Publisher that drops every Event
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Event reasons, shown in the REASON column of `kubectl get events`
pub mod reasons {
    /// A managed object was created
    pub const CREATED: &str = "Created";
    /// A managed object was updated after a HyperConverged change
    pub const UPDATED: &str = "Updated";
    /// An out-of-band modification of a managed object was reverted
    pub const OVERWRITTEN: &str = "Overwritten";
    /// A managed object is being removed
    pub const KILLING: &str = "Killing";
    /// The HyperConverged uninstall is blocked
    pub const ERR_HCO_UNINSTALL: &str = "ErrHCOUninstall";
    /// The virtualization engine could not be removed
    pub const ERR_VIRT_UNINSTALL: &str = "ErrVirtUninstall";
    /// The data importer could not be removed
    pub const ERR_CDI_UNINSTALL: &str = "ErrCDIUninstall";
    /// An upgrade patch changed the HyperConverged resource
    pub const UPGRADE_PATCH_APPLIED: &str = "UpgradePatchApplied";
}

/// Event actions, shown in the ACTION column of `kubectl get events`
pub mod actions {
    /// Regular reconcile
    pub const RECONCILE: &str = "Reconcile";
    /// Upgrade handling
    pub const UPGRADE: &str = "Upgrade";
    /// Uninstall handling
    pub const UNINSTALL: &str = "Uninstall";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_publisher_accepts_events() {
        NoopEventPublisher
            .publish(
                &ObjectReference::default(),
                EventType::Normal,
                reasons::CREATED,
                actions::RECONCILE,
                Some("Created KubeVirt kubevirt-kubevirt-hyperconverged".to_string()),
            )
            .await;
    }

    #[tokio::test]
    async fn mock_publisher_records_reason() {
        let mut publisher = MockEventPublisher::new();
        publisher
            .expect_publish()
            .withf(|_, type_, reason, action, _| {
                *type_ == EventType::Warning
                    && reason == reasons::ERR_VIRT_UNINSTALL
                    && action == actions::UNINSTALL
            })
            .times(1)
            .return_const(());

        publisher
            .publish(
                &ObjectReference::default(),
                EventType::Warning,
                reasons::ERR_VIRT_UNINSTALL,
                actions::UNINSTALL,
                None,
            )
            .await;
    }
}
