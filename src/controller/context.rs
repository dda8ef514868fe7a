//! Shared context for the controllers.
//!
//! The Context struct holds shared state passed to both reconcilers: the
//! Kubernetes client, the event reporter identity, and the optional health
//! state used for metrics.

use std::sync::Arc;

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};

use crate::crd::NamespacedPv;
use crate::health::HealthState;

/// Field manager name for the operator
pub const FIELD_MANAGER: &str = "namespaced-pv-controller";

/// Shared context for the controllers
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Event reporter identity
    reporter: Reporter,
    /// Optional health state for metrics and readiness
    pub health_state: Option<Arc<HealthState>>,
}

impl Context {
    /// Create a new context
    pub fn new(client: Client, health_state: Option<Arc<HealthState>>) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: FIELD_MANAGER.into(),
                instance: std::env::var("POD_NAME").ok(),
            },
            health_state,
        }
    }

    /// Publish a normal event for a request
    pub async fn publish_normal_event(
        &self,
        request: &NamespacedPv,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let recorder = Recorder::new(
            self.client.clone(),
            self.reporter.clone(),
            request.object_ref(&()),
        );
        if let Err(e) = recorder
            .publish(Event {
                type_: EventType::Normal,
                reason: reason.into(),
                note,
                action: action.into(),
                secondary: None,
            })
            .await
        {
            tracing::warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }

    /// Publish a warning event for a request
    pub async fn publish_warning_event(
        &self,
        request: &NamespacedPv,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let recorder = Recorder::new(
            self.client.clone(),
            self.reporter.clone(),
            request.object_ref(&()),
        );
        if let Err(e) = recorder
            .publish(Event {
                type_: EventType::Warning,
                reason: reason.into(),
                note,
                action: action.into(),
                secondary: None,
            })
            .await
        {
            tracing::warn!(reason = %reason, error = %e, "Failed to publish warning event");
        }
    }
}
