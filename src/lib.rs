//! namespaced-pv-operator
//!
//! A Kubernetes operator that lets namespace-scoped users request
//! cluster-scoped PersistentVolumes. A NamespacedPv custom resource in a
//! namespace is mirrored into a PersistentVolume named
//! `<volumeName>-<namespace>`, labeled back to its owning request. A second
//! controller watches the mirrored volumes and gates their deletion behind a
//! protective finalizer until the binding subsystem reports them safely
//! unbound.

pub mod controller;
pub mod crd;
pub mod health;
pub mod resources;

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::PersistentVolume;
use kube::{
    Api, Client,
    runtime::{Controller, controller::Action, reflector::ObjectRef, watcher},
};
use tracing::{debug, warn};

use crate::controller::{context::Context, request_reconciler, release_reconciler};
use crate::crd::NamespacedPv;
use crate::resources::persistent_volume::{LABEL_OWNER, LABEL_OWNER_NAMESPACE};

/// Label selector matching mirrored PersistentVolumes.
fn ownership_selector() -> String {
    format!("{LABEL_OWNER},{LABEL_OWNER_NAMESPACE}")
}

/// Map a mirrored PersistentVolume back to the NamespacedPv that owns it.
///
/// Ownership crosses the namespace boundary, so it is carried in labels
/// rather than ownerReferences.
pub fn owning_request(pv: &PersistentVolume) -> Option<ObjectRef<NamespacedPv>> {
    let labels = pv.metadata.labels.as_ref()?;
    let owner = labels.get(LABEL_OWNER)?;
    let namespace = labels.get(LABEL_OWNER_NAMESPACE)?;
    Some(ObjectRef::new(owner).within(namespace))
}

/// Run the NamespacedPv controller until shutdown.
///
/// Watches requests in all namespaces, plus mirrored PersistentVolumes so a
/// phase transition on a volume re-queues its owning request.
pub async fn run_request_controller(client: Client, ctx: Arc<Context>) {
    let requests: Api<NamespacedPv> = Api::all(client.clone());
    let volumes: Api<PersistentVolume> = Api::all(client);

    Controller::new(requests, watcher::Config::default())
        .watches(
            volumes,
            watcher::Config::default().labels(&ownership_selector()),
            |pv| owning_request(&pv),
        )
        .shutdown_on_signal()
        .run(
            request_reconciler::reconcile,
            request_reconciler::error_policy,
            ctx,
        )
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => log_outcome("namespacedpv", &obj.name, action),
                Err(e) => warn!(error = %e, "NamespacedPv reconciliation failed"),
            }
        })
        .await;
}

/// Run the PersistentVolume controller until shutdown.
///
/// Watches only volumes carrying the ownership labels. The watch must not be
/// narrowed further: the release protocol reacts to status-only updates.
pub async fn run_release_controller(client: Client, ctx: Arc<Context>) {
    let volumes: Api<PersistentVolume> = Api::all(client);

    Controller::new(
        volumes,
        watcher::Config::default().labels(&ownership_selector()),
    )
    .shutdown_on_signal()
    .run(
        release_reconciler::reconcile,
        release_reconciler::error_policy,
        ctx,
    )
    .for_each(|result| async move {
        match result {
            Ok((obj, action)) => log_outcome("persistentvolume", &obj.name, action),
            Err(e) => warn!(error = %e, "PersistentVolume reconciliation failed"),
        }
    })
    .await;
}

fn log_outcome(controller: &str, name: &str, action: Action) {
    debug!(controller = %controller, name = %name, action = ?action, "Reconciled");
}
