//! Reconciliation loop for NamespacedPv requests.
//!
//! Ensures exactly one correctly-specified mirrored PersistentVolume exists
//! while the request exists, and that its deletion is requested once the
//! request is gone. All mutations land on the PersistentVolume; the request
//! itself only receives status and finalizer bookkeeping.

use std::sync::Arc;
use std::time::{Duration, Instant};

use k8s_openapi::api::core::v1::PersistentVolume;
use kube::{
    Api, ResourceExt,
    api::{DeleteParams, Patch, PatchParams, PostParams},
    runtime::controller::Action,
};
use tracing::{debug, error, info, warn};

use crate::controller::{common, context::Context, error::Error};
use crate::crd::{Condition, NamespacedPv, NamespacedPvStatus};
use crate::resources::persistent_volume as mirror;

/// Finalizer on the request itself, held until the cascade delete of the
/// mirrored volume has been issued.
pub const FINALIZER: &str = "namespacedpv.homi.run/finalizer";

/// Requeue interval once the request is in its steady state.
const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Reconcile a NamespacedPv
pub async fn reconcile(obj: Arc<NamespacedPv>, ctx: Arc<Context>) -> Result<Action, Error> {
    let start_time = Instant::now();
    let name = obj.name_any();
    let namespace = obj
        .namespace()
        .ok_or_else(|| Error::MissingField("metadata.namespace".to_string()))?;

    debug!(name = %name, namespace = %namespace, "Reconciling NamespacedPv");

    let api: Api<NamespacedPv> = Api::namespaced(ctx.client.clone(), &namespace);
    let pv_api: Api<PersistentVolume> = Api::all(ctx.client.clone());

    // Handle deletion
    if obj.metadata.deletion_timestamp.is_some() {
        return handle_deletion(&obj, &ctx, &api, &pv_api).await;
    }

    // Ensure finalizer is present before creating anything it guards
    if !obj.finalizers().iter().any(|f| f == FINALIZER) {
        info!(name = %name, namespace = %namespace, "Adding finalizer");
        common::add_finalizer(&api, &name, FINALIZER).await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    // A malformed spec is terminal for this generation: surface it and wait
    // for the user to change the spec rather than retrying
    if let Err(e) = validate_spec(&obj) {
        error!(name = %name, namespace = %namespace, error = %e, "Validation failed");
        ctx.publish_warning_event(&obj, "ValidationFailed", "Validating", Some(e.to_string()))
            .await;
        let generation = obj.metadata.generation;
        update_status(
            &api,
            &obj,
            NamespacedPvStatus {
                volume_name: None,
                phase: None,
                observed_generation: generation,
                conditions: vec![
                    Condition::ready(false, "ValidationFailed", &e.to_string(), generation),
                    Condition::degraded(true, "ValidationFailed", &e.to_string(), generation),
                ],
            },
        )
        .await?;
        return Err(e);
    }

    let pv_name = mirror::mirrored_pv_name(&obj)?;
    let Some(existing) = pv_api.get_opt(&pv_name).await? else {
        let pv = mirror::generate(&obj)?;
        info!(name = %name, namespace = %namespace, volume = %pv_name, "Creating mirrored PersistentVolume");
        match pv_api.create(&PostParams::default(), &pv).await {
            Ok(_) => {
                ctx.publish_normal_event(
                    &obj,
                    "Provisioned",
                    "CreateVolume",
                    Some(format!("Created PersistentVolume {pv_name}")),
                )
                .await;
                if let Some(ref health_state) = ctx.health_state {
                    health_state.metrics.record_volume_provisioned();
                }
            }
            Err(kube::Error::Api(e)) if e.code == 409 => {
                // Lost a create race; the next pass diffs the winner
                debug!(volume = %pv_name, "PersistentVolume appeared concurrently");
                return Ok(Action::requeue(Duration::from_secs(1)));
            }
            Err(e) => return Err(e.into()),
        }

        // Provisioning is under way; the follow-up pass observes the created
        // volume and flips the status to Ready
        let generation = obj.metadata.generation;
        update_status(
            &api,
            &obj,
            NamespacedPvStatus {
                volume_name: Some(pv_name.clone()),
                phase: None,
                observed_generation: generation,
                conditions: vec![Condition::progressing(
                    true,
                    "Provisioning",
                    &format!("Creating PersistentVolume {pv_name}"),
                    generation,
                )],
            },
        )
        .await?;

        if let Some(ref health_state) = ctx.health_state {
            let duration = start_time.elapsed().as_secs_f64();
            health_state
                .metrics
                .record_reconcile("namespacedpv", &namespace, &name, duration);
        }
        return Ok(Action::requeue(Duration::from_secs(1)));
    };

    if !mirror::is_managed(&existing) {
        let msg = format!(
            "PersistentVolume {pv_name} already exists and is not managed by this controller"
        );
        warn!(name = %name, namespace = %namespace, volume = %pv_name, "Volume name collision");
        ctx.publish_warning_event(&obj, "VolumeConflict", "CreateVolume", Some(msg.clone()))
            .await;
        let generation = obj.metadata.generation;
        update_status(
            &api,
            &obj,
            NamespacedPvStatus {
                volume_name: None,
                phase: None,
                observed_generation: generation,
                conditions: vec![
                    Condition::ready(false, "VolumeConflict", &msg, generation),
                    Condition::degraded(true, "VolumeConflict", &msg, generation),
                ],
            },
        )
        .await?;
        return Err(Error::Validation(msg));
    }

    if mirror::needs_update(&existing, &obj) {
        info!(name = %name, namespace = %namespace, volume = %pv_name, "Updating drifted PersistentVolume spec");
        let patch = mirror::spec_patch(&existing, &obj)?;
        pv_api
            .patch(&pv_name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
    }

    let observed_phase = existing.status.as_ref().and_then(|s| s.phase.clone());

    let generation = obj.metadata.generation;
    update_status(
        &api,
        &obj,
        NamespacedPvStatus {
            volume_name: Some(pv_name.clone()),
            phase: observed_phase,
            observed_generation: generation,
            conditions: vec![Condition::ready(
                true,
                "VolumeProvisioned",
                &format!("Mirrored PersistentVolume {pv_name} exists"),
                generation,
            )],
        },
    )
    .await?;

    if let Some(ref health_state) = ctx.health_state {
        let duration = start_time.elapsed().as_secs_f64();
        health_state
            .metrics
            .record_reconcile("namespacedpv", &namespace, &name, duration);
    }

    Ok(Action::requeue(RESYNC_INTERVAL))
}

/// Error policy for the request controller
pub fn error_policy(obj: Arc<NamespacedPv>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_default();

    if let Some(ref health_state) = ctx.health_state {
        health_state
            .metrics
            .record_error("namespacedpv", &namespace, &name);
    }

    if error.is_not_found() {
        debug!(name = %name, "Resource not found (likely deleted)");
        return Action::await_change();
    }

    if error.is_retryable() {
        warn!(name = %name, error = %error, "Retryable error, will retry");
    } else {
        error!(name = %name, error = %error, "Non-retryable error");
    }
    Action::requeue(error.requeue_after())
}

/// Validate the request spec.
///
/// An incomplete backing-store descriptor cannot produce a usable volume and
/// is a configuration error, not a transient one.
pub fn validate_spec(obj: &NamespacedPv) -> Result<(), Error> {
    if obj.spec.volume_name.is_empty() {
        return Err(Error::Validation("volumeName must not be empty".to_string()));
    }
    if obj.spec.storage_class_name.is_empty() {
        return Err(Error::Validation(
            "storageClassName must not be empty".to_string(),
        ));
    }
    if obj.spec.access_modes.is_empty() {
        return Err(Error::Validation(
            "accessModes must contain at least one mode".to_string(),
        ));
    }
    if !obj.spec.capacity.contains_key("storage") {
        return Err(Error::Validation(
            "capacity must contain a storage entry".to_string(),
        ));
    }
    if obj.spec.nfs.server.is_empty() {
        return Err(Error::Validation("nfs.server must not be empty".to_string()));
    }
    if obj.spec.nfs.path.is_empty() || !obj.spec.nfs.path.starts_with('/') {
        return Err(Error::Validation(
            "nfs.path must be an absolute path".to_string(),
        ));
    }
    if obj.spec.claim_ref_name.is_empty() {
        return Err(Error::Validation(
            "claimRefName must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Handle deletion of a NamespacedPv.
///
/// Issues the delete on the mirrored volume and drops the request finalizer
/// immediately: the protective finalizer on the volume defers the actual
/// removal until the release protocol clears it, and not-found here is the
/// success condition.
async fn handle_deletion(
    obj: &NamespacedPv,
    ctx: &Context,
    api: &Api<NamespacedPv>,
    pv_api: &Api<PersistentVolume>,
) -> Result<Action, Error> {
    let name = obj.name_any();
    let pv_name = mirror::mirrored_pv_name(obj)?;
    info!(name = %name, volume = %pv_name, "Handling deletion");

    match pv_api.get_opt(&pv_name).await? {
        Some(pv) if mirror::is_managed(&pv) => {
            if pv.metadata.deletion_timestamp.is_none() {
                match pv_api.delete(&pv_name, &DeleteParams::default()).await {
                    Ok(_) => {
                        ctx.publish_normal_event(
                            obj,
                            "Deleting",
                            "DeleteVolume",
                            Some(format!("Requested deletion of PersistentVolume {pv_name}")),
                        )
                        .await;
                    }
                    // already gone between the read and the delete
                    Err(kube::Error::Api(e)) if e.code == 404 => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Some(_) => {
            warn!(volume = %pv_name, "PersistentVolume is not managed by this controller, leaving in place");
        }
        None => {}
    }

    common::remove_finalizer(api, &name, FINALIZER).await?;
    Ok(Action::await_change())
}

/// Patch the request status, but only when something observable changed.
///
/// Condition timestamps are ignored in the comparison so a no-op pass does
/// not generate a write.
async fn update_status(
    api: &Api<NamespacedPv>,
    obj: &NamespacedPv,
    status: NamespacedPvStatus,
) -> Result<(), Error> {
    if !status_changed(obj.status.as_ref(), &status) {
        return Ok(());
    }

    let patch = serde_json::json!({ "status": status });
    api.patch_status(
        &obj.name_any(),
        &PatchParams::default(),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

/// Whether the desired status differs from the current one in any field
/// other than condition transition timestamps.
fn status_changed(current: Option<&NamespacedPvStatus>, desired: &NamespacedPvStatus) -> bool {
    let Some(current) = current else {
        return true;
    };
    if current.volume_name != desired.volume_name
        || current.phase != desired.phase
        || current.observed_generation != desired.observed_generation
        || current.conditions.len() != desired.conditions.len()
    {
        return true;
    }
    current
        .conditions
        .iter()
        .zip(desired.conditions.iter())
        .any(|(a, b)| a.r#type != b.r#type || a.status != b.status || a.reason != b.reason)
}
