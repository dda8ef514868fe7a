//! Reconciliation loop for mirrored PersistentVolumes.
//!
//! Owns the release protocol: the protective finalizer stays on a mirrored
//! volume until the volume is provably out of use, and is removed exactly
//! once so the API server can finish the delete. Phase transitions are
//! driven externally by the binding subsystem; this loop only observes them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use kube::{Api, Client, ResourceExt, runtime::controller::Action};
use tracing::{debug, error, info, warn};

use crate::controller::{
    common,
    context::Context,
    error::Error,
    release_state_machine::{ReleaseAction, ReleaseState},
};
use crate::crd::VolumePhase;
use crate::resources::persistent_volume as mirror;

/// Requeue interval while waiting for an externally-driven phase transition.
const WAIT_INTERVAL: Duration = Duration::from_secs(30);

/// Requeue interval in steady state.
const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Reconcile a PersistentVolume
pub async fn reconcile(pv: Arc<PersistentVolume>, ctx: Arc<Context>) -> Result<Action, Error> {
    // Objects without our labels and annotation are not ours to manage
    if !mirror::is_managed(&pv) {
        return Ok(Action::await_change());
    }

    let start_time = Instant::now();
    let name = pv.name_any();
    let api: Api<PersistentVolume> = Api::all(ctx.client.clone());

    // The decision must be made against the current phase, not the cached
    // object that triggered this pass: a volume can be rebound between the
    // notification and now
    let Some(current) = api.get_opt(&name).await? else {
        debug!(volume = %name, "PersistentVolume already finalized");
        return Ok(Action::await_change());
    };

    let state = ReleaseState::observe(&current);
    debug!(
        volume = %name,
        phase = %state.phase,
        protected = state.protected,
        deletion_requested = state.deletion_requested,
        action = %state.next_action(),
        "Observed release state"
    );

    let action = match state.next_action() {
        ReleaseAction::AttachProtection => {
            info!(volume = %name, "Attaching protective finalizer");
            common::add_finalizer(&api, &name, mirror::PV_FINALIZER).await?;
            Action::requeue(Duration::from_secs(1))
        }
        ReleaseAction::RemoveProtection => {
            // Rebind tie-break for the never-bound rule: if a claim has
            // raced in and currently holds the volume, keep the marker and
            // wait for the normal release path
            if state.phase != VolumePhase::Released
                && claim_holds_volume(&ctx.client, &current).await?
            {
                warn!(volume = %name, "Claim bound the volume during deletion, keeping finalizer");
                Action::requeue(Duration::from_secs(10))
            } else {
                // The removal patch carries the resourceVersion of the read
                // the decision was made against. A conflict means something
                // wrote the volume since (possibly a rebind), so the
                // decision is stale: requeue and re-run the whole check
                // instead of retrying the patch against newer state.
                match common::remove_finalizer_observed(&api, &current, mirror::PV_FINALIZER).await
                {
                    Ok(()) => {
                        info!(volume = %name, phase = %state.phase, "Volume safely unbound, removed protective finalizer");
                        if let Some(ref health_state) = ctx.health_state {
                            health_state.metrics.record_volume_released();
                        }
                        Action::await_change()
                    }
                    Err(e) if e.is_conflict() => {
                        debug!(volume = %name, "Volume changed during finalizer removal, re-observing");
                        Action::requeue(Duration::from_secs(1))
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        ReleaseAction::Wait => {
            debug!(volume = %name, phase = %state.phase, "Deletion requested, waiting for release");
            Action::requeue(WAIT_INTERVAL)
        }
        ReleaseAction::Keep => Action::requeue(RESYNC_INTERVAL),
    };

    if let Some(ref health_state) = ctx.health_state {
        let duration = start_time.elapsed().as_secs_f64();
        health_state
            .metrics
            .record_reconcile("persistentvolume", "", &name, duration);
    }

    Ok(action)
}

/// Error policy for the release controller
pub fn error_policy(pv: Arc<PersistentVolume>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = pv.name_any();

    if let Some(ref health_state) = ctx.health_state {
        health_state
            .metrics
            .record_error("persistentvolume", "", &name);
    }

    if error.is_not_found() {
        debug!(volume = %name, "Volume not found (likely finalized)");
        return Action::await_change();
    }

    if error.is_retryable() {
        warn!(volume = %name, error = %error, "Retryable error, will retry");
    } else {
        error!(volume = %name, error = %error, "Non-retryable error");
    }
    Action::requeue(error.requeue_after())
}

/// Whether the claim referenced by the volume currently holds it.
///
/// Reads the claim fresh; a not-found claim means nothing holds the volume.
async fn claim_holds_volume(client: &Client, pv: &PersistentVolume) -> Result<bool, Error> {
    let Some(claim_ref) = pv.spec.as_ref().and_then(|s| s.claim_ref.as_ref()) else {
        return Ok(false);
    };
    let (Some(claim_name), Some(claim_namespace)) =
        (claim_ref.name.as_deref(), claim_ref.namespace.as_deref())
    else {
        return Ok(false);
    };

    let claim_api: Api<PersistentVolumeClaim> = Api::namespaced(client.clone(), claim_namespace);
    let Some(claim) = claim_api.get_opt(claim_name).await? else {
        return Ok(false);
    };

    Ok(claim
        .spec
        .as_ref()
        .and_then(|s| s.volume_name.as_deref())
        .is_some_and(|bound| Some(bound) == pv.metadata.name.as_deref()))
}
