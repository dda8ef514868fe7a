//! Scenario tests for the PersistentVolume release protocol.
//!
//! Each test drives a simulated volume through external events (claim binds,
//! claim deletions, volume deletion requests) and lets the production state
//! machine decide every reconcile pass.

use namespaced_pv_operator::controller::release_state_machine::ReleaseAction;
use namespaced_pv_operator::crd::VolumePhase;

use crate::mock_state::MockVolumeState;

#[test]
fn test_normal_lifecycle_ends_in_finalization() {
    // Scenario: provision, bind, delete the claim, then delete the volume
    let mut vol = MockVolumeState::new("req1-team-a");
    assert_eq!(vol.reconcile_step(), ReleaseAction::Keep);

    vol.become_available();
    vol.bind();
    assert_eq!(vol.reconcile_step(), ReleaseAction::Keep);

    vol.release_claim();
    vol.request_deletion();
    assert!(vol.exists, "finalizer must hold the object");

    assert_eq!(vol.reconcile_step(), ReleaseAction::RemoveProtection);
    assert!(!vol.exists, "volume should be finalized once released");
}

#[test]
fn test_request_deleted_while_bound_waits() {
    // Scenario: the request is deleted while a workload still uses the volume
    let mut vol = MockVolumeState::new("req1-team-a");
    vol.become_available();
    vol.bind();
    vol.request_deletion();

    // The volume stays protected for as long as it remains bound
    for _ in 0..5 {
        assert_eq!(vol.reconcile_step(), ReleaseAction::Wait);
        assert!(vol.exists);
        assert!(vol.protected);
    }

    // Only once the claim goes away does the release happen
    vol.release_claim();
    assert_eq!(vol.reconcile_step(), ReleaseAction::RemoveProtection);
    assert!(!vol.exists);
}

#[test]
fn test_stripped_finalizer_is_reattached_before_deletion() {
    // Scenario: an admin removes the marker from a live volume
    let mut vol = MockVolumeState::new("req1-team-a");
    vol.become_available();
    vol.strip_finalizer();
    assert!(vol.exists, "no deletion requested, the object survives");

    assert_eq!(vol.reconcile_step(), ReleaseAction::AttachProtection);
    assert!(vol.protected);
}

#[test]
fn test_stripped_finalizer_is_not_reattached_during_deletion() {
    // Scenario: an admin force-removes the marker after deletion started.
    // Re-adding it would resurrect a half-finalized object.
    let mut vol = MockVolumeState::new("req1-team-a");
    vol.become_available();
    vol.bind();
    vol.request_deletion();
    assert_eq!(vol.reconcile_step(), ReleaseAction::Wait);

    vol.strip_finalizer();
    assert!(!vol.exists, "without the marker the API server finishes the delete");
}

#[test]
fn test_never_bound_volume_is_released_immediately() {
    // Scenario: the request is deleted before any claim ever bound the
    // volume. Released will never be reported, so waiting for it would
    // leak the object forever.
    for make_available in [false, true] {
        let mut vol = MockVolumeState::new("req1-team-a");
        if make_available {
            vol.become_available();
        }
        vol.request_deletion();

        assert_eq!(vol.reconcile_step(), ReleaseAction::RemoveProtection);
        assert!(!vol.exists, "never-bound volume must not leak");
    }
}

#[test]
fn test_previously_bound_volume_is_not_released_early() {
    // A Pending phase after an unbind still implies a past binding; the
    // never-bound shortcut must not apply.
    let mut vol = MockVolumeState::new("req1-team-a");
    vol.become_available();
    vol.bind();
    vol.phase = VolumePhase::Pending;
    vol.request_deletion();

    assert_eq!(vol.reconcile_step(), ReleaseAction::Wait);
    assert!(vol.exists);
}

#[test]
fn test_failed_volume_waits_conservatively() {
    let mut vol = MockVolumeState::new("req1-team-a");
    vol.become_available();
    vol.bind();
    vol.phase = VolumePhase::Failed;
    vol.request_deletion();

    assert_eq!(vol.reconcile_step(), ReleaseAction::Wait);
    assert!(vol.protected);
}

#[test]
fn test_rebind_conflict_during_removal_keeps_marker() {
    // Scenario: a never-bound volume's deletion is requested and removal is
    // decided, but a claim binds the volume before the guarded patch lands.
    // The patch conflicts; the stale decision must be discarded, not
    // re-applied against the newer state.
    let mut vol = MockVolumeState::new("req1-team-a");
    vol.become_available();
    vol.request_deletion();

    let decided = vol.reconcile_step_conflicted(|v| v.bind());
    assert_eq!(decided, ReleaseAction::RemoveProtection);
    assert!(vol.protected, "stale removal must not land after the rebind");
    assert!(vol.exists);

    // the requeued pass re-observes the now-bound volume and waits
    assert_eq!(vol.reconcile_step(), ReleaseAction::Wait);
    assert!(vol.exists);

    // normal release path still completes afterwards
    vol.release_claim();
    assert_eq!(vol.reconcile_step(), ReleaseAction::RemoveProtection);
    assert!(!vol.exists);
}

#[test]
fn test_safety_bound_volume_is_never_finalized() {
    // Safety: no interleaving of reconcile passes may finalize a volume
    // while a claim holds it.
    let mut vol = MockVolumeState::new("req1-team-a");
    vol.become_available();
    vol.bind();
    vol.request_deletion();

    for _ in 0..100 {
        vol.reconcile_step();
        assert!(
            vol.exists,
            "volume finalized while still bound to a claim"
        );
    }
}

#[test]
fn test_liveness_released_volume_is_always_finalized() {
    // Liveness: once deletion is requested and the claim is gone, a bounded
    // number of passes removes the volume.
    let mut vol = MockVolumeState::new("req1-team-a");
    vol.become_available();
    vol.bind();
    vol.request_deletion();
    vol.reconcile_step();
    vol.release_claim();

    let mut passes = 0;
    while vol.exists {
        vol.reconcile_step();
        passes += 1;
        assert!(passes <= 3, "release protocol did not converge");
    }
}

#[test]
fn test_reconcile_is_idempotent_in_steady_state() {
    let mut vol = MockVolumeState::new("req1-team-a");
    vol.become_available();

    let before = vol.observe();
    for _ in 0..10 {
        assert_eq!(vol.reconcile_step(), ReleaseAction::Keep);
    }
    assert_eq!(vol.observe(), before);
}
