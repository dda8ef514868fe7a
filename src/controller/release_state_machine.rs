//! Finite state model for the PersistentVolume release protocol.
//!
//! A mirrored volume's deletion is gated by a protective finalizer. Whether
//! that finalizer may be removed depends on three observable facts on the
//! volume itself: its phase, whether deletion has been requested, and whether
//! a claim has ever bound it. This module captures those facts as an explicit
//! tagged state and derives the single allowed action, so the reconciler is a
//! thin loop around a decision that can be tested without a cluster.

use std::fmt;

use k8s_openapi::api::core::v1::PersistentVolume;

use crate::crd::VolumePhase;
use crate::resources::persistent_volume::{PV_FINALIZER, claim_ref_bound};

/// Observed state of a mirrored volume, captured from a single fresh read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseState {
    /// Phase reported by the binding subsystem.
    pub phase: VolumePhase,
    /// Whether the protective finalizer is present.
    pub protected: bool,
    /// Whether the deletion timestamp is set.
    pub deletion_requested: bool,
    /// Whether a claim has ever bound this volume.
    pub ever_bound: bool,
}

/// The single action a release pass may take for a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseAction {
    /// Steady state, or a deletion already past the point of protection.
    /// Nothing to do.
    Keep,
    /// The marker is missing on a live volume; re-add it.
    AttachProtection,
    /// Deletion is requested but the volume may still be in use; wait for
    /// the next phase notification.
    Wait,
    /// Deletion is requested and the volume is safely unbound; remove the
    /// marker so the API server can finalize the delete.
    RemoveProtection,
}

impl fmt::Display for ReleaseAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseAction::Keep => write!(f, "Keep"),
            ReleaseAction::AttachProtection => write!(f, "AttachProtection"),
            ReleaseAction::Wait => write!(f, "Wait"),
            ReleaseAction::RemoveProtection => write!(f, "RemoveProtection"),
        }
    }
}

impl ReleaseState {
    /// Capture the release-relevant state of a volume.
    ///
    /// "Ever bound" is true once the phase shows a binding happened (Bound or
    /// Released) or the claimRef carries a uid; a pre-bind claimRef with only
    /// a name does not count.
    pub fn observe(pv: &PersistentVolume) -> Self {
        let phase = pv
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .map(VolumePhase::parse)
            .unwrap_or_default();
        let protected = pv
            .metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|name| name == PV_FINALIZER));
        let deletion_requested = pv.metadata.deletion_timestamp.is_some();
        let ever_bound = matches!(phase, VolumePhase::Bound | VolumePhase::Released)
            || claim_ref_bound(pv);

        Self {
            phase,
            protected,
            deletion_requested,
            ever_bound,
        }
    }

    /// Decide the single allowed action for this state.
    pub fn next_action(&self) -> ReleaseAction {
        match (self.deletion_requested, self.protected) {
            // Live volume missing its marker: re-add it. This is the only
            // point where the marker may (re)appear.
            (false, false) => ReleaseAction::AttachProtection,

            // Steady state while the volume lives its normal lifecycle.
            (false, true) => ReleaseAction::Keep,

            // Deletion under way and the marker is already gone. Re-adding it
            // now would resurrect a half-finalized object, so the removal is
            // monotonic: treat as already satisfied.
            (true, false) => ReleaseAction::Keep,

            (true, true) => {
                if self.phase == VolumePhase::Released {
                    // The claim is gone and reclamation has run its course.
                    return ReleaseAction::RemoveProtection;
                }
                if !self.ever_bound
                    && matches!(self.phase, VolumePhase::Pending | VolumePhase::Available)
                {
                    // Never-bound rule: a volume no claim ever bound will
                    // never reach Released, and holding the marker would wait
                    // forever on a transition that cannot occur. Unbound
                    // means not in use, so finalizing is safe.
                    return ReleaseAction::RemoveProtection;
                }
                // Bound, Failed, or otherwise not provably unbound: hold the
                // marker and re-check on the next phase notification.
                ReleaseAction::Wait
            }
        }
    }
}
