// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Property-based tests for namespaced-pv-operator.
//!
//! Uses proptest to generate random inputs and verify invariants of the
//! mirroring scheme and the release state machine.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use proptest::prelude::*;

use namespaced_pv_operator::controller::release_state_machine::{ReleaseAction, ReleaseState};
use namespaced_pv_operator::crd::{
    AccessMode, NamespacedPv, NamespacedPvSpec, Nfs, ReclaimPolicy, VolumePhase,
};
use namespaced_pv_operator::resources::persistent_volume::{
    generate, is_managed, mirrored_pv_name, needs_update, parse_mount_options,
};

/// Strategy for DNS-1123 label names.
fn name_strategy() -> impl Strategy<Value = String> {
    "[a-z]([a-z0-9-]{0,20}[a-z0-9])?"
}

/// Strategy for generating random volume phases.
fn any_phase() -> impl Strategy<Value = VolumePhase> {
    prop_oneof![
        Just(VolumePhase::Pending),
        Just(VolumePhase::Available),
        Just(VolumePhase::Bound),
        Just(VolumePhase::Released),
        Just(VolumePhase::Failed),
    ]
}

/// Strategy for generating arbitrary release states.
///
/// ever_bound is forced true for Bound and Released phases, mirroring how
/// observation derives it.
fn any_release_state() -> impl Strategy<Value = ReleaseState> {
    (any_phase(), any::<bool>(), any::<bool>(), any::<bool>()).prop_map(
        |(phase, protected, deletion_requested, ever_bound)| ReleaseState {
            phase,
            protected,
            deletion_requested,
            ever_bound: ever_bound
                || matches!(phase, VolumePhase::Bound | VolumePhase::Released),
        },
    )
}

fn request(name: &str, namespace: &str, volume_name: &str) -> NamespacedPv {
    let mut npv = NamespacedPv::new(
        name,
        NamespacedPvSpec {
            volume_name: volume_name.to_string(),
            storage_class_name: "nfs".to_string(),
            access_modes: vec![AccessMode::ReadWriteOnce],
            capacity: BTreeMap::from([("storage".to_string(), Quantity("1Gi".to_string()))]),
            nfs: Nfs {
                server: "127.0.0.1".to_string(),
                path: "/data".to_string(),
                read_only: false,
            },
            reclaim_policy: ReclaimPolicy::Retain,
            mount_options: String::new(),
            claim_ref_name: "claim".to_string(),
        },
    );
    npv.metadata.namespace = Some(namespace.to_string());
    npv
}

proptest! {
    /// Property: the mirrored volume name is a pure function of
    /// (volumeName, namespace).
    #[test]
    fn test_mirrored_name_is_deterministic(
        name in name_strategy(),
        namespace in name_strategy(),
        volume_name in name_strategy(),
    ) {
        let npv = request(&name, &namespace, &volume_name);
        let first = mirrored_pv_name(&npv).unwrap();
        let second = mirrored_pv_name(&npv).unwrap();
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first, format!("{volume_name}-{namespace}"));
    }

    /// Property: distinct namespaces never map to the same volume name for
    /// the same requested volumeName.
    #[test]
    fn test_namespaces_never_collide(
        volume_name in name_strategy(),
        ns_a in name_strategy(),
        ns_b in name_strategy(),
    ) {
        prop_assume!(ns_a != ns_b);
        let a = mirrored_pv_name(&request("r", &ns_a, &volume_name)).unwrap();
        let b = mirrored_pv_name(&request("r", &ns_b, &volume_name)).unwrap();
        prop_assert_ne!(a, b);
    }

    /// Property: generation is stable and self-consistent. A generated
    /// volume is recognized as managed and needs no immediate update.
    #[test]
    fn test_generate_is_stable(
        name in name_strategy(),
        namespace in name_strategy(),
        volume_name in name_strategy(),
    ) {
        let npv = request(&name, &namespace, &volume_name);
        let pv = generate(&npv).unwrap();
        prop_assert!(is_managed(&pv));
        prop_assert!(!needs_update(&pv, &npv));
    }

    /// Property: mount option parsing never produces empty entries and
    /// never invents content.
    #[test]
    fn test_mount_options_are_clean(raw in "[a-z=,. ]{0,40}") {
        if let Some(options) = parse_mount_options(&raw) {
            prop_assert!(!options.is_empty());
            for opt in &options {
                prop_assert!(!opt.is_empty());
                prop_assert!(!opt.contains(','));
                prop_assert_eq!(opt.trim(), opt.as_str());
                prop_assert!(raw.contains(opt.as_str()));
            }
        }
    }

    /// Property: the release decision is deterministic.
    #[test]
    fn test_next_action_is_deterministic(state in any_release_state()) {
        prop_assert_eq!(state.next_action(), state.next_action());
    }

    /// Property: safety. A volume in Bound phase is never released, no
    /// matter the rest of the state.
    #[test]
    fn test_bound_volume_is_never_released(state in any_release_state()) {
        if state.phase == VolumePhase::Bound {
            prop_assert_ne!(state.next_action(), ReleaseAction::RemoveProtection);
        }
    }

    /// Property: the marker is only ever attached before deletion begins.
    #[test]
    fn test_marker_never_attached_during_deletion(state in any_release_state()) {
        if state.deletion_requested {
            prop_assert_ne!(state.next_action(), ReleaseAction::AttachProtection);
        }
    }

    /// Property: removal only happens while deletion is requested and the
    /// marker is still present.
    #[test]
    fn test_removal_requires_deletion_and_marker(state in any_release_state()) {
        if state.next_action() == ReleaseAction::RemoveProtection {
            prop_assert!(state.deletion_requested);
            prop_assert!(state.protected);
            prop_assert_ne!(state.phase, VolumePhase::Bound);
        }
    }

    /// Property: liveness for released volumes. Deletion requested while
    /// Released and protected always resolves to removal, regardless of the
    /// ever_bound observation.
    #[test]
    fn test_released_volume_always_resolves(ever_bound in any::<bool>()) {
        let state = ReleaseState {
            phase: VolumePhase::Released,
            protected: true,
            deletion_requested: true,
            ever_bound,
        };
        prop_assert_eq!(state.next_action(), ReleaseAction::RemoveProtection);
    }
}
