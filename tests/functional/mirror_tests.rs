//! Functional tests for mirrored PersistentVolume generation and drift
//! handling, exercised through the crate's public surface.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use namespaced_pv_operator::controller::request_reconciler::validate_spec;
use namespaced_pv_operator::crd::{
    AccessMode, NamespacedPv, NamespacedPvSpec, Nfs, ReclaimPolicy,
};
use namespaced_pv_operator::owning_request;
use namespaced_pv_operator::resources::persistent_volume::{
    generate, is_managed, mirrored_pv_name, needs_update,
};

fn request(name: &str, namespace: &str, volume_name: &str) -> NamespacedPv {
    let mut npv = NamespacedPv::new(
        name,
        NamespacedPvSpec {
            volume_name: volume_name.to_string(),
            storage_class_name: "nfs".to_string(),
            access_modes: vec![AccessMode::ReadWriteMany],
            capacity: BTreeMap::from([("storage".to_string(), Quantity("10Gi".to_string()))]),
            nfs: Nfs {
                server: "nfs.example.com".to_string(),
                path: "/exports/data".to_string(),
                read_only: false,
            },
            reclaim_policy: ReclaimPolicy::Retain,
            mount_options: String::new(),
            claim_ref_name: format!("{name}-claim"),
        },
    );
    npv.metadata.namespace = Some(namespace.to_string());
    npv
}

#[test]
fn test_same_volume_name_in_different_namespaces_does_not_collide() {
    let a = request("req1", "team-a", "shared");
    let b = request("req1", "team-b", "shared");

    assert_eq!(mirrored_pv_name(&a).unwrap(), "shared-team-a");
    assert_eq!(mirrored_pv_name(&b).unwrap(), "shared-team-b");
}

#[test]
fn test_generated_volume_maps_back_to_its_request() {
    // the watch mapper must recover exactly the owning request
    let npv = request("req1", "team-a", "data");
    let pv = generate(&npv).unwrap();

    let obj_ref = owning_request(&pv).unwrap();
    assert_eq!(obj_ref.name, "req1");
    assert_eq!(obj_ref.namespace.as_deref(), Some("team-a"));
}

#[test]
fn test_generation_is_deterministic() {
    let npv = request("req1", "team-a", "data");
    let a = generate(&npv).unwrap();
    let b = generate(&npv).unwrap();
    assert_eq!(
        serde_json::to_value(&a).unwrap(),
        serde_json::to_value(&b).unwrap()
    );
}

#[test]
fn test_generate_then_diff_converges() {
    // a freshly generated volume must not trigger an update, and must stay
    // stable under repeated diffing
    let npv = request("req1", "team-a", "data");
    let pv = generate(&npv).unwrap();
    for _ in 0..3 {
        assert!(!needs_update(&pv, &npv));
    }
}

#[test]
fn test_foreign_volume_is_not_adopted() {
    // a pre-existing PV that happens to use our naming scheme must not be
    // treated as ours
    let pv: k8s_openapi::api::core::v1::PersistentVolume =
        serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "PersistentVolume",
            "metadata": {"name": "data-team-a"},
            "spec": {"capacity": {"storage": "10Gi"}},
        }))
        .unwrap();

    assert!(!is_managed(&pv));
    assert!(owning_request(&pv).is_none());
}

#[test]
fn test_validation_accepts_complete_request() {
    assert!(validate_spec(&request("req1", "team-a", "data")).is_ok());
}

#[test]
fn test_validation_rejects_incomplete_backing_store() {
    let mut npv = request("req1", "team-a", "data");
    npv.spec.nfs.server = String::new();
    assert!(validate_spec(&npv).is_err());

    let mut npv = request("req1", "team-a", "data");
    npv.spec.volume_name = String::new();
    assert!(validate_spec(&npv).is_err());

    let mut npv = request("req1", "team-a", "data");
    npv.spec.claim_ref_name = String::new();
    assert!(validate_spec(&npv).is_err());
}
