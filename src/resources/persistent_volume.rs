//! Mirrored PersistentVolume generation.
//!
//! Builds the cluster-scoped PersistentVolume that mirrors a NamespacedPv
//! request, with the ownership labels, provisioner annotation, and protective
//! finalizer the release protocol depends on. The association between the two
//! objects is label-based because owner references cannot cross the
//! namespaced/cluster-scoped boundary.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    NFSVolumeSource, ObjectReference, PersistentVolume, PersistentVolumeSpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use crate::controller::error::Error;
use crate::crd::NamespacedPv;

/// Label on the mirrored volume naming the owning NamespacedPv.
pub const LABEL_OWNER: &str = "owner";

/// Label on the mirrored volume naming the owning NamespacedPv's namespace.
pub const LABEL_OWNER_NAMESPACE: &str = "owner-namespace";

/// Annotation identifying this controller as the provisioner.
pub const PROVISIONED_BY_ANNOTATION: &str = "pv.kubernetes.io/provisioned-by";

/// Value of the provisioner annotation.
pub const PROVISIONER_NAME: &str = "namespaced-pv-controller";

/// Protective finalizer placed on every mirrored volume at creation.
pub const PV_FINALIZER: &str = "namespacedpv.homi.run/pvFinalizer";

/// Deterministic name of the mirrored volume: `<volumeName>-<namespace>`.
///
/// Reconstructible from the request alone, so reconciliation needs no extra
/// state and the same request always maps to the same volume.
pub fn mirrored_pv_name(request: &NamespacedPv) -> Result<String, Error> {
    let namespace = request
        .namespace()
        .ok_or_else(|| Error::MissingField("metadata.namespace".to_string()))?;
    Ok(format!("{}-{}", request.spec.volume_name, namespace))
}

/// Ownership labels pointing back at the request.
pub fn ownership_labels(request: &NamespacedPv) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_OWNER.to_string(), request.name_any());
    labels.insert(
        LABEL_OWNER_NAMESPACE.to_string(),
        request.namespace().unwrap_or_default(),
    );
    labels
}

/// Split the comma-separated mountOptions string into the PV list form.
///
/// Returns None for an empty string so the field is omitted entirely.
pub fn parse_mount_options(mount_options: &str) -> Option<Vec<String>> {
    let options: Vec<String> = mount_options
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(str::to_string)
        .collect();
    if options.is_empty() {
        None
    } else {
        Some(options)
    }
}

/// Pre-bind claim reference naming the claim expected to bind this volume.
///
/// The uid is left unset; the binding subsystem fills it when an actual claim
/// binds.
fn claim_reference(request: &NamespacedPv) -> ObjectReference {
    ObjectReference {
        api_version: Some("v1".to_string()),
        kind: Some("PersistentVolumeClaim".to_string()),
        name: Some(request.spec.claim_ref_name.clone()),
        namespace: request.namespace(),
        ..Default::default()
    }
}

/// Spec of the mirrored volume derived from the request.
fn desired_spec(request: &NamespacedPv) -> PersistentVolumeSpec {
    PersistentVolumeSpec {
        access_modes: Some(
            request
                .spec
                .access_modes
                .iter()
                .map(|m| m.as_str().to_string())
                .collect(),
        ),
        capacity: Some(request.spec.capacity.clone()),
        nfs: Some(NFSVolumeSource {
            server: request.spec.nfs.server.clone(),
            path: request.spec.nfs.path.clone(),
            read_only: Some(request.spec.nfs.read_only),
        }),
        persistent_volume_reclaim_policy: Some(request.spec.reclaim_policy.as_str().to_string()),
        storage_class_name: Some(request.spec.storage_class_name.clone()),
        mount_options: parse_mount_options(&request.spec.mount_options),
        volume_mode: Some("Filesystem".to_string()),
        claim_ref: Some(claim_reference(request)),
        ..Default::default()
    }
}

/// Build the complete mirrored volume for a request.
///
/// The protective finalizer is attached at creation so the release protocol
/// holds from the very first instant the object exists.
pub fn generate(request: &NamespacedPv) -> Result<PersistentVolume, Error> {
    let name = mirrored_pv_name(request)?;

    Ok(PersistentVolume {
        metadata: ObjectMeta {
            name: Some(name),
            labels: Some(ownership_labels(request)),
            annotations: Some(BTreeMap::from([(
                PROVISIONED_BY_ANNOTATION.to_string(),
                PROVISIONER_NAME.to_string(),
            )])),
            finalizers: Some(vec![PV_FINALIZER.to_string()]),
            ..Default::default()
        },
        spec: Some(desired_spec(request)),
        ..Default::default()
    })
}

/// Whether a PersistentVolume is managed by this controller.
///
/// Any object lacking the ownership labels or the provisioner annotation is
/// left untouched.
pub fn is_managed(pv: &PersistentVolume) -> bool {
    let has_labels = pv
        .metadata
        .labels
        .as_ref()
        .is_some_and(|l| l.contains_key(LABEL_OWNER) && l.contains_key(LABEL_OWNER_NAMESPACE));
    let has_annotation = pv
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(PROVISIONED_BY_ANNOTATION))
        .is_some_and(|v| v == PROVISIONER_NAME);
    has_labels && has_annotation
}

/// Whether the volume's claimRef carries a uid, meaning an actual claim has
/// bound it at some point (a pre-bind reference has name but no uid).
pub fn claim_ref_bound(pv: &PersistentVolume) -> bool {
    pv.spec
        .as_ref()
        .and_then(|s| s.claim_ref.as_ref())
        .and_then(|r| r.uid.as_ref())
        .is_some()
}

/// Whether the existing volume's spec has drifted from the request.
///
/// Compares only the fields this controller derives from the request, so a
/// second pass over an unchanged request is a no-op.
pub fn needs_update(existing: &PersistentVolume, request: &NamespacedPv) -> bool {
    let desired = desired_spec(request);
    let Some(current) = existing.spec.as_ref() else {
        return true;
    };

    if current.access_modes != desired.access_modes
        || current.capacity != desired.capacity
        || current.nfs != desired.nfs
        || current.persistent_volume_reclaim_policy != desired.persistent_volume_reclaim_policy
        || current.storage_class_name != desired.storage_class_name
        || current.mount_options != desired.mount_options
    {
        return true;
    }

    if existing.metadata.labels.as_ref() != Some(&ownership_labels(request)) {
        return true;
    }

    // Only re-point the claimRef while nothing has bound the volume;
    // overwriting a live binding would detach the claim.
    if !claim_ref_bound(existing) {
        let current_claim = current.claim_ref.as_ref().and_then(|r| r.name.as_deref());
        if current_claim != Some(request.spec.claim_ref_name.as_str()) {
            return true;
        }
    }

    false
}

/// Merge patch bringing an existing mirrored volume back in line with the
/// request. Never includes claimRef once a claim has bound the volume.
pub fn spec_patch(
    existing: &PersistentVolume,
    request: &NamespacedPv,
) -> Result<serde_json::Value, Error> {
    let desired = desired_spec(request);
    let mut spec = serde_json::to_value(&desired)?;
    if claim_ref_bound(existing) {
        if let Some(map) = spec.as_object_mut() {
            map.remove("claimRef");
        }
    }
    Ok(serde_json::json!({
        "metadata": {
            "labels": ownership_labels(request),
        },
        "spec": spec,
    }))
}
