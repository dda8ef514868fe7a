//! NamespacedPv Custom Resource Definition.
//!
//! A NamespacedPv lets users request a cluster-scoped PersistentVolume from
//! inside their own namespace, without the elevated privileges that creating
//! a PersistentVolume directly would require. The controller mirrors the
//! request into a real PersistentVolume named `<volumeName>-<namespace>`.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// NamespacedPv is a namespaced request for a cluster-scoped PersistentVolume.
///
/// Example:
/// ```yaml
/// apiVersion: namespacedpv.homi.run/v1
/// kind: NamespacedPv
/// metadata:
///   name: shared-data
///   namespace: team-a
/// spec:
///   volumeName: shared-data
///   storageClassName: nfs
///   accessModes: [ReadWriteMany]
///   capacity:
///     storage: 1Gi
///   nfs:
///     server: 10.0.0.5
///     path: /exports/team-a
///   reclaimPolicy: Retain
///   mountOptions: "nolock,vers=4.1"
///   claimRefName: shared-data-claim
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "namespacedpv.homi.run",
    version = "v1",
    kind = "NamespacedPv",
    plural = "namespacedpvs",
    shortname = "npv",
    status = "NamespacedPvStatus",
    namespaced,
    printcolumn = r#"{"name":"Volume", "type":"string", "jsonPath":".status.volumeName"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Claim", "type":"string", "jsonPath":".spec.claimRefName"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NamespacedPvSpec {
    /// Base name for the mirrored PersistentVolume. The actual cluster-scoped
    /// object is named `<volumeName>-<namespace>` so requests in different
    /// namespaces cannot collide.
    pub volume_name: String,

    /// Storage class recorded on the mirrored volume.
    pub storage_class_name: String,

    /// Access modes for the mirrored volume.
    pub access_modes: Vec<AccessMode>,

    /// Capacity of the mirrored volume. Must contain a `storage` entry.
    pub capacity: BTreeMap<String, Quantity>,

    /// NFS share backing the mirrored volume.
    pub nfs: Nfs,

    /// Reclaim policy for the mirrored volume (default: Retain).
    #[serde(default)]
    pub reclaim_policy: ReclaimPolicy,

    /// Comma-separated mount options (e.g. "nolock,vers=4.1").
    #[serde(default)]
    pub mount_options: String,

    /// Name of the PersistentVolumeClaim expected to bind the mirrored
    /// volume. The volume is pre-bound to this claim in the request's
    /// namespace.
    pub claim_ref_name: String,
}

/// NFS backing-store descriptor.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Nfs {
    /// NFS server address.
    pub server: String,

    /// Exported path on the server.
    pub path: String,

    /// Mount the share read-only (default: false).
    #[serde(default)]
    pub read_only: bool,
}

/// Access mode for the mirrored PersistentVolume.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum AccessMode {
    ReadWriteOnce,
    ReadOnlyMany,
    ReadWriteMany,
    ReadWriteOncePod,
}

impl AccessMode {
    /// Wire representation used in the PersistentVolume spec.
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::ReadWriteOnce => "ReadWriteOnce",
            AccessMode::ReadOnlyMany => "ReadOnlyMany",
            AccessMode::ReadWriteMany => "ReadWriteMany",
            AccessMode::ReadWriteOncePod => "ReadWriteOncePod",
        }
    }
}

impl std::fmt::Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reclaim policy for the mirrored PersistentVolume.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ReclaimPolicy {
    /// Keep the underlying storage after release (default).
    #[default]
    Retain,
    /// Delete the underlying storage after release.
    Delete,
    /// Deprecated basic scrub, kept for parity with the core enum.
    Recycle,
}

impl ReclaimPolicy {
    /// Wire representation used in the PersistentVolume spec.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReclaimPolicy::Retain => "Retain",
            ReclaimPolicy::Delete => "Delete",
            ReclaimPolicy::Recycle => "Recycle",
        }
    }
}

impl std::fmt::Display for ReclaimPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle phase of a PersistentVolume, as reported in its status.
///
/// The binding subsystem drives these transitions; this controller only ever
/// reads them.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum VolumePhase {
    /// Volume object exists but is not yet available for binding.
    #[default]
    Pending,
    /// Volume is available and not yet bound to a claim.
    Available,
    /// Volume is bound to a claim and potentially in active use.
    Bound,
    /// The bound claim has been deleted; the volume awaits reclamation.
    Released,
    /// Automatic reclamation failed.
    Failed,
}

impl VolumePhase {
    /// Parse the phase string from a PersistentVolume status.
    ///
    /// Unknown strings map to Pending, the conservative reading for the
    /// release protocol (never treated as safe to finalize).
    pub fn parse(s: &str) -> Self {
        match s {
            "Available" => VolumePhase::Available,
            "Bound" => VolumePhase::Bound,
            "Released" => VolumePhase::Released,
            "Failed" => VolumePhase::Failed,
            _ => VolumePhase::Pending,
        }
    }
}

impl std::fmt::Display for VolumePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VolumePhase::Pending => write!(f, "Pending"),
            VolumePhase::Available => write!(f, "Available"),
            VolumePhase::Bound => write!(f, "Bound"),
            VolumePhase::Released => write!(f, "Released"),
            VolumePhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Status of a NamespacedPv.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NamespacedPvStatus {
    /// Name of the mirrored PersistentVolume, once created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_name: Option<String>,

    /// Phase of the mirrored PersistentVolume, mirrored for kubectl output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// The generation most recently observed by the controller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Conditions describing the current state.
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Condition describes the state of a NamespacedPv at a certain point.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition.
    pub r#type: String,
    /// Status of the condition ("True", "False", "Unknown").
    pub status: String,
    /// Machine-readable reason for the condition's last transition.
    pub reason: String,
    /// Human-readable message indicating details about last transition.
    pub message: String,
    /// Last time the condition transitioned from one status to another.
    pub last_transition_time: String,
    /// The generation of the resource this condition was observed for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a new condition.
    pub fn new(
        condition_type: &str,
        status: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self {
            r#type: condition_type.to_string(),
            status: if status {
                "True".to_string()
            } else {
                "False".to_string()
            },
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: jiff::Timestamp::now().to_string(),
            observed_generation: generation,
        }
    }

    /// Create a "Ready" condition.
    pub fn ready(ready: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new("Ready", ready, reason, message, generation)
    }

    /// Create a "Progressing" condition.
    pub fn progressing(
        progressing: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self::new("Progressing", progressing, reason, message, generation)
    }

    /// Create a "Degraded" condition.
    pub fn degraded(degraded: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new("Degraded", degraded, reason, message, generation)
    }
}
