//! Generation of the cluster-scoped objects mirrored from NamespacedPv
//! requests.

pub mod persistent_volume;
