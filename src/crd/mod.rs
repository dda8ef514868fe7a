//! Custom Resource Definitions for namespaced-pv-operator.
//!
//! - `NamespacedPv`: namespaced request for a cluster-scoped PersistentVolume

mod namespaced_pv;

pub use namespaced_pv::*;
