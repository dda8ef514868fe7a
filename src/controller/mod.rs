//! Controllers for namespaced-pv-operator.
//!
//! Two cooperating reconcilers share one Context and error taxonomy:
//! - NamespacedPv controller (request_reconciler): mirrors requests into
//!   cluster-scoped PersistentVolumes
//! - PersistentVolume controller (release_reconciler): owns the protective
//!   finalizer and releases volumes once they are safely unbound

// Shared modules
pub mod common;
pub mod context;
pub mod error;

// NamespacedPv controller
pub mod request_reconciler;

// PersistentVolume controller
pub mod release_reconciler;
pub mod release_state_machine;
