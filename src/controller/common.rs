//! Shared controller helpers.
//!
//! Finalizer bookkeeping used by both reconcilers. Every mutation here is a
//! fresh-read read-modify-write: the object is fetched, the finalizer list
//! edited, and the patch sent with the observed resourceVersion so a
//! concurrent writer surfaces as a 409 instead of being overwritten. A
//! bounded number of conflicts are retried in place; anything beyond that
//! returns to the scheduler for a new pass.

use kube::{Api, Resource, ResourceExt, api::Patch, api::PatchParams};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::controller::error::Error;

/// Conflicts retried within a single helper call before handing back to the
/// reconcile loop.
const CONFLICT_RETRIES: usize = 3;

/// Add a finalizer to a resource if it is not already present.
pub async fn add_finalizer<T>(api: &Api<T>, name: &str, finalizer: &str) -> Result<(), Error>
where
    T: Resource + Clone + DeserializeOwned + serde::Serialize + std::fmt::Debug,
    <T as Resource>::DynamicType: Default,
{
    for attempt in 0..=CONFLICT_RETRIES {
        let resource = match api.get_opt(name).await? {
            Some(r) => r,
            // nothing to protect
            None => return Ok(()),
        };

        if resource.finalizers().iter().any(|f| f == finalizer) {
            return Ok(());
        }

        let mut finalizers = resource.finalizers().to_vec();
        finalizers.push(finalizer.to_string());

        match patch_finalizers(api, name, &resource, finalizers).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_conflict() && attempt < CONFLICT_RETRIES => {
                debug!(name = %name, finalizer = %finalizer, "Conflict adding finalizer, re-reading");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Remove a specific finalizer from a resource.
///
/// A missing resource or an already-absent finalizer is treated as success:
/// the desired state ("finalizer not present") already holds.
pub async fn remove_finalizer<T>(api: &Api<T>, name: &str, finalizer: &str) -> Result<(), Error>
where
    T: Resource + Clone + DeserializeOwned + serde::Serialize + std::fmt::Debug,
    <T as Resource>::DynamicType: Default,
{
    for attempt in 0..=CONFLICT_RETRIES {
        let resource = match api.get_opt(name).await? {
            Some(r) => r,
            // already finalized
            None => return Ok(()),
        };

        let mut finalizers = resource.finalizers().to_vec();
        let Some(pos) = finalizers.iter().position(|f| f == finalizer) else {
            return Ok(());
        };
        finalizers.remove(pos);

        match patch_finalizers(api, name, &resource, finalizers).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_conflict() && attempt < CONFLICT_RETRIES => {
                debug!(name = %name, finalizer = %finalizer, "Conflict removing finalizer, re-reading");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Remove a finalizer using an object the caller has already observed,
/// without retrying.
///
/// The patch is guarded by the observed resourceVersion. A conflict is not
/// retried here: the caller's decision to remove was made against that exact
/// observation, and any concurrent write may have invalidated the facts
/// behind it. The conflict propagates so the caller re-observes and decides
/// again.
pub async fn remove_finalizer_observed<T>(
    api: &Api<T>,
    observed: &T,
    finalizer: &str,
) -> Result<(), Error>
where
    T: Resource + Clone + DeserializeOwned + serde::Serialize + std::fmt::Debug,
    <T as Resource>::DynamicType: Default,
{
    let mut finalizers = observed.finalizers().to_vec();
    let Some(pos) = finalizers.iter().position(|f| f == finalizer) else {
        return Ok(());
    };
    finalizers.remove(pos);

    match patch_finalizers(api, &observed.name_any(), observed, finalizers).await {
        Ok(()) => Ok(()),
        // already finalized
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e),
    }
}

/// Patch the finalizer list, guarded by the resourceVersion of the read that
/// produced it.
async fn patch_finalizers<T>(
    api: &Api<T>,
    name: &str,
    observed: &T,
    finalizers: Vec<String>,
) -> Result<(), Error>
where
    T: Resource + Clone + DeserializeOwned + serde::Serialize + std::fmt::Debug,
    <T as Resource>::DynamicType: Default,
{
    let patch = serde_json::json!({
        "metadata": {
            "resourceVersion": observed.resource_version(),
            "finalizers": finalizers,
        }
    });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}
