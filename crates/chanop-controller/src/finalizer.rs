//! Finalizer bookkeeping on stored channels.

use chanop_core::{Channel, FINALIZER, ObjectMeta, ResourceKey};
use chanop_store::ChannelStore;
use tracing::debug;

use crate::error::ReconcileError;

/// Adds the remote-channel finalizer if it is missing.
///
/// Returns the stored object, or `None` if it no longer exists.
pub async fn ensure_finalizer(
    store: &dyn ChannelStore,
    key: &ResourceKey,
    attempts: u32,
) -> Result<Option<Channel>, ReconcileError> {
    patch_finalizers(store, key, attempts, |meta| meta.add_finalizer(FINALIZER)).await
}

/// Removes the remote-channel finalizer. The store erases an object being
/// deleted once its last finalizer is gone.
pub async fn remove_finalizer(
    store: &dyn ChannelStore,
    key: &ResourceKey,
    attempts: u32,
) -> Result<(), ReconcileError> {
    patch_finalizers(store, key, attempts, |meta| meta.remove_finalizer(FINALIZER))
        .await
        .map(|_| ())
}

async fn patch_finalizers<F>(
    store: &dyn ChannelStore,
    key: &ResourceKey,
    attempts: u32,
    change: F,
) -> Result<Option<Channel>, ReconcileError>
where
    F: Fn(&mut ObjectMeta) -> bool + Send + Sync,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let Some(current) = store.get(key).await? else {
            return Ok(None);
        };

        let mut meta = current.metadata.clone();
        if !change(&mut meta) {
            return Ok(Some(current));
        }

        match store
            .update_finalizers(key, &meta.finalizers, &current.metadata.resource_version)
            .await
        {
            Ok(updated) => {
                debug!(key = %key, finalizers = ?meta.finalizers, "finalizers updated");
                return Ok(updated);
            }
            Err(e) if e.is_version_conflict() && attempt < attempts.max(1) => {
                debug!(key = %key, attempt, "finalizer write conflicted, re-reading");
            }
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use chanop_core::ChannelSpec;
    use chanop_store::InMemoryChannelStore;

    use super::*;

    #[tokio::test]
    async fn test_ensure_then_remove_erases_deleted_object() {
        let store = InMemoryChannelStore::new();
        let key = store
            .create(Channel::new("default", ChannelSpec::new("bat-channel")))
            .unwrap()
            .key();

        let updated = ensure_finalizer(&store, &key, 3).await.unwrap().unwrap();
        assert!(updated.metadata.has_finalizer(FINALIZER));

        // Second call is a no-op
        let again = ensure_finalizer(&store, &key, 3).await.unwrap().unwrap();
        assert_eq!(
            again.metadata.resource_version,
            updated.metadata.resource_version
        );

        assert!(store.delete(&key).unwrap().is_some());
        remove_finalizer(&store, &key, 3).await.unwrap();
        assert!(store.get(&key).await.unwrap().is_none());
    }
}
