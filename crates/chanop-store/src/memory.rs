//! In-memory `ChannelStore` backend.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chanop_core::{Channel, ChannelSpec, ChannelStatus, ResourceKey, now_truncated};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::StoreError;
use crate::traits::ChannelStore;

const EVENT_CAPACITY: usize = 1024;

/// In-memory store backed by a sharded `DashMap`.
///
/// Besides the `ChannelStore` contract used by the reconciler, it exposes the
/// operations an external owner performs on desired state: create, spec
/// edits and deletion requests. Shard locks are held only for the duration
/// of a single map operation.
#[derive(Debug)]
pub struct InMemoryChannelStore {
    data: DashMap<ResourceKey, Channel>,
    version_counter: AtomicU64,
    events: broadcast::Sender<ResourceKey>,
}

impl InMemoryChannelStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            data: DashMap::new(),
            version_counter: AtomicU64::new(1),
            events,
        }
    }

    fn next_version(&self) -> String {
        self.version_counter
            .fetch_add(1, Ordering::SeqCst)
            .to_string()
    }

    fn notify(&self, key: &ResourceKey) {
        // No receivers is fine
        let _ = self.events.send(key.clone());
    }

    /// Creates a new object. Its generation starts at 1.
    pub fn create(&self, mut channel: Channel) -> Result<Channel, StoreError> {
        channel
            .spec
            .validate()
            .map_err(|e| StoreError::invalid(e.to_string()))?;
        let key = channel.key();

        let created = match self.data.entry(key.clone()) {
            Entry::Occupied(_) => return Err(StoreError::already_exists(&key)),
            Entry::Vacant(slot) => {
                channel.metadata.generation = 1;
                channel.metadata.resource_version = self.next_version();
                channel.metadata.deletion_timestamp = None;
                slot.insert(channel.clone());
                channel
            }
        };

        debug!(key = %key, "channel created");
        self.notify(&key);
        Ok(created)
    }

    /// Replaces the spec, bumping the generation if it changed.
    pub fn update_spec(&self, key: &ResourceKey, spec: ChannelSpec) -> Result<Channel, StoreError> {
        spec.validate()
            .map_err(|e| StoreError::invalid(e.to_string()))?;

        let updated = {
            let mut entry = self
                .data
                .get_mut(key)
                .ok_or_else(|| StoreError::not_found(key))?;
            if entry.spec == spec {
                return Ok(entry.clone());
            }
            entry.spec = spec;
            entry.metadata.generation += 1;
            entry.metadata.resource_version = self.next_version();
            entry.clone()
        };

        debug!(key = %key, generation = updated.metadata.generation, "channel spec updated");
        self.notify(key);
        Ok(updated)
    }

    /// Requests deletion.
    ///
    /// An object without finalizers is erased immediately and `None` is
    /// returned. Otherwise the deletion timestamp is set (once) and the
    /// object stays until its finalizers are cleared.
    pub fn delete(&self, key: &ResourceKey) -> Result<Option<Channel>, StoreError> {
        let erase = {
            let mut entry = self
                .data
                .get_mut(key)
                .ok_or_else(|| StoreError::not_found(key))?;
            if entry.metadata.finalizers.is_empty() {
                true
            } else {
                if entry.metadata.deletion_timestamp.is_none() {
                    entry.metadata.deletion_timestamp = Some(now_truncated());
                    entry.metadata.resource_version = self.next_version();
                }
                false
            }
        };

        let result = if erase {
            self.data.remove(key);
            debug!(key = %key, "channel erased");
            None
        } else {
            debug!(key = %key, "channel marked for deletion");
            self.data.get(key).map(|c| c.value().clone())
        };
        self.notify(key);
        Ok(result)
    }

    /// Bumps the resource version without changing content, as a concurrent
    /// writer would.
    pub fn touch(&self, key: &ResourceKey) -> Result<Channel, StoreError> {
        let mut entry = self
            .data
            .get_mut(key)
            .ok_or_else(|| StoreError::not_found(key))?;
        entry.metadata.resource_version = self.next_version();
        Ok(entry.clone())
    }

    /// Drops every object regardless of finalizers.
    pub fn clear(&self) {
        self.data.clear();
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn check_version(channel: &Channel, key: &ResourceKey, if_match: &str) -> Result<(), StoreError> {
        if channel.metadata.resource_version != if_match {
            return Err(StoreError::version_conflict(
                key,
                if_match,
                channel.metadata.resource_version.clone(),
            ));
        }
        Ok(())
    }
}

impl Default for InMemoryChannelStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelStore for InMemoryChannelStore {
    async fn get(&self, key: &ResourceKey) -> Result<Option<Channel>, StoreError> {
        Ok(self.data.get(key).map(|c| c.value().clone()))
    }

    async fn list_keys(&self) -> Result<Vec<ResourceKey>, StoreError> {
        let mut keys: Vec<ResourceKey> = self.data.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        Ok(keys)
    }

    async fn update_status(
        &self,
        key: &ResourceKey,
        status: &ChannelStatus,
        if_match: &str,
    ) -> Result<Channel, StoreError> {
        let updated = {
            let mut entry = self
                .data
                .get_mut(key)
                .ok_or_else(|| StoreError::not_found(key))?;
            Self::check_version(&entry, key, if_match)?;
            entry.status = status.clone();
            entry.metadata.resource_version = self.next_version();
            entry.clone()
        };
        // Status-only writes are not broadcast.
        Ok(updated)
    }

    async fn update_finalizers(
        &self,
        key: &ResourceKey,
        finalizers: &[String],
        if_match: &str,
    ) -> Result<Option<Channel>, StoreError> {
        let erase = {
            let mut entry = self
                .data
                .get_mut(key)
                .ok_or_else(|| StoreError::not_found(key))?;
            Self::check_version(&entry, key, if_match)?;
            entry.metadata.finalizers = finalizers.to_vec();
            entry.metadata.resource_version = self.next_version();
            entry.metadata.is_being_deleted() && finalizers.is_empty()
        };

        let result = if erase {
            self.data.remove(key);
            debug!(key = %key, "finalizers cleared, channel erased");
            None
        } else {
            self.data.get(key).map(|c| c.value().clone())
        };
        self.notify(key);
        Ok(result)
    }

    fn subscribe(&self) -> broadcast::Receiver<ResourceKey> {
        self.events.subscribe()
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bat_channel() -> Channel {
        Channel::new("default", ChannelSpec::new("bat-channel"))
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemoryChannelStore::new();
        let created = store.create(bat_channel()).unwrap();
        assert_eq!(created.metadata.generation, 1);
        assert!(!created.metadata.resource_version.is_empty());

        let fetched = store.get(&created.key()).await.unwrap().unwrap();
        assert_eq!(fetched, created);
        assert!(store.create(bat_channel()).unwrap_err().is_already_exists());
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_spec() {
        let store = InMemoryChannelStore::new();
        let err = store
            .create(Channel::new("default", ChannelSpec::new("Bad Name")))
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid { .. }));
    }

    #[tokio::test]
    async fn test_update_spec_bumps_generation_only_on_change() {
        let store = InMemoryChannelStore::new();
        let created = store.create(bat_channel()).unwrap();
        let key = created.key();

        let same = store.update_spec(&key, created.spec.clone()).unwrap();
        assert_eq!(same.metadata.generation, 1);

        let changed = store
            .update_spec(&key, created.spec.clone().with_topic("new topic"))
            .unwrap();
        assert_eq!(changed.metadata.generation, 2);
        assert_ne!(changed.metadata.resource_version, created.metadata.resource_version);
    }

    #[tokio::test]
    async fn test_update_status_detects_conflict() {
        let store = InMemoryChannelStore::new();
        let created = store.create(bat_channel()).unwrap();
        let key = created.key();
        let status = ChannelStatus {
            remote_id: Some("C1".into()),
            ..ChannelStatus::default()
        };

        let updated = store
            .update_status(&key, &status, &created.metadata.resource_version)
            .await
            .unwrap();
        assert_eq!(updated.status.remote_id.as_deref(), Some("C1"));

        let err = store
            .update_status(&key, &status, &created.metadata.resource_version)
            .await
            .unwrap_err();
        assert!(err.is_version_conflict());
    }

    #[tokio::test]
    async fn test_delete_without_finalizers_erases() {
        let store = InMemoryChannelStore::new();
        let created = store.create(bat_channel()).unwrap();
        assert!(store.delete(&created.key()).unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_delete_waits_for_finalizers() {
        let store = InMemoryChannelStore::new();
        let created = store.create(bat_channel()).unwrap();
        let key = created.key();

        let with_finalizer = store
            .update_finalizers(&key, &["x/y".to_string()], &created.metadata.resource_version)
            .await
            .unwrap()
            .unwrap();

        let marked = store.delete(&key).unwrap().unwrap();
        assert!(marked.metadata.is_being_deleted());
        assert_eq!(store.len(), 1);

        // Stale version is refused
        let err = store
            .update_finalizers(&key, &[], &with_finalizer.metadata.resource_version)
            .await
            .unwrap_err();
        assert!(err.is_version_conflict());

        let erased = store
            .update_finalizers(&key, &[], &marked.metadata.resource_version)
            .await
            .unwrap();
        assert!(erased.is_none());
        assert!(store.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_writes_emit_events() {
        let store = InMemoryChannelStore::new();
        let mut events = store.subscribe();
        let created = store.create(bat_channel()).unwrap();
        store
            .update_spec(&created.key(), created.spec.clone().with_topic("t"))
            .unwrap();

        assert_eq!(events.recv().await.unwrap(), created.key());
        assert_eq!(events.recv().await.unwrap(), created.key());
    }
}
