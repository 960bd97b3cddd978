//! The desired-state store contract consumed by the reconciler.

use async_trait::async_trait;
use chanop_core::{Channel, ChannelStatus, ResourceKey};
use tokio::sync::broadcast;

use crate::error::StoreError;

/// Source of desired state for Channel resources.
///
/// Writes are guarded by the object's `resource_version`: callers pass the
/// version they read as `if_match`, and the write fails with
/// `StoreError::VersionConflict` if the object changed in the meantime.
///
/// # Example
///
/// ```ignore
/// use chanop_store::{ChannelStore, StoreError};
///
/// async fn remote_id(store: &dyn ChannelStore, key: &ResourceKey) -> Result<Option<String>, StoreError> {
///     let channel = store.get(key).await?.ok_or_else(|| StoreError::not_found(key))?;
///     Ok(channel.status.remote_id)
/// }
/// ```
#[async_trait]
pub trait ChannelStore: Send + Sync {
    /// Reads the current object, or `None` if it does not exist.
    async fn get(&self, key: &ResourceKey) -> Result<Option<Channel>, StoreError>;

    /// Lists the keys of every stored object.
    async fn list_keys(&self) -> Result<Vec<ResourceKey>, StoreError>;

    /// Replaces the status subresource.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the object does not exist.
    /// Returns `StoreError::VersionConflict` if `if_match` is stale.
    async fn update_status(
        &self,
        key: &ResourceKey,
        status: &ChannelStatus,
        if_match: &str,
    ) -> Result<Channel, StoreError>;

    /// Replaces the finalizer list.
    ///
    /// Returns `None` when clearing the last finalizer of an object that is
    /// being deleted, because the store erases it at that point.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the object does not exist.
    /// Returns `StoreError::VersionConflict` if `if_match` is stale.
    async fn update_finalizers(
        &self,
        key: &ResourceKey,
        finalizers: &[String],
        if_match: &str,
    ) -> Result<Option<Channel>, StoreError>;

    /// Subscribes to change notifications. Spec, finalizer and deletion
    /// writes emit the key of the object they touched; status writes do not.
    fn subscribe(&self) -> broadcast::Receiver<ResourceKey>;

    /// Returns the name of this store backend for logging.
    fn backend_name(&self) -> &'static str;
}
