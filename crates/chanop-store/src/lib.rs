//! # chanop-store
//!
//! Desired-state store abstraction for Channel resources.
//!
//! The reconciler only needs to read an object by key, write its status and
//! manage its finalizers, all guarded by the object's resource version. This
//! crate defines that contract as [`ChannelStore`] and ships an in-memory
//! backend, [`InMemoryChannelStore`], that also plays the role of the external
//! owner of desired state (create, edit, delete) in tests and local runs.
//!
//! ## Example
//!
//! ```ignore
//! use chanop_core::{Channel, ChannelSpec};
//! use chanop_store::{ChannelStore, InMemoryChannelStore};
//!
//! let store = InMemoryChannelStore::new();
//! let channel = store.create(Channel::new("default", ChannelSpec::new("bat-channel")))?;
//! let fetched = store.get(&channel.key()).await?;
//! ```

mod error;
pub mod memory;
mod traits;

pub use error::{ErrorCategory, StoreError};
pub use memory::InMemoryChannelStore;
pub use traits::ChannelStore;

/// Type alias for a store result.
pub type StoreResult<T> = Result<T, StoreError>;

/// Type alias for a shared store trait object.
pub type DynChannelStore = std::sync::Arc<dyn ChannelStore>;
