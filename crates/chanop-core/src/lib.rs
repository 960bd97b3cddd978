//! # chanop-core
//!
//! Resource model shared by the chanop crates: the `Channel` object with its
//! desired [`ChannelSpec`], the engine-owned [`ChannelStatus`] and the typed
//! status [`Condition`]s written after every reconcile pass.

pub mod channel;
pub mod clock;
pub mod condition;
pub mod error;
pub mod meta;

pub use clock::now_truncated;
pub use channel::{Channel, ChannelSpec, ChannelStatus, FINALIZER};
pub use condition::{
    Condition, ConditionStatus, FAILED_REASON, RECONCILE_ERROR, RECONCILE_SUCCESS,
    SUCCEEDED_REASON,
};
pub use error::{CoreError, Result};
pub use meta::{ObjectMeta, ResourceKey};
