//! # chanop-slack
//!
//! Client side of the remote chat workspace.
//!
//! - [`ChatApi`]: the capability interface the reconciler talks to
//! - [`SlackClient`]: HTTP implementation against the Slack Web API
//! - [`RetryingTransport`]: retry, backoff and `Retry-After` handling shared
//!   by every outbound call
//!
//! With the `testing` feature the crate also ships an in-memory workspace and
//! an HTTP fixture server (see [`testing`]).
//!
//! ## Example
//!
//! ```ignore
//! use chanop_slack::{ChatApi, RetryPolicy, RetryingTransport, SlackClient};
//!
//! let transport = RetryingTransport::from_policy(RetryPolicy::default())?;
//! let client = SlackClient::with_retrying_transport(DEFAULT_API_URL, token, transport);
//! let channel = client.create_channel("bat-channel", false).await?;
//! ```

mod api;
mod client;
mod error;
mod transport;
mod types;

#[cfg(feature = "testing")]
pub mod testing;

pub use api::{ChatApi, DynChatApi};
pub use client::{DEFAULT_API_URL, SlackClient};
pub use error::{ApiError, TransportError};
pub use transport::{RetryPolicy, RetryingTransport, Transport};
pub use types::RemoteChannel;
