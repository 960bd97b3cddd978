//! Test doubles for the chat API.
//!
//! [`FakeWorkspace`] implements [`ChatApi`](crate::ChatApi) in memory and
//! records every call. [`FixtureServer`] serves a fake over HTTP so the real
//! [`SlackClient`](crate::SlackClient) and its transport can be exercised
//! end to end. Each test builds its own instances.

mod fake;
mod server;

pub use fake::{ApiCall, BOT_USER_ID, FakeWorkspace, Operation};
pub use server::FixtureServer;
