//! # chanop-controller
//!
//! Keeps chat channels in line with declarative `Channel` resources.
//!
//! - [`ChannelReconciler`]: one pass for one key (create or adopt, diff and
//!   apply, finalize on deletion)
//! - [`StatusReporter`]: writes outcome conditions with conflict retries
//! - [`Controller`]: work queue feeding keys to the reconciler
//! - [`config`]: layered configuration (file, `CHANOP__*` env, legacy env)
//! - [`manifest`]: desired channels loaded from a file into the in-memory store

pub mod config;
pub mod controller;
pub mod error;
pub mod finalizer;
pub mod manifest;
pub mod observability;
pub mod reconciler;
pub mod reporter;

#[cfg(feature = "testing")]
pub mod testing;

pub use config::{AppConfig, ControllerSettings};
pub use controller::Controller;
pub use error::{ConfigError, ReconcileError};
pub use reconciler::{Action, ChannelReconciler};
pub use reporter::StatusReporter;
