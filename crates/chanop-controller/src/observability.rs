//! Process-wide tracing subscriber.
//!
//! Logging starts at `info` (or `RUST_LOG`) before configuration is read, and
//! `logging.level` is swapped in through a reload handle once it is known.
use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

const STARTUP_LEVEL: &str = "info";

static FILTER: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

fn rust_log_is_set() -> bool {
    std::env::var_os(EnvFilter::DEFAULT_ENV).is_some()
}

pub fn init_tracing() {
    let filter = if rust_log_is_set() {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(STARTUP_LEVEL))
    } else {
        EnvFilter::new(STARTUP_LEVEL)
    };
    let (filter, handle) = reload::Layer::new(filter);
    if FILTER.set(handle).is_err() {
        return;
    }
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}

/// Switches to `level` once configuration is loaded. `RUST_LOG` still wins.
pub fn apply_logging_level(level: &str) {
    if rust_log_is_set() {
        return;
    }
    if let Some(handle) = FILTER.get()
        && let Err(e) = handle.modify(|f| *f = EnvFilter::new(level))
    {
        tracing::warn!(error = %e, level, "failed to apply logging.level");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_init_keeps_one_reload_handle() {
        init_tracing();
        init_tracing();
        apply_logging_level("debug");
        assert!(FILTER.get().is_some());
    }
}
