//! Desired channels read from a manifest file.
//!
//! ```toml
//! namespace = "default"
//!
//! [[channels]]
//! name = "bat-channel"
//! topic = "bats"
//! users = ["spengler@ghostbusters.example.com"]
//! ```

use std::path::Path;

use chanop_core::{Channel, ChannelSpec};
use chanop_store::{InMemoryChannelStore, StoreError};
use config::{Config, File};
use serde::Deserialize;
use tracing::info;

use crate::error::ConfigError;

#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub channels: Vec<ChannelSpec>,
}

fn default_namespace() -> String {
    "default".into()
}

pub fn load_manifest(path: impl AsRef<Path>) -> Result<Manifest, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ConfigError::invalid(format!(
            "manifest {} does not exist",
            path.display()
        )));
    }
    let manifest: Manifest = Config::builder()
        .add_source(File::from(path))
        .build()?
        .try_deserialize()?;
    for spec in &manifest.channels {
        spec.validate()
            .map_err(|e| ConfigError::invalid(format!("manifest {}: {e}", path.display())))?;
    }
    Ok(manifest)
}

/// Creates every listed channel, or updates its spec if it is already stored.
pub fn apply_manifest(store: &InMemoryChannelStore, manifest: Manifest) -> Result<usize, StoreError> {
    let mut applied = 0;
    for spec in manifest.channels {
        let channel = Channel::new(manifest.namespace.clone(), spec);
        let key = channel.key();
        match store.create(channel.clone()) {
            Ok(_) => {}
            Err(e) if e.is_already_exists() => {
                store.update_spec(&key, channel.spec)?;
            }
            Err(e) => return Err(e),
        }
        applied += 1;
    }
    info!(applied, namespace = %manifest.namespace, "manifest applied");
    Ok(applied)
}
