//! Harness wiring a reconciler to an in-memory store and a fake workspace.
//!
//! Every harness owns its own store and workspace; nothing is shared between
//! tests.

use std::sync::Arc;
use std::time::Duration;

use chanop_core::{Channel, ChannelSpec, ResourceKey};
use chanop_slack::testing::FakeWorkspace;
use chanop_store::{ChannelStore, InMemoryChannelStore};
use tracing::debug;

use crate::config::ControllerSettings;
use crate::error::ReconcileError;
use crate::reconciler::{Action, ChannelReconciler};

pub const NAMESPACE: &str = "default";

pub struct Harness {
    pub store: Arc<InMemoryChannelStore>,
    pub workspace: Arc<FakeWorkspace>,
    pub reconciler: ChannelReconciler,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(test_settings())
    }

    pub fn with_settings(settings: ControllerSettings) -> Self {
        let store = Arc::new(InMemoryChannelStore::new());
        let workspace = Arc::new(FakeWorkspace::new());
        let reconciler = ChannelReconciler::new(store.clone(), workspace.clone(), &settings);
        Self {
            store,
            workspace,
            reconciler,
        }
    }

    /// Stores a new channel and runs one pass for it.
    pub async fn create_channel(&self, spec: ChannelSpec) -> (Channel, Action) {
        let created = self
            .store
            .create(Channel::new(NAMESPACE, spec))
            .expect("create channel");
        let action = self.reconcile(&created.key()).await;
        (self.get(&created.key()).await, action)
    }

    /// Replaces the spec and runs one pass.
    pub async fn update_channel(&self, key: &ResourceKey, spec: ChannelSpec) -> (Channel, Action) {
        self.store.update_spec(key, spec).expect("update spec");
        let action = self.reconcile(key).await;
        (self.get(key).await, action)
    }

    /// Requests deletion and runs one pass. Returns the object if it is
    /// still stored afterwards.
    pub async fn delete_channel(&self, key: &ResourceKey) -> Option<Channel> {
        self.store.delete(key).expect("delete channel");
        self.reconcile(key).await;
        self.store.get(key).await.expect("read channel")
    }

    pub async fn reconcile(&self, key: &ResourceKey) -> Action {
        self.reconciler.reconcile(key).await.expect("reconcile")
    }

    pub async fn get(&self, key: &ResourceKey) -> Channel {
        self.store
            .get(key)
            .await
            .expect("read channel")
            .expect("channel exists")
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// Settings with short delays for tests.
pub fn test_settings() -> ControllerSettings {
    ControllerSettings {
        error_requeue_delay: Duration::from_millis(50),
        resync_interval: Duration::from_secs(3600),
        status_conflict_retries: 5,
        max_concurrent_reconciles: 4,
    }
}

/// Strips finalizers from every stored channel and erases it, without
/// touching the remote side. Returns how many channels were erased.
///
/// A finalizer write that loses a race re-reads the object and tries again,
/// up to `attempts` times per object.
pub async fn remove_all_channels(
    store: &InMemoryChannelStore,
    attempts: u32,
) -> Result<usize, ReconcileError> {
    let mut removed = 0;
    for key in store.list_keys().await? {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let Some(current) = store.get(&key).await? else {
                break;
            };
            if current.metadata.finalizers.is_empty() {
                break;
            }
            match store
                .update_finalizers(&key, &[], &current.metadata.resource_version)
                .await
            {
                Ok(_) => break,
                Err(e) if e.is_version_conflict() && attempt < attempts.max(1) => {
                    debug!(key = %key, attempt, "channel modified concurrently, re-reading");
                }
                Err(e) if e.is_not_found() => break,
                Err(e) => return Err(e.into()),
            }
        }

        // Gone already if the cleared object was pending deletion
        match store.delete(&key) {
            Ok(_) => removed += 1,
            Err(e) if e.is_not_found() => removed += 1,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(removed)
}
