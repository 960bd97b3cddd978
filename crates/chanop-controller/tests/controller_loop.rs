//! The controller runner driving reconciles from store events.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chanop_controller::testing::{NAMESPACE, test_settings};
use chanop_controller::{ChannelReconciler, Controller, ControllerSettings};
use chanop_core::{Channel, ChannelSpec, RECONCILE_ERROR, RECONCILE_SUCCESS, ResourceKey};
use chanop_slack::testing::{FakeWorkspace, Operation};
use chanop_slack::{ApiError, ChatApi, RemoteChannel};
use chanop_store::{ChannelStore, InMemoryChannelStore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Running {
    store: Arc<InMemoryChannelStore>,
    workspace: Arc<FakeWorkspace>,
    cancel: CancellationToken,
    handle: JoinHandle<Result<(), chanop_controller::ReconcileError>>,
}

fn start(settings: ControllerSettings) -> Running {
    let store = Arc::new(InMemoryChannelStore::new());
    let workspace = Arc::new(FakeWorkspace::new());
    let reconciler = Arc::new(ChannelReconciler::new(
        store.clone(),
        workspace.clone(),
        &settings,
    ));
    let controller = Controller::new(reconciler, store.clone(), settings);
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(controller.run(cancel.clone()));
    Running {
        store,
        workspace,
        cancel,
        handle,
    }
}

/// Polls until `check` holds for the stored object, or fails after 5s.
async fn wait_for<F>(store: &InMemoryChannelStore, key: &ResourceKey, check: F)
where
    F: Fn(Option<&Channel>) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let current = store.get(key).await.unwrap();
        if check(current.as_ref()) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached, last state: {current:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn succeeded(channel: Option<&Channel>) -> bool {
    channel.is_some_and(|c| c.status.condition(RECONCILE_SUCCESS).is_some())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lifecycle_through_events() {
    let running = start(test_settings());
    let store = running.store.clone();

    let created = store
        .create(Channel::new(NAMESPACE, ChannelSpec::new("bat-channel")))
        .unwrap();
    let key = created.key();
    wait_for(&store, &key, succeeded).await;

    store
        .update_spec(&key, ChannelSpec::new("bat-channel").with_topic("new topic"))
        .unwrap();
    wait_for(&store, &key, |c| {
        c.is_some_and(|c| c.status.observed_generation == Some(2))
    })
    .await;
    let remote = running.workspace.channel_named("bat-channel").unwrap();
    assert_eq!(remote.topic, "new topic");
    assert_eq!(running.workspace.count(Operation::SetTopic), 1);
    assert_eq!(running.workspace.count(Operation::CreateChannel), 1);

    store.delete(&key).unwrap();
    wait_for(&store, &key, |c| c.is_none()).await;
    assert!(running.workspace.channel(&remote.id).unwrap().is_archived);

    running.cancel.cancel();
    running.handle.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_key_is_requeued() {
    let running = start(test_settings());
    running
        .workspace
        .fail_next(Operation::CreateChannel, 2, "internal_error");

    let created = running
        .store
        .create(Channel::new(NAMESPACE, ChannelSpec::new("bat-channel")))
        .unwrap();
    let key = created.key();

    // Status writes do not produce events, so only the requeue timer can
    // bring the key back after each failure
    wait_for(&running.store, &key, succeeded).await;
    let channel = running.store.get(&key).await.unwrap().unwrap();
    assert!(channel.status.condition(RECONCILE_ERROR).is_none());
    assert_eq!(running.workspace.count(Operation::CreateChannel), 3);

    running.cancel.cancel();
    running.handle.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_existing_objects_are_picked_up_at_start() {
    let store = Arc::new(InMemoryChannelStore::new());
    let workspace = Arc::new(FakeWorkspace::new());
    let settings = test_settings();
    for name in ["bat-channel", "ecto-1", "firehouse"] {
        store
            .create(Channel::new(NAMESPACE, ChannelSpec::new(name)))
            .unwrap();
    }

    let reconciler = Arc::new(ChannelReconciler::new(
        store.clone(),
        workspace.clone(),
        &settings,
    ));
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(Controller::new(reconciler, store.clone(), settings).run(cancel.clone()));

    for name in ["bat-channel", "ecto-1", "firehouse"] {
        wait_for(&store, &ResourceKey::new(NAMESPACE, name), succeeded).await;
    }
    assert_eq!(workspace.channels().len(), 3);

    cancel.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_resync_repairs_remote_drift() {
    let settings = ControllerSettings {
        resync_interval: Duration::from_millis(100),
        ..test_settings()
    };
    let running = start(settings);
    let key = running
        .store
        .create(Channel::new(
            NAMESPACE,
            ChannelSpec::new("bat-channel").with_topic("bats"),
        ))
        .unwrap()
        .key();
    wait_for(&running.store, &key, succeeded).await;

    // Someone edits the topic in the chat client
    let remote = running.workspace.channel_named("bat-channel").unwrap();
    running
        .workspace
        .edit_channel(&remote.id, |c| c.topic = "ghosts".into());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while running.workspace.channel(&remote.id).unwrap().topic != "bats" {
        assert!(tokio::time::Instant::now() < deadline, "drift not repaired");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    running.cancel.cancel();
    running.handle.await.unwrap().unwrap();
}

/// Workspace whose name lookups take a while to answer.
struct SlowLookups {
    inner: Arc<FakeWorkspace>,
    delay: Duration,
    answered: AtomicBool,
}

#[async_trait]
impl ChatApi for SlowLookups {
    async fn create_channel(&self, name: &str, private: bool) -> Result<RemoteChannel, ApiError> {
        self.inner.create_channel(name, private).await
    }

    async fn get_channel(&self, id: &str) -> Result<RemoteChannel, ApiError> {
        self.inner.get_channel(id).await
    }

    async fn get_channel_by_name(&self, name: &str) -> Result<Option<RemoteChannel>, ApiError> {
        tokio::time::sleep(self.delay).await;
        self.answered.store(true, Ordering::SeqCst);
        self.inner.get_channel_by_name(name).await
    }

    async fn rename_channel(&self, id: &str, name: &str) -> Result<(), ApiError> {
        self.inner.rename_channel(id, name).await
    }

    async fn set_topic(&self, id: &str, topic: &str) -> Result<(), ApiError> {
        self.inner.set_topic(id, topic).await
    }

    async fn set_purpose(&self, id: &str, purpose: &str) -> Result<(), ApiError> {
        self.inner.set_purpose(id, purpose).await
    }

    async fn invite_users(&self, id: &str, user_ids: &[String]) -> Result<(), ApiError> {
        self.inner.invite_users(id, user_ids).await
    }

    async fn kick_users(&self, id: &str, user_ids: &[String]) -> Result<(), ApiError> {
        self.inner.kick_users(id, user_ids).await
    }

    async fn archive_channel(&self, id: &str) -> Result<(), ApiError> {
        self.inner.archive_channel(id).await
    }

    async fn lookup_user_id_by_email(&self, email: &str) -> Result<Option<String>, ApiError> {
        self.inner.lookup_user_id_by_email(email).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancellation_stops_in_flight_passes() {
    let store = Arc::new(InMemoryChannelStore::new());
    let workspace = Arc::new(FakeWorkspace::new());
    let api = Arc::new(SlowLookups {
        inner: workspace.clone(),
        delay: Duration::from_millis(300),
        answered: AtomicBool::new(false),
    });
    let settings = test_settings();
    let key = store
        .create(Channel::new(NAMESPACE, ChannelSpec::new("bat-channel")))
        .unwrap()
        .key();

    let reconciler = Arc::new(ChannelReconciler::new(store.clone(), api.clone(), &settings));
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(Controller::new(reconciler, store.clone(), settings).run(cancel.clone()));

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();
    handle.await.unwrap().unwrap();

    // Nothing keeps running once the controller has returned
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!api.answered.load(Ordering::SeqCst));
    assert!(workspace.channels().is_empty());
    let channel = store.get(&key).await.unwrap().unwrap();
    assert!(channel.status.conditions.is_empty());
}
