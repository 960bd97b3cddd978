//! Work-queue runner feeding keys to the reconciler.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::poll_fn;
use std::sync::Arc;
use std::time::Duration;

use chanop_core::ResourceKey;
use chanop_store::DynChannelStore;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::{self, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::time::{DelayQueue, delay_queue};
use tracing::{debug, error, info, warn};

use crate::config::ControllerSettings;
use crate::error::ReconcileError;
use crate::reconciler::{Action, ChannelReconciler};

type Outcome = Result<Action, ReconcileError>;

enum Step {
    Stop,
    Changed(Result<ResourceKey, RecvError>),
    Finished(Option<Result<(task::Id, Outcome), task::JoinError>>),
    Due(ResourceKey),
    Resync,
}

/// Pending keys and the keys currently being reconciled.
///
/// A key is queued at most once and never handed out while it is running.
/// A key that changes while running is queued again when it finishes.
#[derive(Default)]
struct WorkQueue {
    pending: VecDeque<ResourceKey>,
    queued: HashSet<ResourceKey>,
    running: HashSet<ResourceKey>,
    dirty: HashSet<ResourceKey>,
}

impl WorkQueue {
    fn push(&mut self, key: ResourceKey) {
        if self.running.contains(&key) {
            self.dirty.insert(key);
        } else if self.queued.insert(key.clone()) {
            self.pending.push_back(key);
        }
    }

    fn pop(&mut self) -> Option<ResourceKey> {
        let key = self.pending.pop_front()?;
        self.queued.remove(&key);
        self.running.insert(key.clone());
        Some(key)
    }

    fn done(&mut self, key: &ResourceKey) {
        self.running.remove(key);
        if self.dirty.remove(key) {
            self.push(key.clone());
        }
    }
}

/// Runs the reconcile loop until cancelled.
///
/// Keys come from store change events, from requeue timers and from a
/// periodic resync of every stored key. Up to `max_concurrent_reconciles`
/// distinct keys are reconciled at once.
pub struct Controller {
    reconciler: Arc<ChannelReconciler>,
    store: DynChannelStore,
    settings: ControllerSettings,
}

impl Controller {
    pub fn new(
        reconciler: Arc<ChannelReconciler>,
        store: DynChannelStore,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            reconciler,
            store,
            settings,
        }
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<(), ReconcileError> {
        let mut events = self.store.subscribe();
        let mut queue = WorkQueue::default();
        let mut in_flight: JoinSet<Outcome> = JoinSet::new();
        let mut in_flight_keys: HashMap<task::Id, ResourceKey> = HashMap::new();
        let mut requeues: DelayQueue<ResourceKey> = DelayQueue::new();
        let mut timers: HashMap<ResourceKey, delay_queue::Key> = HashMap::new();

        // The first tick fires immediately and enqueues everything stored
        let mut resync = tokio::time::interval_at(Instant::now(), self.settings.resync_interval);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let limit = self.settings.max_concurrent_reconciles.max(1);
        info!(
            backend = self.store.backend_name(),
            workers = limit,
            resync = ?self.settings.resync_interval,
            "controller started"
        );

        loop {
            while in_flight.len() < limit {
                let Some(key) = queue.pop() else { break };
                if let Some(timer) = timers.remove(&key) {
                    requeues.remove(&timer);
                }
                let reconciler = self.reconciler.clone();
                let task_key = key.clone();
                let handle =
                    in_flight.spawn(async move { reconciler.reconcile(&task_key).await });
                in_flight_keys.insert(handle.id(), key);
            }

            let step = tokio::select! {
                _ = cancel.cancelled() => Step::Stop,
                changed = events.recv() => Step::Changed(changed),
                finished = in_flight.join_next_with_id(), if !in_flight.is_empty() => {
                    Step::Finished(finished)
                }
                Some(due) = poll_fn(|cx| requeues.poll_expired(cx)), if !requeues.is_empty() => {
                    Step::Due(due.into_inner())
                }
                _ = resync.tick() => Step::Resync,
            };

            match step {
                Step::Stop => break,
                Step::Changed(Ok(key)) => {
                    debug!(key = %key, "change event");
                    queue.push(key);
                }
                Step::Changed(Err(RecvError::Lagged(missed))) => {
                    warn!(missed, "change events dropped, resyncing");
                    self.enqueue_all(&mut queue).await;
                }
                Step::Changed(Err(RecvError::Closed)) => {
                    warn!("store event stream closed, stopping");
                    break;
                }
                Step::Finished(Some(Ok((id, outcome)))) => {
                    let Some(key) = in_flight_keys.remove(&id) else {
                        continue;
                    };
                    queue.done(&key);
                    match outcome {
                        Ok(Action::AwaitChange) => debug!(key = %key, "reconciled"),
                        Ok(Action::RequeueAfter(delay)) => {
                            debug!(key = %key, ?delay, "requeue scheduled");
                            schedule(&mut requeues, &mut timers, key, delay);
                        }
                        Err(e) if e.is_cancelled() => debug!(key = %key, "reconcile cancelled"),
                        Err(e) => {
                            error!(key = %key, error = %e, "reconcile failed");
                            let delay = self.settings.error_requeue_delay;
                            schedule(&mut requeues, &mut timers, key, delay);
                        }
                    }
                }
                Step::Finished(Some(Err(e))) => {
                    let Some(key) = in_flight_keys.remove(&e.id()) else {
                        continue;
                    };
                    queue.done(&key);
                    error!(key = %key, error = %e, "reconcile task panicked");
                    let delay = self.settings.error_requeue_delay;
                    schedule(&mut requeues, &mut timers, key, delay);
                }
                Step::Finished(None) => {}
                Step::Due(key) => {
                    timers.remove(&key);
                    queue.push(key);
                }
                Step::Resync => {
                    debug!("periodic resync");
                    self.enqueue_all(&mut queue).await;
                }
            }
        }

        // Aborting drops every in-flight pass at its next await point
        info!(in_flight = in_flight.len(), "controller stopping");
        in_flight.shutdown().await;
        Ok(())
    }

    async fn enqueue_all(&self, queue: &mut WorkQueue) {
        match self.store.list_keys().await {
            Ok(keys) => keys.into_iter().for_each(|key| queue.push(key)),
            Err(e) => error!(error = %e, "failed to list channels"),
        }
    }
}

/// Arms (or re-arms) the requeue timer for `key`.
fn schedule(
    requeues: &mut DelayQueue<ResourceKey>,
    timers: &mut HashMap<ResourceKey, delay_queue::Key>,
    key: ResourceKey,
    delay: Duration,
) {
    match timers.get(&key) {
        Some(timer) => requeues.reset(timer, delay),
        None => {
            let timer = requeues.insert(key.clone(), delay);
            timers.insert(key, timer);
        }
    }
}
