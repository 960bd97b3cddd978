//! Persists reconcile outcomes as status conditions.

use std::time::Duration;

use chanop_core::{Channel, ChannelStatus, Condition, ResourceKey};
use chanop_store::DynChannelStore;
use tracing::{debug, error};

use crate::config::ControllerSettings;
use crate::error::ReconcileError;

/// Writes `ReconcileError`/`ReconcileSuccess` conditions and other status
/// fields with optimistic concurrency.
///
/// Each write re-reads the object, applies the change to a fresh copy of its
/// status and sends it guarded by the version it read. A version conflict
/// triggers another read-modify-write, up to `status_conflict_retries`
/// attempts in total.
#[derive(Clone)]
pub struct StatusReporter {
    store: DynChannelStore,
    error_requeue_delay: Duration,
    conflict_retries: u32,
}

impl StatusReporter {
    pub fn new(store: DynChannelStore, settings: &ControllerSettings) -> Self {
        Self {
            store,
            error_requeue_delay: settings.error_requeue_delay,
            conflict_retries: settings.status_conflict_retries.max(1),
        }
    }

    pub fn error_requeue_delay(&self) -> Duration {
        self.error_requeue_delay
    }

    /// Records `err` as the `ReconcileError` condition and returns how long to
    /// wait before the next attempt.
    ///
    /// Fails if the condition could not be written, so the failure is never
    /// silently dropped.
    pub async fn report_error(
        &self,
        key: &ResourceKey,
        err: &ReconcileError,
    ) -> Result<Duration, ReconcileError> {
        let condition = Condition::reconcile_error(err.to_string());
        if let Err(write_err) = self
            .patch_status(key, |status| status.set_outcome(condition.clone()))
            .await
        {
            error!(
                key = %key,
                error = %write_err,
                reconcile_error = %err,
                "failed to record reconcile error in status"
            );
            return Err(write_err);
        }
        Ok(self.error_requeue_delay)
    }

    /// Records a converged pass for `generation`.
    pub async fn report_success(
        &self,
        key: &ResourceKey,
        generation: i64,
    ) -> Result<(), ReconcileError> {
        self.patch_status(key, |status| {
            status.set_outcome(Condition::reconcile_success());
            status.observed_generation = Some(generation);
        })
        .await
        .map(|_| ())
    }

    /// Stores the ID of the remote channel backing `key`.
    pub async fn record_remote_id(
        &self,
        key: &ResourceKey,
        remote_id: &str,
    ) -> Result<Option<Channel>, ReconcileError> {
        self.patch_status(key, |status| {
            status.remote_id = Some(remote_id.to_string());
        })
        .await
    }

    /// Applies `mutate` to the current status and writes it back.
    ///
    /// Returns `None` without writing if the object no longer exists. An
    /// unchanged status is not written.
    pub async fn patch_status<F>(
        &self,
        key: &ResourceKey,
        mut mutate: F,
    ) -> Result<Option<Channel>, ReconcileError>
    where
        F: FnMut(&mut ChannelStatus) + Send,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let Some(current) = self.store.get(key).await? else {
                debug!(key = %key, "object gone, skipping status write");
                return Ok(None);
            };

            let mut status: ChannelStatus = current.status.clone();
            mutate(&mut status);
            if status == current.status {
                return Ok(Some(current));
            }

            match self
                .store
                .update_status(key, &status, &current.metadata.resource_version)
                .await
            {
                Ok(updated) => return Ok(Some(updated)),
                Err(e) if e.is_version_conflict() && attempt < self.conflict_retries => {
                    debug!(key = %key, attempt, "status write conflicted, re-reading");
                }
                Err(e) if e.is_not_found() => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
    }
}
