//! Per-key reconciliation of a Channel against the remote workspace.

use std::collections::BTreeSet;
use std::time::Duration;

use chanop_core::{Channel, ChannelSpec, FINALIZER, ResourceKey};
use chanop_slack::{ApiError, DynChatApi, RemoteChannel};
use chanop_store::DynChannelStore;
use tracing::{debug, info, instrument, warn};

use crate::config::ControllerSettings;
use crate::error::ReconcileError;
use crate::finalizer::{ensure_finalizer, remove_finalizer};
use crate::reporter::StatusReporter;

/// What the caller should do with a key after a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing to do until the object or the remote side changes.
    AwaitChange,
    /// Run the key again after the delay.
    RequeueAfter(Duration),
}

/// Drives one Channel towards its spec.
///
/// A pass re-reads everything it needs; nothing is cached between calls, so
/// the same key can be delivered any number of times.
pub struct ChannelReconciler {
    store: DynChannelStore,
    api: DynChatApi,
    reporter: StatusReporter,
    write_attempts: u32,
}

impl ChannelReconciler {
    pub fn new(store: DynChannelStore, api: DynChatApi, settings: &ControllerSettings) -> Self {
        Self {
            reporter: StatusReporter::new(store.clone(), settings),
            store,
            api,
            write_attempts: settings.status_conflict_retries.max(1),
        }
    }

    pub fn reporter(&self) -> &StatusReporter {
        &self.reporter
    }

    /// Runs one pass for `key`.
    ///
    /// Failures are written to the object's status and turned into a
    /// requeue. An error is returned when the pass was cancelled or when the
    /// outcome could not be written to status.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn reconcile(&self, key: &ResourceKey) -> Result<Action, ReconcileError> {
        let Some(channel) = self.store.get(key).await? else {
            debug!("channel no longer exists");
            return Ok(Action::AwaitChange);
        };

        let outcome = if channel.metadata.is_being_deleted() {
            self.finalize(&channel).await
        } else {
            self.apply(&channel).await
        };

        match outcome {
            Ok(()) => {
                if !channel.metadata.is_being_deleted() {
                    self.reporter
                        .report_success(key, channel.metadata.generation)
                        .await?;
                }
                Ok(Action::AwaitChange)
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                warn!(error = %e, "reconcile failed");
                let delay = self.reporter.report_error(key, &e).await?;
                Ok(Action::RequeueAfter(delay))
            }
        }
    }

    /// Tears down the remote side of a channel being deleted, then releases
    /// the object.
    async fn finalize(&self, channel: &Channel) -> Result<(), ReconcileError> {
        let key = channel.key();
        if !channel.metadata.has_finalizer(FINALIZER) {
            return Ok(());
        }

        match channel.remote_id() {
            Some(remote_id) => match self.api.archive_channel(remote_id).await {
                Ok(()) => info!(remote_id, "archived remote channel"),
                Err(e) if e.is_cancelled() => return Err(e.into()),
                Err(e) => warn!(remote_id, error = %e, "failed to archive remote channel, releasing anyway"),
            },
            None => debug!("no remote channel recorded, nothing to archive"),
        }

        remove_finalizer(self.store.as_ref(), &key, self.write_attempts).await?;
        info!("finalizer removed");
        Ok(())
    }

    async fn apply(&self, channel: &Channel) -> Result<(), ReconcileError> {
        let key = channel.key();
        let spec = &channel.spec;
        spec.validate()?;

        let remote_id = match channel.remote_id() {
            Some(id) => id.to_string(),
            None => {
                let id = self.create_or_adopt(spec).await?;
                if self.reporter.record_remote_id(&key, &id).await?.is_none() {
                    return Ok(());
                }
                id
            }
        };

        if ensure_finalizer(self.store.as_ref(), &key, self.write_attempts)
            .await?
            .is_none()
        {
            return Ok(());
        }

        let remote = match self.api.get_channel(&remote_id).await {
            Ok(remote) => remote,
            Err(e) if e.is_not_found() => return Err(ReconcileError::RemoteGone { remote_id }),
            Err(e) => return Err(e.into()),
        };
        if remote.is_archived {
            return Err(ReconcileError::Archived { remote_id });
        }

        let mut errors = Vec::new();
        if remote.is_private != spec.private {
            errors.push(ReconcileError::PrivacyMismatch {
                desired: spec.private,
                remote: remote.is_private,
            });
        }
        self.sync_fields(&remote, spec, &mut errors).await;
        self.sync_members(&remote, &spec.users, &mut errors).await;

        match ReconcileError::aggregate(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Finds the remote channel by name or creates it, returning its ID.
    async fn create_or_adopt(&self, spec: &ChannelSpec) -> Result<String, ReconcileError> {
        if let Some(existing) = self.api.get_channel_by_name(&spec.name).await? {
            info!(remote_id = %existing.id, name = %spec.name, "adopting existing remote channel");
            return Ok(existing.id);
        }

        match self.api.create_channel(&spec.name, spec.private).await {
            Ok(created) => {
                info!(remote_id = %created.id, name = %spec.name, "created remote channel");
                Ok(created.id)
            }
            Err(e) if e.is_name_taken() => {
                // Either another creator won the race, or an archived channel
                // still holds the name
                match self.api.get_channel_by_name(&spec.name).await? {
                    Some(existing) => {
                        info!(remote_id = %existing.id, name = %spec.name, "adopting remote channel after name clash");
                        Ok(existing.id)
                    }
                    None => Err(ReconcileError::NameReserved {
                        name: spec.name.clone(),
                    }),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Name, topic and purpose. Each divergent field gets one write; a
    /// failure does not stop the others.
    async fn sync_fields(
        &self,
        remote: &RemoteChannel,
        spec: &ChannelSpec,
        errors: &mut Vec<ReconcileError>,
    ) {
        let id = remote.id.as_str();
        if remote.name != spec.name {
            info!(remote_id = id, from = %remote.name, to = %spec.name, "renaming channel");
            collect(self.api.rename_channel(id, &spec.name).await, errors);
        }
        if remote.topic != spec.topic {
            info!(remote_id = id, "updating topic");
            collect(self.api.set_topic(id, &spec.topic).await, errors);
        }
        if remote.purpose != spec.description {
            info!(remote_id = id, "updating description");
            collect(self.api.set_purpose(id, &spec.description).await, errors);
        }
    }

    /// Invites missing members, then removes members not in the spec.
    ///
    /// The channel creator is never removed. Removals are skipped when some
    /// email could not be resolved for a reason other than the user not
    /// existing, since that user might be a current member.
    async fn sync_members(
        &self,
        remote: &RemoteChannel,
        emails: &BTreeSet<String>,
        errors: &mut Vec<ReconcileError>,
    ) {
        let mut desired = BTreeSet::new();
        let mut resolved_all = true;
        for email in emails {
            match self.api.lookup_user_id_by_email(email).await {
                Ok(Some(user_id)) => {
                    desired.insert(user_id);
                }
                Ok(None) => errors.push(ReconcileError::unknown_user(email)),
                Err(e) => {
                    resolved_all = false;
                    errors.push(e.into());
                }
            }
        }

        let current: BTreeSet<String> = remote.member_ids.iter().cloned().collect();
        let to_invite: Vec<String> = desired.difference(&current).cloned().collect();
        let to_kick: Vec<String> = current
            .difference(&desired)
            .filter(|m| remote.creator.as_deref() != Some(m.as_str()))
            .cloned()
            .collect();

        if !to_invite.is_empty() {
            info!(remote_id = %remote.id, count = to_invite.len(), "inviting members");
            collect(self.api.invite_users(&remote.id, &to_invite).await, errors);
        }
        if !to_kick.is_empty() {
            if resolved_all {
                info!(remote_id = %remote.id, count = to_kick.len(), "removing members");
                collect(self.api.kick_users(&remote.id, &to_kick).await, errors);
            } else {
                debug!(remote_id = %remote.id, "member removal deferred until all emails resolve");
            }
        }
    }
}

fn collect(result: Result<(), ApiError>, errors: &mut Vec<ReconcileError>) {
    if let Err(e) = result {
        errors.push(e.into());
    }
}
