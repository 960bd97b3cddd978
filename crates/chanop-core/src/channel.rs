//! The `Channel` resource.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::condition::{self, Condition, RECONCILE_ERROR, RECONCILE_SUCCESS};
use crate::error::{CoreError, Result};
use crate::meta::{ObjectMeta, ResourceKey};

/// Finalizer placed on a channel once a remote channel may exist for it.
pub const FINALIZER: &str = "chanop.dev/remote-channel";

/// Remote channel names are capped at this many characters.
const MAX_CHANNEL_NAME_LEN: usize = 80;

/// Desired state of a chat channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSpec {
    pub name: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub description: String,
    /// Member email addresses.
    #[serde(default)]
    pub users: BTreeSet<String>,
}

impl ChannelSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_private(mut self, private: bool) -> Self {
        self.private = private;
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_users<I, S>(mut self, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.users = users.into_iter().map(Into::into).collect();
        self
    }

    /// Checks the constraints the remote workspace enforces on channel names
    /// and that every member entry looks like an email address.
    pub fn validate(&self) -> Result<()> {
        let name = &self.name;
        if name.is_empty() {
            return Err(CoreError::invalid_channel_name(name, "must not be empty"));
        }
        if name.chars().count() > MAX_CHANNEL_NAME_LEN {
            return Err(CoreError::invalid_channel_name(
                name,
                format!("must be at most {MAX_CHANNEL_NAME_LEN} characters"),
            ));
        }
        if let Some(bad) = name
            .chars()
            .find(|c| !(c.is_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '_'))
        {
            return Err(CoreError::invalid_channel_name(
                name,
                format!("contains invalid character '{bad}'"),
            ));
        }

        for email in &self.users {
            match email.split_once('@') {
                Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {}
                _ => return Err(CoreError::invalid_email(email)),
            }
        }
        Ok(())
    }
}

/// Engine-owned observed state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatus {
    #[serde(default, rename = "remoteID", skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl ChannelStatus {
    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        condition::find_condition(&self.conditions, condition_type)
    }

    pub fn set_condition(&mut self, condition: Condition) {
        condition::set_condition(&mut self.conditions, condition);
    }

    /// Records the outcome of a reconcile pass.
    ///
    /// `ReconcileSuccess` and `ReconcileError` exclude each other, so setting
    /// one drops the other.
    pub fn set_outcome(&mut self, condition: Condition) {
        let opposite = if condition.condition_type == RECONCILE_SUCCESS {
            Some(RECONCILE_ERROR)
        } else if condition.condition_type == RECONCILE_ERROR {
            Some(RECONCILE_SUCCESS)
        } else {
            None
        };
        if let Some(opposite) = opposite {
            condition::remove_condition(&mut self.conditions, opposite);
        }
        self.set_condition(condition);
    }
}

/// A channel object as held by the desired-state store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub metadata: ObjectMeta,
    pub spec: ChannelSpec,
    #[serde(default)]
    pub status: ChannelStatus,
}

impl Channel {
    pub fn new(namespace: impl Into<String>, spec: ChannelSpec) -> Self {
        let metadata = ObjectMeta::new(namespace, spec.name.clone());
        Self {
            metadata,
            spec,
            status: ChannelStatus::default(),
        }
    }

    pub fn key(&self) -> ResourceKey {
        self.metadata.key()
    }

    pub fn remote_id(&self) -> Option<&str> {
        self.status.remote_id.as_deref()
    }
}
