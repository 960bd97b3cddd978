//! Status conditions describing the outcome of reconcile passes.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::clock::now_truncated;

/// Condition type written when the last pass failed.
pub const RECONCILE_ERROR: &str = "ReconcileError";
/// Condition type written when the last pass converged.
pub const RECONCILE_SUCCESS: &str = "ReconcileSuccess";

pub const FAILED_REASON: &str = "Failed";
pub const SUCCEEDED_REASON: &str = "Succeeded";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// A typed, timestamped status entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub last_transition_time: OffsetDateTime,
}

impl Condition {
    pub fn new(
        condition_type: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            condition_type: condition_type.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: now_truncated(),
        }
    }

    /// `ReconcileError` condition carrying the failure message.
    pub fn reconcile_error(message: impl Into<String>) -> Self {
        Self::new(RECONCILE_ERROR, ConditionStatus::True, FAILED_REASON, message)
    }

    /// `ReconcileSuccess` condition.
    pub fn reconcile_success() -> Self {
        Self::new(
            RECONCILE_SUCCESS,
            ConditionStatus::True,
            SUCCEEDED_REASON,
            "channel is in sync",
        )
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Upserts `condition` into `conditions`, keeping at most one entry per type.
///
/// The transition time of an existing entry is kept when its status does not
/// change. The list stays ordered by last transition.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    if let Some(existing) = conditions
        .iter()
        .find(|c| c.condition_type == condition.condition_type)
        && existing.status == condition.status
    {
        condition.last_transition_time = existing.last_transition_time;
    }
    conditions.retain(|c| c.condition_type != condition.condition_type);
    conditions.push(condition);
    conditions.sort_by_key(|c| c.last_transition_time);
}

pub fn remove_condition(conditions: &mut Vec<Condition>, condition_type: &str) -> bool {
    let before = conditions.len();
    conditions.retain(|c| c.condition_type != condition_type);
    conditions.len() != before
}

pub fn find_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.condition_type == condition_type)
}
