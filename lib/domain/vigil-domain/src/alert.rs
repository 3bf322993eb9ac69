use serde::{Deserialize, Serialize};

use crate::group::GroupId;
use crate::status::ValidatorStatus;
use crate::validator::ValidatorId;

pub type AlertId = i64;
pub type RecipientId = i64;

/// Status-change notification emitted by the tracker.
///
/// The only permitted mutation after emission is the one-way flip from
/// unacknowledged to acknowledged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub validator_id: ValidatorId,
    pub group_id: Option<GroupId>,
    pub status: ValidatorStatus,
    pub is_acknowledged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_by: Option<RecipientId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_by_username: Option<String>,
    pub previous_status: ValidatorStatus,
    pub previous_status_since: i64,
    pub efficiency: f64,
    pub emitted_at: i64,
}

impl Alert {
    /// Seconds spent in the previous state before this transition.
    pub fn previous_duration_secs(&self) -> i64 {
        (self.emitted_at - self.previous_status_since).max(0)
    }

    pub fn needs_acknowledgment(&self) -> bool {
        self.status == ValidatorStatus::NotOk && !self.is_acknowledged
    }
}

/// Identity of whoever acknowledged an alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledger {
    pub id: RecipientId,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subscription {
    pub validator_id: ValidatorId,
    pub recipient_id: RecipientId,
}
