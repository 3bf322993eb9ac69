use serde::{Deserialize, Serialize};

use crate::group::{GroupId, ScoreboardRow};
use crate::validator::ValidatorId;

/// Unix-second window during which a group's validator set is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidityWindow {
    pub since: i64,
    pub until: i64,
}

/// One efficiency observation for a validator within a group.
///
/// Samples are immutable once appended; the logical identity is
/// `(validator_id, group_id, timestamp)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub validator_id: ValidatorId,
    pub group_id: GroupId,
    pub timestamp: i64,
    pub efficiency: f64,
    pub stake: i64,
    pub weight: i64,
    pub index: u16,
    pub pubkey_hash: String,
    pub validity: ValidityWindow,
}

impl Sample {
    pub fn from_scoreboard(row: &ScoreboardRow, timestamp: i64) -> Self {
        Self {
            validator_id: row.validator_id.clone(),
            group_id: row.group_id,
            timestamp,
            efficiency: row.efficiency,
            stake: row.stake,
            weight: row.weight,
            index: row.index,
            pubkey_hash: row.pubkey_hash.clone(),
            validity: ValidityWindow {
                since: row.valid_since,
                until: row.valid_until,
            },
        }
    }
}
