use serde::{Deserialize, Serialize};

use crate::sample::ValidityWindow;
use crate::validator::ValidatorId;

pub type GroupId = u32;

/// A validation cycle together with its active validator set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    #[serde(rename = "cycle_id")]
    pub group_id: GroupId,
    #[serde(rename = "cycle_info")]
    pub info: GroupInfo,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GroupInfo {
    #[serde(rename = "utime_since")]
    pub valid_since: i64,
    #[serde(rename = "utime_until")]
    pub valid_until: i64,
    pub total_weight: i64,
    #[serde(default, rename = "validators")]
    pub members: Vec<GroupMember>,
}

impl Group {
    pub fn validity(&self) -> ValidityWindow {
        ValidityWindow {
            since: self.info.valid_since,
            until: self.info.valid_until,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GroupMember {
    #[serde(rename = "adnl_addr")]
    pub validator_id: ValidatorId,
    #[serde(default)]
    pub pubkey: String,
    pub weight: i64,
    pub index: u16,
    pub stake: i64,
    #[serde(default)]
    pub max_factor: i32,
    #[serde(default, rename = "wallet_address")]
    pub wallet: String,
}

/// One row of the external per-group scoreboard.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreboardRow {
    #[serde(rename = "cycle_id")]
    pub group_id: GroupId,
    #[serde(rename = "utime_since")]
    pub valid_since: i64,
    #[serde(rename = "utime_until")]
    pub valid_until: i64,
    #[serde(rename = "adnl_addr")]
    pub validator_id: ValidatorId,
    #[serde(default, rename = "validator_adnl")]
    pub node_id: String,
    #[serde(default)]
    pub pubkey: String,
    #[serde(default)]
    pub pubkey_hash: String,
    pub weight: i64,
    #[serde(rename = "idx")]
    pub index: u16,
    pub stake: i64,
    pub efficiency: f64,
}
