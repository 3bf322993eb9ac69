use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::group::GroupId;
use crate::validator::ValidatorId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValidatorStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "not ok")]
    NotOk,
    #[serde(rename = "acknowledged")]
    Acknowledged,
    #[serde(rename = "unknown")]
    Unknown,
}

impl ValidatorStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ValidatorStatus::Ok => "ok",
            ValidatorStatus::NotOk => "not ok",
            ValidatorStatus::Acknowledged => "acknowledged",
            ValidatorStatus::Unknown => "unknown",
        }
    }

    /// Health verdict for a single efficiency reading.
    pub fn from_efficiency(efficiency: f64, threshold: f64) -> Self {
        if efficiency < threshold {
            ValidatorStatus::NotOk
        } else {
            ValidatorStatus::Ok
        }
    }
}

impl fmt::Display for ValidatorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidatorStatus {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "ok" => Ok(ValidatorStatus::Ok),
            "not ok" => Ok(ValidatorStatus::NotOk),
            "acknowledged" => Ok(ValidatorStatus::Acknowledged),
            "unknown" => Ok(ValidatorStatus::Unknown),
            other => bail!("unknown validator status: {other}"),
        }
    }
}

/// Entry of the append-only status-change log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub validator_id: ValidatorId,
    pub group_id: Option<GroupId>,
    pub timestamp: i64,
    pub status: ValidatorStatus,
}

/// Last known health state of a validator and when it was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedStatus {
    pub status: ValidatorStatus,
    pub since: i64,
}

impl TrackedStatus {
    pub fn unknown(now: i64) -> Self {
        Self {
            status: ValidatorStatus::Unknown,
            since: now,
        }
    }
}
