//! Ports between the monitoring services and their infrastructure.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use vigil_domain::{
    AggregateRequest, Group, GroupId, IntervalBucket, RecipientId, Sample, ScoreboardRow,
    StatusRecord, TimeRange, ValidatorId, ValidatorMeta,
};

/// Durable, append-only store of efficiency samples and status changes.
#[async_trait]
pub trait TimeSeriesPort: Send + Sync {
    async fn append(&self, samples: &[Sample]) -> Result<()>;

    async fn append_status_change(&self, record: &StatusRecord) -> Result<()>;

    /// Bucketed averages for every requested validator, gap-free over the
    /// whole range and ordered by validator, bucket start and group.
    async fn query_aggregates(&self, request: &AggregateRequest) -> Result<Vec<IntervalBucket>>;

    async fn query_distinct_validators(&self, range: TimeRange) -> Result<BTreeSet<ValidatorId>>;

    /// Newest records first.
    async fn query_status_history(
        &self,
        validator_id: &str,
        limit: usize,
    ) -> Result<Vec<StatusRecord>>;

    async fn query_validator_meta(
        &self,
        range: TimeRange,
        group_id: Option<GroupId>,
    ) -> Result<BTreeMap<ValidatorId, ValidatorMeta>>;

    /// Latest-wins upsert of group, group window and validator reference rows.
    async fn upsert_groups(&self, groups: &[Group]) -> Result<()>;
}

/// Key/value cache with expiry, counters and membership sets.
#[async_trait]
pub trait CachePort: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// `ttl == None` keeps the entry until it is overwritten.
    async fn set(&self, key: &str, payload: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Atomically increments the counter at `key` and returns the new value.
    async fn increment(&self, key: &str) -> Result<i64>;

    /// Returns `false` when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    async fn set_add(&self, key: &str, member: &str) -> Result<bool>;

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool>;

    async fn set_members(&self, key: &str) -> Result<Vec<String>>;

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool>;

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

/// External per-group scoreboard source.
#[async_trait]
pub trait ScoreboardPort: Send + Sync {
    async fn fetch_groups(&self, group_id: Option<GroupId>) -> Result<Vec<Group>>;

    async fn fetch_scoreboard(
        &self,
        group_id: GroupId,
        window: Option<TimeRange>,
    ) -> Result<Vec<ScoreboardRow>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub recipient: RecipientId,
    pub text: String,
    /// Alert the recipient can acknowledge from the message itself.
    pub ack_alert_id: Option<i64>,
}

/// Delivery channel towards a single chat recipient.
#[async_trait]
pub trait MessengerPort: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> Result<()>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn unix_now(&self) -> i64 {
        self.now().timestamp()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn at_unix(secs: i64) -> Self {
        let now = Utc
            .timestamp_opt(secs, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
        }
    }

    pub fn set_unix(&self, secs: i64) {
        if let (Ok(mut guard), Some(at)) = (self.now.lock(), Utc.timestamp_opt(secs, 0).single()) {
            *guard = at;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
            .lock()
            .map(|guard| *guard)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }
}
