use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;

use vigil_adapter_analytics::MemoryCache;
use vigil_domain::{
    AggregateRequest, Alert, Group, GroupId, IntervalBucket, NotificationsConfig, RecipientId,
    Sample, StatusRecord, TimeRange, ValidatorId, ValidatorMeta, ValidatorStatus, ValidityWindow,
};
use vigil_ports::{
    CachePort, Clock, ManualClock, MessengerPort, OutboundMessage, TimeSeriesPort,
};

use crate::dispatch::AlertDispatcher;

pub(crate) const VALIDATOR_A: &str =
    "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";
pub(crate) const VALIDATOR_B: &str =
    "BBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB";

/// 2023-11-14 22:20:00 UTC, minute aligned.
pub(crate) const T0: i64 = 1_700_000_400;

#[derive(Default)]
pub(crate) struct RecordingMessenger {
    sent: Mutex<Vec<OutboundMessage>>,
    failing: HashSet<RecipientId>,
}

impl RecordingMessenger {
    pub(crate) fn failing_for(recipients: &[RecipientId]) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: recipients.iter().copied().collect(),
        }
    }

    pub(crate) fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessengerPort for RecordingMessenger {
    async fn send(&self, message: OutboundMessage) -> Result<()> {
        if self.failing.contains(&message.recipient) {
            bail!("chat {} blocked the bot", message.recipient);
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

/// Cache whose every call fails.
pub(crate) struct BrokenCache;

#[async_trait]
impl CachePort for BrokenCache {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        bail!("cache unavailable")
    }
    async fn set(&self, _key: &str, _payload: Vec<u8>, _ttl: Option<Duration>) -> Result<()> {
        bail!("cache unavailable")
    }
    async fn increment(&self, _key: &str) -> Result<i64> {
        bail!("cache unavailable")
    }
    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<bool> {
        bail!("cache unavailable")
    }
    async fn set_add(&self, _key: &str, _member: &str) -> Result<bool> {
        bail!("cache unavailable")
    }
    async fn set_remove(&self, _key: &str, _member: &str) -> Result<bool> {
        bail!("cache unavailable")
    }
    async fn set_members(&self, _key: &str) -> Result<Vec<String>> {
        bail!("cache unavailable")
    }
    async fn set_contains(&self, _key: &str, _member: &str) -> Result<bool> {
        bail!("cache unavailable")
    }
    async fn keys_with_prefix(&self, _prefix: &str) -> Result<Vec<String>> {
        bail!("cache unavailable")
    }
}

pub(crate) struct Harness {
    pub clock: Arc<ManualClock>,
    pub cache: Arc<MemoryCache>,
    pub messenger: Arc<RecordingMessenger>,
    pub dispatcher: Arc<AlertDispatcher>,
}

pub(crate) fn harness(config: NotificationsConfig) -> Harness {
    harness_with(config, RecordingMessenger::default())
}

pub(crate) fn harness_with(config: NotificationsConfig, messenger: RecordingMessenger) -> Harness {
    let clock = Arc::new(ManualClock::at_unix(T0));
    let cache = Arc::new(MemoryCache::new(clock.clone() as Arc<dyn Clock>));
    let messenger = Arc::new(messenger);
    let dispatcher = Arc::new(AlertDispatcher::new(
        cache.clone(),
        messenger.clone(),
        clock.clone(),
        config,
    ));
    Harness {
        clock,
        cache,
        messenger,
        dispatcher,
    }
}

pub(crate) fn alert(id: i64, validator_id: &str, status: ValidatorStatus) -> Alert {
    Alert {
        id,
        validator_id: validator_id.to_string(),
        group_id: Some(1),
        status,
        is_acknowledged: false,
        ack_by: None,
        ack_by_username: None,
        previous_status: ValidatorStatus::Ok,
        previous_status_since: T0 - 5_400,
        efficiency: 0.5,
        emitted_at: T0,
    }
}

/// Store wrapper that counts aggregate-style reads.
pub(crate) struct CountingStore {
    pub inner: Arc<dyn TimeSeriesPort>,
    pub reads: AtomicUsize,
    failing_status_appends: AtomicBool,
}

impl CountingStore {
    pub(crate) fn new(inner: Arc<dyn TimeSeriesPort>) -> Self {
        Self {
            inner,
            reads: AtomicUsize::new(0),
            failing_status_appends: AtomicBool::new(false),
        }
    }

    pub(crate) fn fail_status_appends(&self, failing: bool) {
        self.failing_status_appends.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.reads.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TimeSeriesPort for CountingStore {
    async fn append(&self, samples: &[Sample]) -> Result<()> {
        self.inner.append(samples).await
    }

    async fn append_status_change(&self, record: &StatusRecord) -> Result<()> {
        if self.failing_status_appends.load(Ordering::SeqCst) {
            bail!("status log unavailable");
        }
        self.inner.append_status_change(record).await
    }

    async fn query_aggregates(&self, request: &AggregateRequest) -> Result<Vec<IntervalBucket>> {
        self.hit();
        self.inner.query_aggregates(request).await
    }

    async fn query_distinct_validators(&self, range: TimeRange) -> Result<BTreeSet<ValidatorId>> {
        self.hit();
        self.inner.query_distinct_validators(range).await
    }

    async fn query_status_history(
        &self,
        validator_id: &str,
        limit: usize,
    ) -> Result<Vec<StatusRecord>> {
        self.hit();
        self.inner.query_status_history(validator_id, limit).await
    }

    async fn query_validator_meta(
        &self,
        range: TimeRange,
        group_id: Option<GroupId>,
    ) -> Result<BTreeMap<ValidatorId, ValidatorMeta>> {
        self.hit();
        self.inner.query_validator_meta(range, group_id).await
    }

    async fn upsert_groups(&self, groups: &[Group]) -> Result<()> {
        self.inner.upsert_groups(groups).await
    }
}

pub(crate) fn sample(
    validator: &str,
    group_id: GroupId,
    timestamp: i64,
    efficiency: f64,
) -> Sample {
    Sample {
        validator_id: validator.to_string(),
        group_id,
        timestamp,
        efficiency,
        stake: 1_500_000_000_000,
        weight: 12,
        index: 3,
        pubkey_hash: "h".to_string(),
        validity: ValidityWindow {
            since: T0 - 86_400,
            until: T0 + 86_400,
        },
    }
}
