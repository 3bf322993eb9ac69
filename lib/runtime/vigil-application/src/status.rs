use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};

use vigil_domain::{
    Acknowledger, Alert, AlertId, GroupId, ScoreboardRow, StatusRecord, TrackedStatus,
    TrackingConfig, ValidatorId, ValidatorStatus,
};
use vigil_ports::{CachePort, Clock, TimeSeriesPort};

use crate::dispatch::AlertDispatcher;
use crate::error::{ServiceError, ServiceResult};
use crate::keys;

/// One efficiency reading fed to the tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub validator_id: ValidatorId,
    pub group_id: Option<GroupId>,
    pub efficiency: f64,
    pub timestamp: i64,
}

impl Observation {
    pub fn from_row(row: &ScoreboardRow, timestamp: i64) -> Self {
        Self {
            validator_id: row.validator_id.clone(),
            group_id: Some(row.group_id),
            efficiency: row.efficiency,
            timestamp,
        }
    }
}

type ValidatorLock = Arc<tokio::sync::Mutex<()>>;

/// Edge-triggered OK / NOT_OK state machine per validator.
pub struct StatusTracker {
    store: Arc<dyn TimeSeriesPort>,
    cache: Arc<dyn CachePort>,
    dispatcher: Arc<AlertDispatcher>,
    clock: Arc<dyn Clock>,
    threshold: f64,
    locks: Mutex<HashMap<ValidatorId, ValidatorLock>>,
}

impl StatusTracker {
    pub fn new(
        store: Arc<dyn TimeSeriesPort>,
        cache: Arc<dyn CachePort>,
        dispatcher: Arc<AlertDispatcher>,
        clock: Arc<dyn Clock>,
        config: &TrackingConfig,
    ) -> Self {
        Self {
            store,
            cache,
            dispatcher,
            clock,
            threshold: config.efficiency_threshold,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, validator_id: &str) -> Result<ValidatorLock> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| anyhow!("tracker lock table poisoned"))?;
        Ok(locks
            .entry(validator_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone())
    }

    /// Last persisted state; UNKNOWN since `now` when nothing is stored.
    pub async fn current_status(&self, validator_id: &str, now: i64) -> Result<TrackedStatus> {
        let key = keys::validator_status(validator_id);
        match self.cache.get(&key).await? {
            Some(payload) => serde_json::from_slice(&payload)
                .with_context(|| format!("tracked status of {validator_id} is not decodable")),
            None => Ok(TrackedStatus::unknown(now)),
        }
    }

    /// Evaluates one reading and returns the alert it raised, if any.
    ///
    /// The change is logged before the tracked state moves, so a failed
    /// append leaves the transition pending for the next reading.
    pub async fn observe(&self, observation: &Observation) -> Result<Option<Alert>> {
        let lock = self.lock_for(&observation.validator_id)?;
        let _guard = lock.lock().await;

        let now = observation.timestamp;
        let target = ValidatorStatus::from_efficiency(observation.efficiency, self.threshold);
        let current = self.current_status(&observation.validator_id, now).await?;
        if current.status == target {
            return Ok(None);
        }

        let record = StatusRecord {
            validator_id: observation.validator_id.clone(),
            group_id: observation.group_id,
            timestamp: now,
            status: target,
        };
        self.store
            .append_status_change(&record)
            .await
            .context("failed to record status change")?;

        let tracked = TrackedStatus {
            status: target,
            since: now,
        };
        let payload = serde_json::to_vec(&tracked).context("failed to encode tracked status")?;
        self.cache
            .set(&keys::validator_status(&observation.validator_id), payload, None)
            .await
            .context("failed to persist tracked status")?;

        if current.status == ValidatorStatus::Unknown && target == ValidatorStatus::Ok {
            tracing::debug!(validator = %observation.validator_id, "baseline established");
            return Ok(None);
        }

        let id = self
            .cache
            .increment(keys::ALERT_COUNTER)
            .await
            .context("failed to allocate alert id")?;
        let alert = Alert {
            id,
            validator_id: observation.validator_id.clone(),
            group_id: observation.group_id,
            status: target,
            is_acknowledged: false,
            ack_by: None,
            ack_by_username: None,
            previous_status: current.status,
            previous_status_since: current.since,
            efficiency: observation.efficiency,
            emitted_at: now,
        };
        tracing::info!(
            alert_id = id,
            validator = %alert.validator_id,
            from = %current.status,
            to = %target,
            efficiency = observation.efficiency,
            "status changed"
        );
        if let Err(err) = self.dispatcher.publish(&alert).await {
            tracing::warn!(alert_id = id, error = %err, "failed to publish alert");
        }
        Ok(Some(alert))
    }

    /// Evaluates a batch in timestamp order. A failing reading is logged and
    /// skipped.
    pub async fn observe_batch(&self, mut batch: Vec<Observation>) -> Vec<Alert> {
        batch.sort_by_key(|observation| observation.timestamp);
        let mut alerts = Vec::new();
        for observation in &batch {
            match self.observe(observation).await {
                Ok(Some(alert)) => alerts.push(alert),
                Ok(None) => {}
                Err(err) => tracing::warn!(
                    validator = %observation.validator_id,
                    error = %err,
                    "status evaluation failed"
                ),
            }
        }
        alerts
    }

    /// Marks an alert as handled. The tracked OK / NOT_OK state is untouched.
    pub async fn acknowledge(&self, alert_id: AlertId, by: Acknowledger) -> ServiceResult<Alert> {
        let Some(alert) = self.dispatcher.load_alert(alert_id).await? else {
            return Err(ServiceError::NotFound(format!("alert {alert_id}")));
        };
        let lock = self.lock_for(&alert.validator_id)?;
        let _guard = lock.lock().await;

        let Some(mut alert) = self.dispatcher.load_alert(alert_id).await? else {
            return Err(ServiceError::NotFound(format!("alert {alert_id}")));
        };
        if alert.is_acknowledged {
            return Err(ServiceError::Conflict(format!(
                "alert {alert_id} is already acknowledged"
            )));
        }

        let record = StatusRecord {
            validator_id: alert.validator_id.clone(),
            group_id: alert.group_id,
            timestamp: self.clock.unix_now(),
            status: ValidatorStatus::Acknowledged,
        };
        self.store
            .append_status_change(&record)
            .await
            .context("failed to record acknowledgment")?;

        alert.is_acknowledged = true;
        alert.ack_by = Some(by.id);
        alert.ack_by_username = by.username;
        self.dispatcher.store_alert(&alert).await?;
        tracing::info!(alert_id, validator = %alert.validator_id, by = by.id, "alert acknowledged");

        if let Err(err) = self.dispatcher.deliver_acknowledgment(&alert).await {
            tracing::warn!(alert_id, error = %err, "failed to announce acknowledgment");
        }
        Ok(alert)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{BrokenCache, CountingStore, T0, VALIDATOR_A, VALIDATOR_B, harness};
    use vigil_adapter_analytics::SqliteStorage;
    use vigil_domain::NotificationsConfig;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<CountingStore>,
        h: crate::testing::Harness,
        tracker: StatusTracker,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let sqlite = Arc::new(SqliteStorage::open(&dir.path().join("t.sqlite"), 2).unwrap());
        let store = Arc::new(CountingStore::new(sqlite));
        let h = harness(NotificationsConfig {
            default_recipients: vec![1],
            ..NotificationsConfig::default()
        });
        let tracker = StatusTracker::new(
            store.clone(),
            h.cache.clone(),
            h.dispatcher.clone(),
            h.clock.clone(),
            &TrackingConfig::default(),
        );
        Fixture {
            _dir: dir,
            store,
            h,
            tracker,
        }
    }

    fn reading(validator: &str, efficiency: f64, timestamp: i64) -> Observation {
        Observation {
            validator_id: validator.to_string(),
            group_id: Some(1),
            efficiency,
            timestamp,
        }
    }

    #[tokio::test]
    async fn stream_alerts_only_on_real_transitions() {
        let f = fixture();
        let stream = [0.95, 0.92, 0.80, 0.85, 0.93];
        let mut raised = Vec::new();
        for (i, efficiency) in stream.into_iter().enumerate() {
            let alert = f
                .tracker
                .observe(&reading(VALIDATOR_A, efficiency, T0 + 60 * i as i64))
                .await
                .unwrap();
            raised.push(alert.map(|alert| alert.status));
        }
        assert_eq!(
            raised,
            vec![
                None,
                None,
                Some(ValidatorStatus::NotOk),
                None,
                Some(ValidatorStatus::Ok)
            ]
        );

        let history = f.store.query_status_history(VALIDATOR_A, 10).await.unwrap();
        let statuses: Vec<_> = history.iter().map(|record| record.status).collect();
        assert_eq!(
            statuses,
            vec![
                ValidatorStatus::Ok,
                ValidatorStatus::NotOk,
                ValidatorStatus::Ok
            ]
        );
    }

    #[tokio::test]
    async fn first_unhealthy_reading_alerts_from_unknown() {
        let f = fixture();
        let alert = f
            .tracker
            .observe(&reading(VALIDATOR_A, 0.1, T0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(alert.id, 1);
        assert_eq!(alert.previous_status, ValidatorStatus::Unknown);
        assert!(alert.needs_acknowledgment());
        assert_eq!(f.h.dispatcher.load_alert(1).await.unwrap(), Some(alert));
    }

    #[tokio::test]
    async fn alert_carries_previous_state_and_since() {
        let f = fixture();
        f.tracker.observe(&reading(VALIDATOR_A, 0.99, T0)).await.unwrap();
        let alert = f
            .tracker
            .observe(&reading(VALIDATOR_A, 0.2, T0 + 600))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(alert.previous_status, ValidatorStatus::Ok);
        assert_eq!(alert.previous_status_since, T0);
        assert_eq!(alert.previous_duration_secs(), 600);
        let tracked = f.tracker.current_status(VALIDATOR_A, T0).await.unwrap();
        assert_eq!(tracked.status, ValidatorStatus::NotOk);
        assert_eq!(tracked.since, T0 + 600);
    }

    #[tokio::test]
    async fn batch_is_evaluated_in_timestamp_order() {
        let f = fixture();
        let alerts = f
            .tracker
            .observe_batch(vec![
                reading(VALIDATOR_A, 0.95, T0 + 120),
                reading(VALIDATOR_A, 0.10, T0 + 60),
                reading(VALIDATOR_B, 0.10, T0),
            ])
            .await;
        let summary: Vec<_> = alerts
            .iter()
            .map(|alert| (alert.validator_id.as_str(), alert.status))
            .collect();
        assert_eq!(
            summary,
            vec![
                (VALIDATOR_B, ValidatorStatus::NotOk),
                (VALIDATOR_A, ValidatorStatus::NotOk),
                (VALIDATOR_A, ValidatorStatus::Ok),
            ]
        );
    }

    #[tokio::test]
    async fn concurrent_readings_raise_one_alert() {
        let f = Arc::new(fixture());
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let f = f.clone();
            tasks.push(tokio::spawn(async move {
                f.tracker
                    .observe(&reading(VALIDATOR_A, 0.3, T0))
                    .await
                    .unwrap()
            }));
        }
        let mut raised = 0;
        for task in tasks {
            if task.await.unwrap().is_some() {
                raised += 1;
            }
        }
        assert_eq!(raised, 1);
    }

    #[tokio::test]
    async fn acknowledge_flips_once_and_keeps_baseline() {
        let f = fixture();
        let alert = f
            .tracker
            .observe(&reading(VALIDATOR_A, 0.2, T0))
            .await
            .unwrap()
            .unwrap();

        let acked = f
            .tracker
            .acknowledge(
                alert.id,
                Acknowledger {
                    id: 77,
                    username: Some("oncall".into()),
                },
            )
            .await
            .unwrap();
        assert!(acked.is_acknowledged);
        assert_eq!(acked.ack_by, Some(77));
        assert_eq!(acked.ack_by_username.as_deref(), Some("oncall"));
        assert_eq!(f.h.dispatcher.load_alert(alert.id).await.unwrap(), Some(acked));

        let again = f
            .tracker
            .acknowledge(alert.id, Acknowledger { id: 78, username: None })
            .await
            .unwrap_err();
        assert!(matches!(again, ServiceError::Conflict(_)));

        let history = f.store.query_status_history(VALIDATOR_A, 10).await.unwrap();
        let acks = history
            .iter()
            .filter(|record| record.status == ValidatorStatus::Acknowledged)
            .count();
        assert_eq!(acks, 1);

        let tracked = f.tracker.current_status(VALIDATOR_A, T0).await.unwrap();
        assert_eq!(tracked.status, ValidatorStatus::NotOk);
        assert!(
            f.h.messenger
                .sent()
                .iter()
                .any(|message| message.text.contains("acknowledged by oncall"))
        );
    }

    #[tokio::test]
    async fn acknowledge_unknown_alert_is_not_found() {
        let f = fixture();
        let err = f
            .tracker
            .acknowledge(404, Acknowledger { id: 1, username: None })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn unreadable_state_is_an_error_not_a_transition() {
        let f = fixture();
        let tracker = StatusTracker::new(
            f.store.clone(),
            Arc::new(BrokenCache),
            f.h.dispatcher.clone(),
            f.h.clock.clone(),
            &TrackingConfig::default(),
        );
        assert!(tracker.observe(&reading(VALIDATOR_A, 0.2, T0)).await.is_err());
        assert!(f.store.query_status_history(VALIDATOR_A, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_status_append_keeps_transition_pending() {
        let f = fixture();
        f.store.fail_status_appends(true);
        let err = f.tracker.observe(&reading(VALIDATOR_A, 0.1, T0)).await;
        assert!(err.is_err());
        let tracked = f.tracker.current_status(VALIDATOR_A, T0).await.unwrap();
        assert_eq!(tracked.status, ValidatorStatus::Unknown);
        assert_eq!(f.h.dispatcher.load_alert(1).await.unwrap(), None);

        f.store.fail_status_appends(false);
        let alert = f
            .tracker
            .observe(&reading(VALIDATOR_A, 0.1, T0 + 60))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(alert.status, ValidatorStatus::NotOk);
        let history = f.store.query_status_history(VALIDATOR_A, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].timestamp, T0 + 60);
    }

    #[tokio::test]
    async fn failed_acknowledgment_record_leaves_alert_open() {
        let f = fixture();
        let alert = f
            .tracker
            .observe(&reading(VALIDATOR_A, 0.2, T0))
            .await
            .unwrap()
            .unwrap();

        f.store.fail_status_appends(true);
        let err = f
            .tracker
            .acknowledge(alert.id, Acknowledger { id: 5, username: None })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Backend(_)));
        let stored = f.h.dispatcher.load_alert(alert.id).await.unwrap().unwrap();
        assert!(!stored.is_acknowledged);

        f.store.fail_status_appends(false);
        let acked = f
            .tracker
            .acknowledge(alert.id, Acknowledger { id: 5, username: None })
            .await
            .unwrap();
        assert!(acked.is_acknowledged);
        let history = f.store.query_status_history(VALIDATOR_A, 10).await.unwrap();
        let acks = history
            .iter()
            .filter(|record| record.status == ValidatorStatus::Acknowledged)
            .count();
        assert_eq!(acks, 1);
    }
}
