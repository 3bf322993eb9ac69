use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use vigil_domain::{BackfillConfig, GroupId, IngestionConfig, Sample, TimeRange};
use vigil_ports::{Clock, ScoreboardPort, TimeSeriesPort};

use crate::shutdown::Shutdown;
use crate::status::{Observation, StatusTracker};

/// Totals for one ingestion pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub groups: usize,
    pub failed_groups: usize,
    pub samples: usize,
    pub alerts: usize,
}

/// Periodic scoreboard pull feeding the store and the status tracker.
#[derive(Clone)]
pub struct Ingestor {
    source: Arc<dyn ScoreboardPort>,
    store: Arc<dyn TimeSeriesPort>,
    tracker: Arc<StatusTracker>,
    clock: Arc<dyn Clock>,
    config: IngestionConfig,
}

impl Ingestor {
    pub fn new(
        source: Arc<dyn ScoreboardPort>,
        store: Arc<dyn TimeSeriesPort>,
        tracker: Arc<StatusTracker>,
        clock: Arc<dyn Clock>,
        config: IngestionConfig,
    ) -> Self {
        Self {
            source,
            store,
            tracker,
            clock,
            config,
        }
    }

    /// Runs passes every interval until shutdown, after an optional backfill.
    pub async fn run(self: Arc<Self>, shutdown: Shutdown) {
        if let Some(backfill) = self.config.backfill.clone() {
            match self.backfill(&backfill, &shutdown).await {
                Ok(samples) => {
                    tracing::info!(group_id = backfill.group_id, samples, "backfill finished")
                }
                Err(err) => {
                    tracing::error!(group_id = backfill.group_id, error = %err, "backfill failed")
                }
            }
        }

        let every = Duration::from_secs(self.config.interval_secs.max(1));
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {}
            }
            match self.run_once(&shutdown).await {
                Ok(report) => tracing::info!(
                    groups = report.groups,
                    failed_groups = report.failed_groups,
                    samples = report.samples,
                    alerts = report.alerts,
                    "ingestion pass finished"
                ),
                Err(err) => tracing::error!(error = %err, "ingestion pass failed"),
            }
        }
        tracing::info!("ingestor stopped");
    }

    /// One pass over every active group.
    pub async fn run_once(&self, shutdown: &Shutdown) -> Result<IngestReport> {
        let groups = self
            .source
            .fetch_groups(self.config.group_id)
            .await
            .context("failed to fetch groups")?;
        if let Err(err) = self.store.upsert_groups(&groups).await {
            tracing::warn!(error = %err, "failed to store group metadata");
        }

        let now = self.clock.unix_now();
        let semaphore = Arc::new(Semaphore::new(self.config.group_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for group in &groups {
            if shutdown.is_triggered() {
                tracing::info!("shutdown requested, not scheduling further groups");
                break;
            }
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .context("group worker pool closed")?;
            let this = self.clone();
            let group_id = group.group_id;
            tasks.spawn(async move {
                let _permit = permit;
                (group_id, this.ingest_group(group_id, now).await)
            });
        }

        let mut report = IngestReport::default();
        while let Some(joined) = tasks.join_next().await {
            report.groups += 1;
            match joined {
                Ok((_, Ok((samples, alerts)))) => {
                    report.samples += samples;
                    report.alerts += alerts;
                }
                Ok((group_id, Err(err))) => {
                    report.failed_groups += 1;
                    tracing::warn!(group_id, error = %err, "group ingestion failed");
                }
                Err(err) => {
                    report.failed_groups += 1;
                    tracing::error!(error = %err, "group worker panicked");
                }
            }
        }
        Ok(report)
    }

    /// Fetch, append, then evaluate one group. Returns samples and alerts.
    async fn ingest_group(&self, group_id: GroupId, now: i64) -> Result<(usize, usize)> {
        let window = TimeRange::new(now - self.config.window_secs, now);
        let rows = self
            .source
            .fetch_scoreboard(group_id, Some(window))
            .await
            .with_context(|| format!("failed to fetch scoreboard of group {group_id}"))?;
        let samples: Vec<Sample> = rows
            .iter()
            .map(|row| Sample::from_scoreboard(row, now))
            .collect();
        self.store
            .append(&samples)
            .await
            .with_context(|| format!("failed to store samples of group {group_id}"))?;

        let observations = rows
            .iter()
            .map(|row| Observation::from_row(row, now))
            .collect();
        let alerts = self.tracker.observe_batch(observations).await;
        tracing::debug!(group_id, samples = samples.len(), alerts = alerts.len(), "group ingested");
        Ok((samples.len(), alerts.len()))
    }

    /// Re-ingests a historical range window by window, without status
    /// evaluation. Returns the number of samples appended.
    pub async fn backfill(&self, backfill: &BackfillConfig, shutdown: &Shutdown) -> Result<usize> {
        let step = backfill.step_secs.max(1);
        let mut appended = 0;
        let mut from = backfill.from;
        while from < backfill.to {
            if shutdown.is_triggered() {
                tracing::info!(group_id = backfill.group_id, from, "backfill interrupted");
                break;
            }
            let to = (from + step).min(backfill.to);
            let rows = self
                .source
                .fetch_scoreboard(backfill.group_id, Some(TimeRange::new(from, to)))
                .await
                .with_context(|| format!("failed to fetch backfill window [{from}, {to})"))?;
            let samples: Vec<Sample> = rows
                .iter()
                .map(|row| Sample::from_scoreboard(row, to))
                .collect();
            self.store.append(&samples).await?;
            appended += samples.len();
            from = to;
        }
        Ok(appended)
    }
}
