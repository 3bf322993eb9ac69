use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use vigil_domain::{
    AggregateRequest, CacheConfig, ChartPoint, ChartSeries, GroupId, IntervalBucket,
    StatusGrid, StatusOverview, StatusRecord, TimeRange, ValidatorId, ValidatorMeta,
    bucket_series,
};
use vigil_ports::{CachePort, Clock, TimeSeriesPort};

use crate::cached;
use crate::error::{ServiceError, ServiceResult};
use crate::keys;

pub const MAX_HISTORY_LIMIT: usize = 1_000;

/// Cache-aside read path over the time-series store.
pub struct AggregationQueryService {
    store: Arc<dyn TimeSeriesPort>,
    cache: Arc<dyn CachePort>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl AggregationQueryService {
    pub fn new(
        store: Arc<dyn TimeSeriesPort>,
        cache: Arc<dyn CachePort>,
        clock: Arc<dyn Clock>,
        config: &CacheConfig,
    ) -> Self {
        Self {
            store,
            cache,
            clock,
            ttl: config.ttl(),
        }
    }

    /// Minute-aligned window that never reaches into the current minute.
    pub fn resolve_window(&self, range: TimeRange) -> ServiceResult<TimeRange> {
        let window = range.canonicalize(self.clock.unix_now()).ok_or_else(|| {
            ServiceError::invalid(format!(
                "time range [{}, {}) is out of bounds",
                range.from, range.to
            ))
        })?;
        if window.is_empty() {
            return Err(ServiceError::invalid(format!(
                "empty time range [{}, {})",
                range.from, range.to
            )));
        }
        Ok(window)
    }

    pub async fn chart_series(
        &self,
        validator_ids: &[ValidatorId],
        range: TimeRange,
    ) -> ServiceResult<Vec<ChartSeries>> {
        if validator_ids.is_empty() {
            return Err(ServiceError::invalid("at least one validator is required"));
        }
        let window = self.resolve_window(range)?;
        let mut series = Vec::with_capacity(validator_ids.len());
        for validator_id in validator_ids {
            let buckets = self.chart_buckets(validator_id, window).await?;
            series.push(ChartSeries {
                validator_id: validator_id.clone(),
                points: buckets.iter().map(ChartPoint::from).collect(),
            });
        }
        Ok(series)
    }

    async fn chart_buckets(
        &self,
        validator_id: &str,
        window: TimeRange,
    ) -> ServiceResult<Vec<IntervalBucket>> {
        let key = keys::chart(validator_id, window);
        if let Some(buckets) = cached::read(self.cache.as_ref(), &key).await {
            return Ok(buckets);
        }
        let request = AggregateRequest::new(vec![validator_id.to_string()], window, None);
        let buckets = self.store.query_aggregates(&request).await?;
        cached::write(self.cache.as_ref(), &key, &buckets, Some(self.ttl)).await;
        Ok(buckets)
    }

    /// Validators with at least one sample in the window.
    pub async fn candidate_validators(&self, range: TimeRange) -> ServiceResult<Vec<ValidatorId>> {
        let window = self.resolve_window(range)?;
        self.candidates(window).await
    }

    async fn candidates(&self, window: TimeRange) -> ServiceResult<Vec<ValidatorId>> {
        let key = keys::validator_list(window);
        if let Some(ids) = cached::read(self.cache.as_ref(), &key).await {
            return Ok(ids);
        }
        let ids: Vec<ValidatorId> = self
            .store
            .query_distinct_validators(window)
            .await?
            .into_iter()
            .collect();
        cached::write(self.cache.as_ref(), &key, &ids, Some(self.ttl)).await;
        Ok(ids)
    }

    pub async fn status_grid(
        &self,
        range: TimeRange,
        group_id: Option<GroupId>,
    ) -> ServiceResult<StatusGrid> {
        let window = self.resolve_window(range)?;
        self.grid(window, group_id).await
    }

    async fn grid(
        &self,
        window: TimeRange,
        group_id: Option<GroupId>,
    ) -> ServiceResult<StatusGrid> {
        let candidates = self.candidates(window).await?;
        let mut grid = StatusGrid::new();
        let mut misses = Vec::new();
        for validator_id in candidates {
            let key = keys::grid(&validator_id, window, group_id);
            match cached::read::<BTreeMap<i64, f64>>(self.cache.as_ref(), &key).await {
                Some(series) => {
                    grid.insert(validator_id, series);
                }
                None => misses.push(validator_id),
            }
        }
        if misses.is_empty() {
            return Ok(grid);
        }

        tracing::debug!(
            hits = grid.len(),
            misses = misses.len(),
            "status grid cache reconciliation"
        );
        let request = AggregateRequest::new(misses.clone(), window, group_id);
        let buckets = self.store.query_aggregates(&request).await?;
        let mut per_validator: BTreeMap<&str, Vec<&IntervalBucket>> = BTreeMap::new();
        for bucket in &buckets {
            per_validator
                .entry(bucket.validator_id.as_str())
                .or_default()
                .push(bucket);
        }
        for validator_id in misses {
            let series = bucket_series(
                per_validator
                    .get(validator_id.as_str())
                    .into_iter()
                    .flatten()
                    .copied(),
            );
            let key = keys::grid(&validator_id, window, group_id);
            cached::write(self.cache.as_ref(), &key, &series, Some(self.ttl)).await;
            grid.insert(validator_id, series);
        }
        Ok(grid)
    }

    pub async fn validator_meta(
        &self,
        range: TimeRange,
        group_id: Option<GroupId>,
    ) -> ServiceResult<BTreeMap<ValidatorId, ValidatorMeta>> {
        let window = self.resolve_window(range)?;
        self.meta(window, group_id).await
    }

    async fn meta(
        &self,
        window: TimeRange,
        group_id: Option<GroupId>,
    ) -> ServiceResult<BTreeMap<ValidatorId, ValidatorMeta>> {
        let key = keys::meta_list(window, group_id);
        if let Some(meta) = cached::read(self.cache.as_ref(), &key).await {
            return Ok(meta);
        }
        let meta = self.store.query_validator_meta(window, group_id).await?;
        cached::write(self.cache.as_ref(), &key, &meta, Some(self.ttl)).await;
        Ok(meta)
    }

    /// Status grid and metadata over the same window.
    pub async fn status_overview(
        &self,
        range: TimeRange,
        group_id: Option<GroupId>,
    ) -> ServiceResult<StatusOverview> {
        let window = self.resolve_window(range)?;
        let statuses = self.grid(window, group_id).await?;
        let meta = self.meta(window, group_id).await?;
        Ok(StatusOverview { statuses, meta })
    }

    /// Newest `limit` status records of a validator.
    pub async fn status_history(
        &self,
        validator_id: &str,
        limit: usize,
    ) -> ServiceResult<Vec<StatusRecord>> {
        if validator_id.is_empty() {
            return Err(ServiceError::invalid("validator id is required"));
        }
        if limit == 0 || limit > MAX_HISTORY_LIMIT {
            return Err(ServiceError::invalid(format!(
                "limit must be between 1 and {MAX_HISTORY_LIMIT}"
            )));
        }
        let key = keys::status_history(validator_id, limit);
        if let Some(records) = cached::read(self.cache.as_ref(), &key).await {
            return Ok(records);
        }
        let records = self.store.query_status_history(validator_id, limit).await?;
        cached::write(self.cache.as_ref(), &key, &records, Some(self.ttl)).await;
        Ok(records)
    }
}
