//! Query shapes shared by the store, the cache-aside service and the API.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::group::GroupId;
use crate::validator::ValidatorId;

/// Every aggregate query is cut into roughly this many buckets.
pub const BUCKETS_PER_RANGE: i64 = 60;

const MINUTE: i64 = 60;

/// Rounds a unix timestamp to the nearest minute, halves rounding up.
///
/// `None` when the rounded value does not fit in an `i64`.
pub fn round_to_minute(ts: i64) -> Option<i64> {
    ts.checked_add(MINUTE / 2)?.div_euclid(MINUTE).checked_mul(MINUTE)
}

fn ceil_div(value: i64, by: i64) -> i64 {
    value / by + i64::from(value % by != 0)
}

/// Half-open `[from, to)` interval in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: i64,
    pub to: i64,
}

impl TimeRange {
    pub fn new(from: i64, to: i64) -> Self {
        Self { from, to }
    }

    pub fn duration(&self) -> i64 {
        self.to.saturating_sub(self.from)
    }

    pub fn is_empty(&self) -> bool {
        self.duration() <= 0
    }

    pub fn contains(&self, ts: i64) -> bool {
        ts >= self.from && ts < self.to
    }

    /// Minute-aligned window used for cache keys and bucket boundaries.
    ///
    /// A window whose rounded end lies after `now` is shifted back so that it
    /// ends one minute before the current minute, keeping its duration.
    ///
    /// `None` when any bound or the duration leaves the `i64` range.
    pub fn canonicalize(self, now: i64) -> Option<Self> {
        let mut from = round_to_minute(self.from)?;
        let mut to = round_to_minute(self.to)?;
        let span = to.checked_sub(from)?;
        if to > now {
            to = round_to_minute(now)?.checked_sub(MINUTE)?;
            from = to.checked_sub(span)?;
        }
        Some(Self { from, to })
    }

    /// `ceil(duration / 60)`, never below one second.
    pub fn bucket_width(&self) -> i64 {
        ceil_div(self.duration().max(1), BUCKETS_PER_RANGE).max(1)
    }

    pub fn bucket_count(&self) -> i64 {
        if self.is_empty() {
            return 0;
        }
        ceil_div(self.duration(), self.bucket_width())
    }

    pub fn bucket_starts(&self) -> impl Iterator<Item = i64> + use<> {
        let from = self.from;
        let width = self.bucket_width();
        (0..self.bucket_count()).map(move |slot| from + slot * width)
    }
}

/// Bucketed average query against the time-series store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateRequest {
    pub validator_ids: Vec<ValidatorId>,
    pub range: TimeRange,
    pub group_id: Option<GroupId>,
    pub bucket_width: i64,
}

impl AggregateRequest {
    pub fn new(
        validator_ids: Vec<ValidatorId>,
        range: TimeRange,
        group_id: Option<GroupId>,
    ) -> Self {
        Self {
            validator_ids,
            bucket_width: range.bucket_width(),
            range,
            group_id,
        }
    }
}

/// Average efficiency of one validator inside one bucket.
///
/// Buckets without samples are still emitted, with `samples == 0`, no group
/// and an average of zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalBucket {
    pub validator_id: ValidatorId,
    pub bucket_start: i64,
    pub avg_efficiency: f64,
    pub group_id: Option<GroupId>,
    pub samples: u32,
}

impl IntervalBucket {
    pub fn empty(validator_id: &str, bucket_start: i64) -> Self {
        Self {
            validator_id: validator_id.to_string(),
            bucket_start,
            avg_efficiency: 0.0,
            group_id: None,
            samples: 0,
        }
    }

    pub fn is_filled(&self) -> bool {
        self.samples == 0
    }
}

/// Collapses per-group buckets into one value per bucket start, weighting
/// each group's average by its sample count.
pub fn bucket_series<'a>(
    buckets: impl IntoIterator<Item = &'a IntervalBucket>,
) -> BTreeMap<i64, f64> {
    let mut sums: BTreeMap<i64, (f64, u64)> = BTreeMap::new();
    for bucket in buckets {
        let entry = sums.entry(bucket.bucket_start).or_insert((0.0, 0));
        entry.0 += bucket.avg_efficiency * f64::from(bucket.samples);
        entry.1 += u64::from(bucket.samples);
    }
    sums.into_iter()
        .map(|(start, (sum, count))| {
            let value = if count == 0 { 0.0 } else { sum / count as f64 };
            (start, value)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub bucket_start: i64,
    pub value: f64,
    pub group_id: Option<GroupId>,
}

impl From<&IntervalBucket> for ChartPoint {
    fn from(bucket: &IntervalBucket) -> Self {
        Self {
            bucket_start: bucket.bucket_start,
            value: bucket.avg_efficiency,
            group_id: bucket.group_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSeries {
    pub validator_id: ValidatorId,
    pub points: Vec<ChartPoint>,
}

/// validator -> bucket start -> average efficiency
pub type StatusGrid = BTreeMap<ValidatorId, BTreeMap<i64, f64>>;

/// Descriptive aggregates for one validator over a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorMeta {
    /// Average stake in whole units, truncated.
    pub stake: i64,
    pub weight: i64,
    pub index: u16,
    pub wallet: String,
    pub avg_efficiency: f64,
    pub group_id: GroupId,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatusOverview {
    pub statuses: StatusGrid,
    pub meta: BTreeMap<ValidatorId, ValidatorMeta>,
}
