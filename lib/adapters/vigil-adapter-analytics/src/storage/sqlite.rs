use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Value;
use rusqlite::{Connection, params, params_from_iter};

use vigil_domain::{
    AggregateRequest, Group, GroupId, IntervalBucket, Sample, StatusRecord, TimeRange,
    ValidatorId, ValidatorMeta, ValidatorStatus,
};
use vigil_ports::TimeSeriesPort;

use super::schema::SCHEMA;
use crate::retry::{RetryPolicy, with_backoff};

/// Validators per `IN (...)` clause.
const MAX_IN_LIST: usize = 500;
const STAKE_UNIT: f64 = 1_000_000_000.0;

/// SQLite-backed time-series store shared by every service.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStorage {
    /// Opens the database with bounded retries and applies the schema.
    pub async fn connect(path: &Path, pool_size: u32, policy: &RetryPolicy) -> Result<Self> {
        let path: PathBuf = path.to_path_buf();
        with_backoff(policy, "sqlite", || {
            let path = path.clone();
            async move {
                tokio::task::spawn_blocking(move || Self::open(&path, pool_size))
                    .await
                    .context("sqlite open task failed")?
            }
        })
        .await
    }

    pub fn open(path: &Path, pool_size: u32) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path)
            .with_init(|conn| conn.busy_timeout(Duration::from_secs(5)));
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .build(manager)
            .with_context(|| format!("failed to open sqlite database {}", path.display()))?;
        let storage = Self { pool };
        storage.migrate()?;
        Ok(storage)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.pool.get().context("failed to check out sqlite connection")?;
        conn.execute_batch(SCHEMA)
            .context("failed to apply sqlite schema")?;
        Ok(())
    }

    async fn with_conn<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().context("failed to check out sqlite connection")?;
            op(&mut conn)
        })
        .await
        .context("sqlite task failed")?
    }
}

/// Day partition label for a unix timestamp.
fn day_of(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|at| at.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "1970-01-01".to_string())
}

fn placeholders(first: usize, count: usize) -> String {
    (first..first + count)
        .map(|n| format!("?{n}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn aggregate_chunk(
    conn: &Connection,
    ids: &[ValidatorId],
    request: &AggregateRequest,
) -> Result<Vec<IntervalBucket>> {
    let range = request.range;
    let mut values = vec![
        Value::Integer(range.from),
        Value::Integer(request.bucket_width),
        Value::Text(day_of(range.from)),
        Value::Text(day_of(range.to)),
        Value::Integer(range.to),
    ];
    let id_list = placeholders(values.len() + 1, ids.len());
    values.extend(ids.iter().map(|id| Value::Text(id.clone())));

    let mut group_filter = String::new();
    if let Some(group_id) = request.group_id {
        values.push(Value::Integer(i64::from(group_id)));
        group_filter = format!("AND group_id = ?{}", values.len());
    }

    let sql = format!(
        "SELECT validator_id,
                ?1 + ((timestamp - ?1) / ?2) * ?2 AS bucket_start,
                group_id,
                AVG(efficiency),
                COUNT(*)
         FROM validator_efficiency
         WHERE day BETWEEN ?3 AND ?4
           AND timestamp >= ?1 AND timestamp < ?5
           AND validator_id IN ({id_list})
           {group_filter}
         GROUP BY validator_id, bucket_start, group_id
         ORDER BY validator_id, bucket_start, group_id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
        Ok(IntervalBucket {
            validator_id: row.get(0)?,
            bucket_start: row.get(1)?,
            group_id: Some(row.get(2)?),
            avg_efficiency: row.get(3)?,
            samples: row.get(4)?,
        })
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to read aggregate rows")
}

fn fill_gaps(request: &AggregateRequest, rows: Vec<IntervalBucket>) -> Vec<IntervalBucket> {
    let mut by_slot: BTreeMap<(ValidatorId, i64), Vec<IntervalBucket>> = BTreeMap::new();
    for bucket in rows {
        by_slot
            .entry((bucket.validator_id.clone(), bucket.bucket_start))
            .or_default()
            .push(bucket);
    }

    let ids: BTreeSet<&ValidatorId> = request.validator_ids.iter().collect();
    let mut out = Vec::new();
    for id in ids {
        for start in request.range.bucket_starts() {
            match by_slot.remove(&(id.clone(), start)) {
                Some(found) => out.extend(found),
                None => out.push(IntervalBucket::empty(id, start)),
            }
        }
    }
    out
}

#[async_trait]
impl TimeSeriesPort for SqliteStorage {
    async fn append(&self, samples: &[Sample]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        let samples = samples.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO validator_efficiency
                        (day, timestamp, validator_id, group_id, efficiency, stake, weight, idx,
                         pubkey_hash, valid_since, valid_until)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                )?;
                for sample in &samples {
                    stmt.execute(params![
                        day_of(sample.timestamp),
                        sample.timestamp,
                        sample.validator_id,
                        sample.group_id,
                        sample.efficiency,
                        sample.stake,
                        sample.weight,
                        sample.index,
                        sample.pubkey_hash,
                        sample.validity.since,
                        sample.validity.until,
                    ])?;
                }
            }
            tx.commit().context("failed to commit samples")?;
            Ok(())
        })
        .await
    }

    async fn append_status_change(&self, record: &StatusRecord) -> Result<()> {
        let record = record.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO validator_status_history (validator_id, group_id, timestamp, status)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.validator_id,
                    record.group_id,
                    record.timestamp,
                    record.status.as_str(),
                ],
            )
            .context("failed to insert status change")?;
            Ok(())
        })
        .await
    }

    async fn query_aggregates(&self, request: &AggregateRequest) -> Result<Vec<IntervalBucket>> {
        if request.validator_ids.is_empty() || request.range.is_empty() {
            return Ok(Vec::new());
        }
        let request = request.clone();
        self.with_conn(move |conn| {
            let mut rows = Vec::new();
            for chunk in request.validator_ids.chunks(MAX_IN_LIST) {
                rows.extend(aggregate_chunk(conn, chunk, &request)?);
            }
            Ok(fill_gaps(&request, rows))
        })
        .await
    }

    async fn query_distinct_validators(&self, range: TimeRange) -> Result<BTreeSet<ValidatorId>> {
        if range.is_empty() {
            return Ok(BTreeSet::new());
        }
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT DISTINCT validator_id FROM validator_efficiency
                 WHERE day BETWEEN ?1 AND ?2 AND timestamp >= ?3 AND timestamp < ?4",
            )?;
            let ids = stmt
                .query_map(
                    params![day_of(range.from), day_of(range.to), range.from, range.to],
                    |row| row.get::<_, String>(0),
                )?
                .collect::<rusqlite::Result<BTreeSet<_>>>()?;
            Ok(ids)
        })
        .await
    }

    async fn query_status_history(
        &self,
        validator_id: &str,
        limit: usize,
    ) -> Result<Vec<StatusRecord>> {
        let validator_id = validator_id.to_string();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT group_id, timestamp, status FROM validator_status_history
                 WHERE validator_id = ?1
                 ORDER BY timestamp DESC, rowid DESC
                 LIMIT ?2",
            )?;
            let raw = stmt
                .query_map(params![validator_id, limit], |row| {
                    Ok((
                        row.get::<_, Option<GroupId>>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            raw.into_iter()
                .map(|(group_id, timestamp, status)| -> Result<StatusRecord> {
                    Ok(StatusRecord {
                        validator_id: validator_id.clone(),
                        group_id,
                        timestamp,
                        status: status.parse::<ValidatorStatus>()?,
                    })
                })
                .collect()
        })
        .await
    }

    async fn query_validator_meta(
        &self,
        range: TimeRange,
        group_id: Option<GroupId>,
    ) -> Result<BTreeMap<ValidatorId, ValidatorMeta>> {
        if range.is_empty() {
            return Ok(BTreeMap::new());
        }
        self.with_conn(move |conn| {
            let mut values = vec![
                Value::Text(day_of(range.from)),
                Value::Text(day_of(range.to)),
                Value::Integer(range.from),
                Value::Integer(range.to),
            ];
            let group_filter = match group_id {
                Some(group_id) => {
                    values.push(Value::Integer(i64::from(group_id)));
                    "AND e.group_id = ?5"
                }
                None => "",
            };
            let sql = format!(
                "SELECT e.validator_id,
                        AVG(e.stake),
                        AVG(e.weight),
                        MAX(e.idx),
                        AVG(e.efficiency),
                        MAX(e.group_id),
                        COALESCE((SELECT v.wallet FROM validators v
                                  WHERE v.validator_id = e.validator_id
                                  ORDER BY v.group_id DESC LIMIT 1), '')
                 FROM validator_efficiency e
                 WHERE e.day BETWEEN ?1 AND ?2
                   AND e.timestamp >= ?3 AND e.timestamp < ?4
                   {group_filter}
                 GROUP BY e.validator_id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
                let stake: f64 = row.get(1)?;
                let weight: f64 = row.get(2)?;
                Ok((
                    row.get::<_, String>(0)?,
                    ValidatorMeta {
                        stake: (stake / STAKE_UNIT) as i64,
                        weight: weight as i64,
                        index: row.get(3)?,
                        avg_efficiency: row.get(4)?,
                        group_id: row.get(5)?,
                        wallet: row.get(6)?,
                    },
                ))
            })?;
            let meta = rows.collect::<rusqlite::Result<BTreeMap<_, _>>>()?;
            Ok(meta)
        })
        .await
    }

    async fn upsert_groups(&self, groups: &[Group]) -> Result<()> {
        if groups.is_empty() {
            return Ok(());
        }
        let groups = groups.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut group_stmt =
                    tx.prepare_cached("INSERT OR REPLACE INTO groups (group_id) VALUES (?1)")?;
                let mut info_stmt = tx.prepare_cached(
                    "INSERT OR REPLACE INTO group_info
                        (group_id, valid_since, valid_until, total_weight)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                let mut member_stmt = tx.prepare_cached(
                    "INSERT OR REPLACE INTO validators
                        (group_id, validator_id, pubkey, weight, idx, stake, max_factor, wallet)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )?;
                for group in &groups {
                    group_stmt.execute(params![group.group_id])?;
                    info_stmt.execute(params![
                        group.group_id,
                        group.info.valid_since,
                        group.info.valid_until,
                        group.info.total_weight,
                    ])?;
                    for member in &group.info.members {
                        member_stmt.execute(params![
                            group.group_id,
                            member.validator_id,
                            member.pubkey,
                            member.weight,
                            member.index,
                            member.stake,
                            member.max_factor,
                            member.wallet,
                        ])?;
                    }
                }
            }
            tx.commit().context("failed to commit groups")?;
            Ok(())
        })
        .await
    }
}
