use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;

use vigil_ports::{CachePort, Clock, SystemClock};

#[derive(Debug, Clone)]
enum Value {
    Bytes(Vec<u8>),
    Counter(i64),
    Set(BTreeSet<String>),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Bytes(_) => "bytes",
            Value::Counter(_) => "counter",
            Value::Set(_) => "set",
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    /// Unix milliseconds, `None` for no expiry.
    expires_at: Option<i64>,
}

/// In-process cache with per-key expiry, counters and sets.
///
/// Expired entries are dropped lazily on access and by [`MemoryCache::purge_expired`].
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn now_ms(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    fn deadline(&self, ttl: Duration) -> i64 {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        self.now_ms().saturating_add(ttl_ms)
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow!("cache lock poisoned"))
    }

    /// Live entry for `key`, evicting it first if it has expired.
    fn live<'a>(
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
        now_ms: i64,
    ) -> Option<&'a mut Entry> {
        let expired = entries
            .get(key)
            .and_then(|entry| entry.expires_at)
            .is_some_and(|at| at <= now_ms);
        if expired {
            entries.remove(key);
        }
        entries.get_mut(key)
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let now_ms = self.now_ms();
        let mut entries = self.lock()?;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at.is_none_or(|at| at > now_ms));
        Ok(before - entries.len())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn wrong_type(key: &str, found: &Value, wanted: &str) -> anyhow::Error {
    anyhow!("cache key {key} holds a {} value, not a {wanted}", found.kind())
}

#[async_trait]
impl CachePort for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now_ms = self.now_ms();
        let mut entries = self.lock()?;
        match Self::live(&mut entries, key, now_ms) {
            None => Ok(None),
            Some(Entry {
                value: Value::Bytes(bytes),
                ..
            }) => Ok(Some(bytes.clone())),
            Some(Entry {
                value: Value::Counter(n),
                ..
            }) => Ok(Some(n.to_string().into_bytes())),
            Some(entry) => Err(wrong_type(key, &entry.value, "bytes")),
        }
    }

    async fn set(&self, key: &str, payload: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|ttl| self.deadline(ttl));
        self.lock()?.insert(
            key.to_string(),
            Entry {
                value: Value::Bytes(payload),
                expires_at,
            },
        );
        Ok(())
    }

    async fn increment(&self, key: &str) -> Result<i64> {
        let now_ms = self.now_ms();
        let mut entries = self.lock()?;
        match Self::live(&mut entries, key, now_ms) {
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Counter(1),
                        expires_at: None,
                    },
                );
                Ok(1)
            }
            Some(entry) => match &mut entry.value {
                Value::Counter(n) => {
                    *n += 1;
                    Ok(*n)
                }
                Value::Bytes(bytes) => {
                    let current: i64 = std::str::from_utf8(bytes)
                        .ok()
                        .and_then(|raw| raw.trim().parse().ok())
                        .ok_or_else(|| anyhow!("cache key {key} is not an integer"))?;
                    entry.value = Value::Counter(current + 1);
                    Ok(current + 1)
                }
                other => Err(wrong_type(key, other, "counter")),
            },
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now_ms = self.now_ms();
        let deadline = self.deadline(ttl);
        let mut entries = self.lock()?;
        Ok(match Self::live(&mut entries, key, now_ms) {
            Some(entry) => {
                entry.expires_at = Some(deadline);
                true
            }
            None => false,
        })
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool> {
        let now_ms = self.now_ms();
        let mut entries = self.lock()?;
        if Self::live(&mut entries, key, now_ms).is_none() {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Set(BTreeSet::new()),
                    expires_at: None,
                },
            );
        }
        match entries.get_mut(key) {
            Some(Entry {
                value: Value::Set(members),
                ..
            }) => Ok(members.insert(member.to_string())),
            Some(entry) => Err(wrong_type(key, &entry.value, "set")),
            None => bail!("cache key {key} vanished during insert"),
        }
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool> {
        let now_ms = self.now_ms();
        let mut entries = self.lock()?;
        let (removed, now_empty) = match Self::live(&mut entries, key, now_ms) {
            None => return Ok(false),
            Some(Entry {
                value: Value::Set(members),
                ..
            }) => (members.remove(member), members.is_empty()),
            Some(entry) => return Err(wrong_type(key, &entry.value, "set")),
        };
        if now_empty {
            entries.remove(key);
        }
        Ok(removed)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let now_ms = self.now_ms();
        let mut entries = self.lock()?;
        match Self::live(&mut entries, key, now_ms) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: Value::Set(members),
                ..
            }) => Ok(members.iter().cloned().collect()),
            Some(entry) => Err(wrong_type(key, &entry.value, "set")),
        }
    }

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool> {
        let now_ms = self.now_ms();
        let mut entries = self.lock()?;
        match Self::live(&mut entries, key, now_ms) {
            None => Ok(false),
            Some(Entry {
                value: Value::Set(members),
                ..
            }) => Ok(members.contains(member)),
            Some(entry) => Err(wrong_type(key, &entry.value, "set")),
        }
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let now_ms = self.now_ms();
        let entries = self.lock()?;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(key, entry)| {
                key.starts_with(prefix) && entry.expires_at.is_none_or(|at| at > now_ms)
            })
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
