//! JSON payload helpers over the cache port.
//!
//! Reads that fail or do not decode count as misses; writes that fail are
//! logged and dropped.

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use vigil_ports::CachePort;

pub(crate) async fn read<T: DeserializeOwned>(cache: &dyn CachePort, key: &str) -> Option<T> {
    let payload = match cache.get(key).await {
        Ok(Some(payload)) => payload,
        Ok(None) => return None,
        Err(err) => {
            tracing::warn!(key, error = %err, "cache read failed");
            return None;
        }
    };
    match serde_json::from_slice(&payload) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(key, error = %err, "discarding undecodable cache entry");
            None
        }
    }
}

pub(crate) async fn write<T: Serialize + ?Sized>(
    cache: &dyn CachePort,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) {
    let payload = match serde_json::to_vec(value) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::warn!(key, error = %err, "failed to encode cache entry");
            return;
        }
    };
    if let Err(err) = cache.set(key, payload, ttl).await {
        tracing::warn!(key, error = %err, "cache write failed");
    }
}
