use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tokio::time::sleep;

use vigil_domain::RetryConfig;

/// Fixed attempt count with a doubling, capped delay between attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delays slept after each failed attempt except the last.
    pub fn delays(&self) -> Vec<Duration> {
        let mut delays = Vec::new();
        let mut backoff = self.initial_backoff;
        for _ in 1..self.attempts {
            delays.push(backoff);
            backoff = (backoff * 2).min(self.max_backoff);
        }
        delays
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            attempts: config.attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

/// Runs `op` until it succeeds or the policy is exhausted.
///
/// Only meant for establishing connections; query failures on an open
/// connection go straight back to the caller.
pub async fn with_backoff<T, F, Fut>(policy: &RetryPolicy, dependency: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delays = policy.delays().into_iter();
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => {
                tracing::info!(dependency, attempt, "connected");
                return Ok(value);
            }
            Err(err) => match delays.next() {
                Some(delay) => {
                    tracing::warn!(
                        dependency,
                        attempt,
                        attempts = policy.attempts,
                        error = %err,
                        "connect failed, retrying in {:?}",
                        delay
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                None => {
                    return Err(err.context(format!(
                        "could not connect to {dependency} after {attempt} attempts"
                    )));
                }
            },
        }
    }
}
