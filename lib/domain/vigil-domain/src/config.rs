//! Service configuration loaded from YAML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::alert::RecipientId;
use crate::group::GroupId;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VigilConfig {
    pub storage: StorageConfig,
    pub cache: CacheConfig,
    pub tracking: TrackingConfig,
    pub ingestion: IngestionConfig,
    pub notifications: NotificationsConfig,
    pub server: ServerConfig,
}

impl VigilConfig {
    /// Reads the file at `path`, falling back to defaults when it is absent.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_yaml(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.tracking.efficiency_threshold.is_finite(),
            "tracking.efficiency_threshold must be a finite number"
        );
        ensure!(
            self.ingestion.group_concurrency > 0,
            "ingestion.group_concurrency must be at least 1"
        );
        ensure!(
            self.ingestion.interval_secs > 0,
            "ingestion.interval_secs must be positive"
        );
        ensure!(
            self.storage.connect.attempts > 0,
            "storage.connect.attempts must be at least 1"
        );
        ensure!(
            self.notifications.rate_limit_per_minute > 0,
            "notifications.rate_limit_per_minute must be at least 1"
        );
        if let Some(backfill) = &self.ingestion.backfill {
            ensure!(backfill.to > backfill.from, "ingestion.backfill range is empty");
            ensure!(backfill.step_secs > 0, "ingestion.backfill.step_secs must be positive");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub sqlite_path: PathBuf,
    pub pool_size: u32,
    pub connect: RetryConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("vigil.sqlite"),
            pool_size: 8,
            connect: RetryConfig::default(),
        }
    }
}

/// Bounded exponential backoff for dependency connects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub purge_interval_secs: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3_600,
            purge_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub efficiency_threshold: f64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            efficiency_threshold: 0.9,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    pub groups_url: String,
    pub scoreboard_url: String,
    pub interval_secs: u64,
    pub window_secs: i64,
    pub group_concurrency: usize,
    pub request_timeout_secs: u64,
    /// Restricts ingestion to a single group when set.
    pub group_id: Option<GroupId>,
    pub backfill: Option<BackfillConfig>,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            groups_url: "http://localhost:8081/cycles".to_string(),
            scoreboard_url: "http://localhost:8081/scoreboard".to_string(),
            interval_secs: 60,
            window_secs: 60,
            group_concurrency: 4,
            request_timeout_secs: 10,
            group_id: None,
            backfill: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackfillConfig {
    pub group_id: GroupId,
    pub from: i64,
    pub to: i64,
    #[serde(default = "default_backfill_step")]
    pub step_secs: i64,
}

fn default_backfill_step() -> i64 {
    600
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub telegram_token: Option<String>,
    pub telegram_api_url: String,
    pub rate_limit_per_minute: i64,
    /// Recipients for alerts on validators nobody subscribed to.
    pub default_recipients: Vec<RecipientId>,
    pub details_base_url: Option<String>,
    pub idle_log_secs: u64,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            telegram_token: None,
            telegram_api_url: "https://api.telegram.org".to_string(),
            rate_limit_per_minute: 20,
            default_recipients: Vec::new(),
            details_base_url: None,
            idle_log_secs: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
            shutdown_grace_secs: 5,
        }
    }
}
