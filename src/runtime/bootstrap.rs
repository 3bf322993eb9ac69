use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;

use vigil_adapter_analytics::{HttpScoreboardSource, MemoryCache, RetryPolicy, SqliteStorage};
use vigil_adapter_notification::messenger_from_config;
use vigil_application::{AggregationQueryService, AlertDispatcher, Ingestor, StatusTracker};
use vigil_domain::VigilConfig;
use vigil_ports::{Clock, MessengerPort, ScoreboardPort, TimeSeriesPort};

use crate::api::AppState;

pub const CONFIG_PATH_ENV: &str = "VIGIL_CONFIG_PATH";
pub const TELEGRAM_TOKEN_ENV: &str = "VIGIL_TELEGRAM_TOKEN";
pub const SQLITE_PATH_ENV: &str = "VIGIL_SQLITE_PATH";

pub fn config_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }

    if let Ok(home) = env::var("HOME") {
        return Path::new(&home).join(".vigil").join("config.yaml");
    }

    PathBuf::from("vigil-config.yaml")
}

/// Applies environment overrides on top of the file configuration.
pub fn apply_overrides(config: &mut VigilConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(token) = lookup(TELEGRAM_TOKEN_ENV).filter(|token| !token.is_empty()) {
        config.notifications.telegram_token = Some(token);
    }
    if let Some(path) = lookup(SQLITE_PATH_ENV).filter(|path| !path.is_empty()) {
        config.storage.sqlite_path = PathBuf::from(path);
    }
}

pub fn load_config() -> Result<VigilConfig> {
    let path = config_path();
    let mut config = VigilConfig::load_from_path(&path)?;
    apply_overrides(&mut config, |key| env::var(key).ok());
    config.validate()?;
    tracing::info!(path = %path.display(), "configuration loaded");
    Ok(config)
}

/// Long-lived handles shared by every worker and the API.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn TimeSeriesPort>,
    pub cache: Arc<MemoryCache>,
    pub dispatcher: Arc<AlertDispatcher>,
    pub tracker: Arc<StatusTracker>,
    pub query: Arc<AggregationQueryService>,
    pub ingestor: Arc<Ingestor>,
    pub clock: Arc<dyn Clock>,
}

impl Services {
    /// Connects the store and builds the production adapters.
    pub async fn connect(config: &VigilConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let policy = RetryPolicy::from(&config.storage.connect);
        let store = SqliteStorage::connect(
            &config.storage.sqlite_path,
            config.storage.pool_size,
            &policy,
        )
        .await?;
        let source = HttpScoreboardSource::from_config(&config.ingestion)?;
        let messenger = messenger_from_config(&config.notifications)?;
        Ok(Self::assemble(
            config,
            clock,
            Arc::new(store),
            Arc::new(source),
            messenger,
        ))
    }

    pub fn assemble(
        config: &VigilConfig,
        clock: Arc<dyn Clock>,
        store: Arc<dyn TimeSeriesPort>,
        source: Arc<dyn ScoreboardPort>,
        messenger: Arc<dyn MessengerPort>,
    ) -> Self {
        let cache = Arc::new(MemoryCache::new(clock.clone()));
        let dispatcher = Arc::new(AlertDispatcher::new(
            cache.clone(),
            messenger,
            clock.clone(),
            config.notifications.clone(),
        ));
        let tracker = Arc::new(StatusTracker::new(
            store.clone(),
            cache.clone(),
            dispatcher.clone(),
            clock.clone(),
            &config.tracking,
        ));
        let query = Arc::new(AggregationQueryService::new(
            store.clone(),
            cache.clone(),
            clock.clone(),
            &config.cache,
        ));
        let ingestor = Arc::new(Ingestor::new(
            source,
            store.clone(),
            tracker.clone(),
            clock.clone(),
            config.ingestion.clone(),
        ));
        Self {
            store,
            cache,
            dispatcher,
            tracker,
            query,
            ingestor,
            clock,
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            query: self.query.clone(),
            tracker: self.tracker.clone(),
            dispatcher: self.dispatcher.clone(),
            clock: self.clock.clone(),
        }
    }
}
