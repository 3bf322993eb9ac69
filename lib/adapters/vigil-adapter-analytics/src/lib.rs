//! Storage, cache and source adapters for the monitoring pipeline.

pub mod cache;
pub mod retry;
pub mod scoreboard;
pub mod storage;

pub use cache::MemoryCache;
pub use retry::RetryPolicy;
pub use scoreboard::HttpScoreboardSource;
pub use storage::SqliteStorage;
