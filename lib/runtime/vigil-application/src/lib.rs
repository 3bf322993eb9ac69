//! Monitoring services: cache-aside queries, status tracking, alert fan-out
//! and ingestion.

mod cached;
pub mod dispatch;
pub mod error;
pub mod ingest;
pub mod keys;
pub mod query;
pub mod shutdown;
pub mod status;

pub use dispatch::{AlertDispatcher, DeliveryReport, format_alert_message};
pub use error::{ServiceError, ServiceResult};
pub use ingest::{IngestReport, Ingestor};
pub use query::AggregationQueryService;
pub use shutdown::{Shutdown, ShutdownTrigger};
pub use status::{Observation, StatusTracker};

#[cfg(test)]
pub(crate) mod testing;
