//! Validator efficiency monitor: ingestion, cached read API and alerting.

pub mod api;
pub mod runtime;
