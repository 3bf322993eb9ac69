//! Time-series persistence.

mod schema;
pub mod sqlite;

pub use sqlite::SqliteStorage;
