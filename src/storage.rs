//! Storage subsystem
//!
//! Persistence of captured exchanges and the statistics derived from them,
//! over either an embedded SQLite file or a MySQL server.
//!
//! Components:
//! - `storage_trait`: the `ExchangeStore` trait used by the capture path and the query API.
//! - `types`: the exchange record, stats snapshot and query parameters.
//! - `dialect`: per-backend SQL fragments (placeholders, schema, timestamp handling).
//! - `database_storage`: SeaORM connection-pool implementation for both backends.
//! - `stats`: label parsing and aggregation for `StatsSnapshot`.

pub mod database_storage;
pub mod dialect;
pub mod stats;
pub mod storage_trait;
pub mod types;

pub use database_storage::DatabaseStorage;
pub use storage_trait::ExchangeStore;
pub use types::{Exchange, ExchangeQuery, HttpMessage, OrderedMap, StatsSnapshot};
