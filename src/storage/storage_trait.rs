//! Storage Trait
//!
//! This module defines the `ExchangeStore` trait, the interface the capture
//! path and the query API use to persist and read captured exchanges.
//!
//! Implementors of this trait are responsible for:
//! - Creating their schema idempotently
//! - Appending immutable exchange rows and assigning their ids
//! - Serving newest-first paged and searched history
//! - Computing summary statistics
//! - Deleting all history
//!
//! Every operation acquires its own connection from the backend's pool and
//! releases it on every exit path.

use async_trait::async_trait;
use log::{debug, error};

use crate::error_handling::types::StorageError;
use crate::storage::types::{Exchange, ExchangeQuery, StatsSnapshot};

#[async_trait]
pub trait ExchangeStore: Send + Sync {
    /// Creates the `requests` table if absent. Safe to call on every startup.
    async fn init(&self) -> Result<(), StorageError>;

    /// Appends `exchange` and returns the id assigned to it.
    async fn insert(&self, exchange: &Exchange) -> Result<i64, StorageError>;

    /// Newest first (descending id), optionally filtered by a case-insensitive
    /// substring of the URL, method, request body or response body.
    async fn query(&self, query: &ExchangeQuery) -> Result<Vec<Exchange>, StorageError>;

    async fn stats(&self) -> Result<StatsSnapshot, StorageError>;

    /// Deletes every row. The id sequence is left to the backend.
    async fn clear_all(&self) -> Result<(), StorageError>;

    /// Capture-path variant of [`ExchangeStore::insert`]: failures are logged
    /// with the exchange's method and URL and never returned.
    async fn save(&self, exchange: &Exchange) -> Option<i64> {
        match self.insert(exchange).await {
            Ok(id) => {
                debug!("Saved exchange {} for {} {}", id, exchange.method, exchange.url);
                Some(id)
            }
            Err(e) => {
                error!(
                    "DB SAVE ERROR: {} | Method: {} | URL: {}",
                    e, exchange.method, exchange.url
                );
                None
            }
        }
    }
}
