//! On-device persistence
//!
//! Handles:
//! - Durable report storage (the source of truth while disconnected)
//! - Rate-limit history and ban state

pub mod sqlite;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::model::Report;
use crate::rate_limit::RateLimitState;

pub use sqlite::SqliteStore;

/// Durable per-device report storage.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Persist a report, replacing any earlier copy with the same identifier.
    async fn put(&self, report: &Report) -> Result<(), StorageError>;

    /// All persisted reports, in no particular order.
    async fn get_all(&self) -> Result<Vec<Report>, StorageError>;

    async fn get(&self, id: &str) -> Result<Option<Report>, StorageError>;
}

/// Persistence for the per-device submission throttle.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn load_rate_limit(&self) -> Result<RateLimitState, StorageError>;

    async fn save_rate_limit(&self, state: &RateLimitState) -> Result<(), StorageError>;
}
