//! Store client interface
//!
//! The engine only ever talks to the time-series store through this trait,
//! with a real HTTP implementation in [`crate::influxdb_client`] and an
//! in-memory one in [`crate::mock_client`].

use async_trait::async_trait;
use influxdb_core::{encoder::PointBatch, error::InfluxResult};
use std::sync::Arc;

/// Statistics for store client operations
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub total_writes: u64,
    pub failed_writes: u64,
    pub total_points_written: u64,
    pub databases_created: u64,
}

/// Trait defining the interface for store clients
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Write a batch of encoded points. Any error fails the whole batch.
    async fn write(&self, batch: &PointBatch) -> InfluxResult<()>;

    /// Create the target database if it does not exist yet. Idempotent.
    async fn create_database_if_absent(&self) -> InfluxResult<()>;

    /// Release the connection on shutdown
    async fn close(&self) -> InfluxResult<()>;

    /// Get client statistics
    fn get_stats(&self) -> StoreStats;
}

/// Type alias for shared client trait object
pub type BoxedStoreClient = Arc<dyn StoreClient>;
