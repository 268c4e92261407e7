//! Mock store client for unit testing
//!
//! This client keeps every written batch in memory so tests can assert on
//! exactly what the engine handed to the store, and can be switched into
//! failure modes to exercise the fail path.

use async_trait::async_trait;
use influxdb_core::{
    encoder::{EncodedPoint, PointBatch},
    error::{InfluxError, InfluxResult},
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

use crate::store::{StoreClient, StoreStats};

/// Simple in-memory storage for testing
#[derive(Debug, Default)]
struct MockStorage {
    /// Batches in the order they were written
    batches: Vec<PointBatch>,
    /// Track operations for testing
    operations: Vec<String>,
}

/// Mock store client for unit testing
#[derive(Debug, Default)]
pub struct MockStoreClient {
    storage: Mutex<MockStorage>,
    stats: MockClientStats,
    fail_writes: AtomicBool,
    fail_create: AtomicBool,
    write_delay_ms: AtomicU64,
    closed: AtomicBool,
}

/// Statistics tracking for the mock client
#[derive(Debug, Default)]
struct MockClientStats {
    total_writes: AtomicU64,
    failed_writes: AtomicU64,
    total_points_written: AtomicU64,
    databases_created: AtomicU64,
}

impl MockStoreClient {
    /// Create a new mock client
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every write with a simulated error
    pub fn with_error_simulation(self) -> Self {
        self.fail_writes.store(true, Ordering::Relaxed);
        self
    }

    /// Reject database creation with a simulated error
    pub fn with_create_failure(self) -> Self {
        self.fail_create.store(true, Ordering::Relaxed);
        self
    }

    /// Hold every write for `delay` before it is applied
    pub fn with_write_delay(self, delay: Duration) -> Self {
        self.set_write_delay(delay);
        self
    }

    pub fn set_write_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.write_delay_ms.store(millis, Ordering::Relaxed);
    }

    /// Toggle write failures at runtime
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Toggle database creation failures at runtime
    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::Relaxed);
    }

    /// All batches written so far
    pub fn written_batches(&self) -> Vec<PointBatch> {
        self.storage.lock().batches.clone()
    }

    /// All points written so far, flattened across batches
    pub fn written_points(&self) -> Vec<EncodedPoint> {
        self.storage
            .lock()
            .batches
            .iter()
            .flat_map(|b| b.points.iter().cloned())
            .collect()
    }

    /// Number of write calls that reached the client, failed or not
    pub fn write_calls(&self) -> usize {
        self.count_operations("write")
    }

    /// Number of database creation calls that reached the client
    pub fn create_calls(&self) -> usize {
        self.count_operations("create_database")
    }

    /// Get the operation log (for testing)
    pub fn get_operations(&self) -> Vec<String> {
        self.storage.lock().operations.clone()
    }

    /// Check if a specific operation was recorded
    pub fn has_operation(&self, operation: &str) -> bool {
        self.storage
            .lock()
            .operations
            .iter()
            .any(|op| op.contains(operation))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    fn count_operations(&self, prefix: &str) -> usize {
        self.storage
            .lock()
            .operations
            .iter()
            .filter(|op| op.starts_with(prefix))
            .count()
    }
}

#[async_trait]
impl StoreClient for MockStoreClient {
    async fn write(&self, batch: &PointBatch) -> InfluxResult<()> {
        let delay = self.write_delay_ms.load(Ordering::Relaxed);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let mut storage = self.storage.lock();
        storage
            .operations
            .push(format!("write({} points)", batch.len()));

        if self.fail_writes.load(Ordering::Relaxed) {
            self.stats.failed_writes.fetch_add(1, Ordering::Relaxed);
            return Err(InfluxError::store("Simulated write error"));
        }

        trace!("Mock: Writing batch of {} points", batch.len());

        storage.batches.push(batch.clone());
        self.stats.total_writes.fetch_add(1, Ordering::Relaxed);
        self.stats
            .total_points_written
            .fetch_add(batch.len() as u64, Ordering::Relaxed);

        Ok(())
    }

    async fn create_database_if_absent(&self) -> InfluxResult<()> {
        self.storage
            .lock()
            .operations
            .push("create_database".to_string());

        if self.fail_create.load(Ordering::Relaxed) {
            return Err(InfluxError::store("Simulated create database error"));
        }

        debug!("Mock: Database ensured");
        self.stats.databases_created.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn close(&self) -> InfluxResult<()> {
        self.storage.lock().operations.push("close".to_string());
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn get_stats(&self) -> StoreStats {
        StoreStats {
            total_writes: self.stats.total_writes.load(Ordering::Relaxed),
            failed_writes: self.stats.failed_writes.load(Ordering::Relaxed),
            total_points_written: self.stats.total_points_written.load(Ordering::Relaxed),
            databases_created: self.stats.databases_created.load(Ordering::Relaxed),
        }
    }
}
