//! InfluxDB batching sink
//!
//! Accumulates upstream records into batches of metric points, flushes them
//! to InfluxDB on a count or time trigger, and reports every record back to
//! its source as acked or failed.

pub mod accumulator;
pub mod config;
pub mod engine;
pub mod executor;
pub mod influxdb_client;
pub mod mapper;
pub mod metrics;
pub mod mock_client;
pub mod sink;
pub mod store;
pub mod trigger;

// Re-export commonly used types
pub use accumulator::{Batch, BatchAccumulator, RecordId};
pub use config::{EngineConfig, MapperConfig, SinkConfig, StoreConfig};
pub use engine::BatchingEngine;
pub use executor::{FlushExecutor, FlushOutcome, FlushReport, FlushState};
pub use influxdb_client::InfluxDbClient;
pub use mapper::{JsonFieldMapper, JsonRecord, MappedPoint, MappedValue, PointMapper};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use mock_client::MockStoreClient;
pub use sink::{LoggingSink, RecordSink, RecordingSink, Resolution};
pub use store::{BoxedStoreClient, StoreClient, StoreStats};
pub use trigger::{FlushReason, FlushTrigger, Signal};
