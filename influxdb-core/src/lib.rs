//! # InfluxDB Core Library
//!
//! Shared data types for the InfluxDB batching sink.
//!
//! ## Features
//!
//! - **Data Types**: Metric data points with tags, fields and a typed primary value
//! - **Encoding**: Per-kind value encoding with NaN/Infinity filtering
//! - **Line Protocol**: Serialization of encoded points for the InfluxDB write API
//! - **Errors**: A single error type shared by the sink service

pub mod datapoint;
pub mod encoder;
pub mod error;
pub mod line_protocol;
pub mod metrics;
pub mod tags;

// Re-export commonly used types
pub use datapoint::{DataPoint, FieldMap, FieldValue, PointValue};
pub use encoder::{DropReason, EncodedPoint, Encoder, PointBatch, WireValue, VALUE_FIELD};
pub use error::{InfluxError, InfluxResult};
pub use metrics::MetricName;
pub use tags::TagSet;

/// Version information for the sink
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum number of tags allowed per data point
pub const MAX_TAGS_PER_POINT: usize = 100;

/// Maximum length for metric names
pub const MAX_METRIC_NAME_LENGTH: usize = 1024;
