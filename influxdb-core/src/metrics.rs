//! Metric name types and operations

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{InfluxError, InfluxResult};

/// Metric name - identifies the measurement series of a data point
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MetricName(String);

impl MetricName {
    /// Create a new metric name
    pub fn new<S: Into<String>>(name: S) -> InfluxResult<Self> {
        let name = name.into();

        if name.trim().is_empty() {
            return Err(InfluxError::validation("Metric name cannot be empty"));
        }

        if name.len() > crate::MAX_METRIC_NAME_LENGTH {
            return Err(InfluxError::validation(format!(
                "Metric name too long: {} > {}",
                name.len(),
                crate::MAX_METRIC_NAME_LENGTH
            )));
        }

        // Line protocol has no escape for these inside a measurement
        if name.contains(['\n', '\r']) {
            return Err(InfluxError::validation(
                "Metric name contains a line break",
            ));
        }

        Ok(Self(name))
    }

    /// Get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the metric name is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Measurement name as written to the store, with the configured prefix applied
    pub fn measurement(&self, prefix: &str) -> String {
        let mut measurement = String::with_capacity(prefix.len() + self.0.len());
        measurement.push_str(prefix);
        measurement.push_str(&self.0);
        measurement
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for MetricName {
    type Error = InfluxError;

    fn try_from(s: String) -> InfluxResult<Self> {
        Self::new(s)
    }
}

impl TryFrom<&str> for MetricName {
    type Error = InfluxError;

    fn try_from(s: &str) -> InfluxResult<Self> {
        Self::new(s)
    }
}

impl From<MetricName> for String {
    fn from(name: MetricName) -> Self {
        name.0
    }
}

impl AsRef<str> for MetricName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for MetricName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for MetricName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl PartialEq<String> for MetricName {
    fn eq(&self, other: &String) -> bool {
        &self.0 == other
    }
}
