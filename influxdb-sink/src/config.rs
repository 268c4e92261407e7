use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Configuration for the sink service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Batching and flush behaviour
    pub engine: EngineConfig,

    /// InfluxDB connection parameters, passed through to the store client
    pub store: StoreConfig,

    /// Record field names used by the JSON mapper
    pub mapper: MapperConfig,
}

/// Batching engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of accumulated points that triggers a flush
    pub batch_size: usize,

    /// Cadence of the timer signal that triggers a flush
    pub flush_interval_seconds: u64,

    /// Fail the records of a batch whose write was rejected. When false
    /// the records are acked and their metrics are dropped.
    pub fail_records_on_write_failure: bool,

    /// Capacity of the bounded record channel feeding the engine
    pub channel_capacity: usize,
}

/// InfluxDB store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Base URL of the InfluxDB HTTP API
    pub url: String,

    /// Username for basic authentication (empty for none)
    pub username: String,

    /// Password for basic authentication (empty for none)
    pub password: String,

    /// Target database, created on first write if absent
    pub database: String,

    /// Prepended to every metric name to form the measurement
    pub measurement_prefix: String,

    /// Gzip request bodies
    pub enable_gzip: bool,

    /// Retention policy used for writes
    pub retention_policy: String,

    /// HTTP request timeout in milliseconds
    pub request_timeout_ms: u64,
}

/// Field names looked up in incoming JSON records
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    pub metric_field: String,
    pub timestamp_field: String,
    pub tags_field: String,
    /// Set to `None` to ignore additional fields
    pub fields_field: Option<String>,
    pub value_field: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval_seconds: 10,
            fail_records_on_write_failure: true,
            channel_capacity: 1000,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8086".to_string(),
            username: String::new(),
            password: String::new(),
            database: "apache-storm-metrics".to_string(),
            measurement_prefix: "storm-".to_string(),
            enable_gzip: true,
            retention_policy: "autogen".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            metric_field: "metric".to_string(),
            timestamp_field: "timestamp".to_string(),
            tags_field: "tags".to_string(),
            fields_field: Some("fields".to_string()),
            value_field: "value".to_string(),
        }
    }
}

impl SinkConfig {
    /// Load configuration from file, environment variables, and defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => match env::var("CONFIG_PATH") {
                Ok(config_path) => Self::load_from_file(Path::new(&config_path))?,
                Err(_) => Self::default(),
            },
        };

        config.apply_overrides(|key| env::var(key).ok())?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Override values from `INFLUXDB_SINK_*` variables provided by `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(batch_size) = lookup("INFLUXDB_SINK_BATCH_SIZE") {
            self.engine.batch_size = batch_size
                .parse()
                .context("INFLUXDB_SINK_BATCH_SIZE must be an integer")?;
        }

        if let Some(interval) = lookup("INFLUXDB_SINK_FLUSH_INTERVAL_SECONDS") {
            self.engine.flush_interval_seconds = interval
                .parse()
                .context("INFLUXDB_SINK_FLUSH_INTERVAL_SECONDS must be an integer")?;
        }

        if let Some(fail) = lookup("INFLUXDB_SINK_FAIL_RECORDS_ON_WRITE_FAILURE") {
            self.engine.fail_records_on_write_failure = fail
                .parse()
                .context("INFLUXDB_SINK_FAIL_RECORDS_ON_WRITE_FAILURE must be true or false")?;
        }

        if let Some(url) = lookup("INFLUXDB_SINK_URL") {
            self.store.url = url;
        }

        if let Some(username) = lookup("INFLUXDB_SINK_USERNAME") {
            self.store.username = username;
        }

        if let Some(password) = lookup("INFLUXDB_SINK_PASSWORD") {
            self.store.password = password;
        }

        if let Some(database) = lookup("INFLUXDB_SINK_DATABASE") {
            self.store.database = database;
        }

        if let Some(prefix) = lookup("INFLUXDB_SINK_MEASUREMENT_PREFIX") {
            self.store.measurement_prefix = prefix;
        }

        if let Some(gzip) = lookup("INFLUXDB_SINK_ENABLE_GZIP") {
            self.store.enable_gzip = gzip
                .parse()
                .context("INFLUXDB_SINK_ENABLE_GZIP must be true or false")?;
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.engine.batch_size == 0 {
            return Err(anyhow::anyhow!("Batch size must be greater than 0"));
        }

        if self.engine.flush_interval_seconds == 0 {
            return Err(anyhow::anyhow!("Flush interval must be greater than 0"));
        }

        if self.engine.channel_capacity == 0 {
            return Err(anyhow::anyhow!("Channel capacity must be greater than 0"));
        }

        if self.store.url.is_empty() {
            return Err(anyhow::anyhow!("InfluxDB url is required"));
        }

        if self.store.database.is_empty() {
            return Err(anyhow::anyhow!("InfluxDB database cannot be empty"));
        }

        if self.store.request_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Request timeout must be greater than 0"));
        }

        Ok(())
    }
}

impl EngineConfig {
    /// Get the flush interval as a Duration
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_seconds)
    }
}

impl StoreConfig {
    /// Get the request timeout as a Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Whether basic authentication should be sent
    pub fn has_credentials(&self) -> bool {
        !(self.username.is_empty() && self.password.is_empty())
    }
}
