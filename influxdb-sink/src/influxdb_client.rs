//! InfluxDB 1.x HTTP client
//!
//! Writes batches through the `/write` endpoint as line protocol with
//! nanosecond precision, optionally gzip-compressed, and creates the target
//! database through `/query` on demand.

use async_trait::async_trait;
use flate2::{write::GzEncoder, Compression};
use influxdb_core::{
    encoder::PointBatch,
    error::{InfluxError, InfluxResult},
};
use reqwest::{header, RequestBuilder};
use std::{
    io::Write,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::store::{StoreClient, StoreStats};

/// Production store client speaking the InfluxDB HTTP API
pub struct InfluxDbClient {
    http: reqwest::Client,
    config: Arc<StoreConfig>,
    stats: ClientStats,
}

/// Internal statistics tracking
#[derive(Default)]
struct ClientStats {
    total_writes: AtomicU64,
    failed_writes: AtomicU64,
    total_points_written: AtomicU64,
    databases_created: AtomicU64,
}

impl InfluxDbClient {
    /// Create a new client. No request is made until the first write.
    pub fn new(config: StoreConfig) -> InfluxResult<Self> {
        let config = Arc::new(config);

        debug!(
            "Preparing connection to InfluxDB: url='{}', username='{}', database='{}'",
            config.url, config.username, config.database
        );

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| InfluxError::connection(format!("Failed to build HTTP client: {}", e)))?;

        info!(
            "InfluxDB client ready for {} (database={}, gzip={})",
            config.url, config.database, config.enable_gzip
        );

        Ok(Self {
            http,
            config,
            stats: ClientStats::default(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        if self.config.has_credentials() {
            request.basic_auth(&self.config.username, Some(&self.config.password))
        } else {
            request
        }
    }

    fn map_send_error(&self, e: reqwest::Error) -> InfluxError {
        if e.is_timeout() {
            InfluxError::Timeout {
                timeout_ms: self.config.request_timeout_ms,
            }
        } else {
            InfluxError::connection(format!("Request to {} failed: {}", self.config.url, e))
        }
    }

    async fn check_response(response: reqwest::Response) -> InfluxResult<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(InfluxError::StoreRejected {
            status: status.as_u16(),
            body,
        })
    }

    async fn send_write(&self, batch: &PointBatch) -> InfluxResult<()> {
        let lines = batch.to_line_protocol();

        let mut request = self
            .http
            .post(self.endpoint("write"))
            .query(&[
                ("db", self.config.database.as_str()),
                ("rp", self.config.retention_policy.as_str()),
                ("precision", "ns"),
                ("consistency", "all"),
            ])
            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8");

        request = if self.config.enable_gzip {
            request
                .header(header::CONTENT_ENCODING, "gzip")
                .body(gzip(lines.as_bytes())?)
        } else {
            request.body(lines)
        };

        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        Self::check_response(response).await
    }
}

/// Compress a request body
fn gzip(data: &[u8]) -> InfluxResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 4), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Quote an identifier for InfluxQL
fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
}

#[async_trait]
impl StoreClient for InfluxDbClient {
    async fn write(&self, batch: &PointBatch) -> InfluxResult<()> {
        if batch.is_empty() {
            warn!("No points values to send");
            return Ok(());
        }

        let start = Instant::now();
        debug!(
            "Sending {} points to database = {}",
            batch.len(),
            self.config.database
        );

        match self.send_write(batch).await {
            Ok(()) => {
                self.stats.total_writes.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .total_points_written
                    .fetch_add(batch.len() as u64, Ordering::Relaxed);
                debug!("Wrote {} points in {:?}", batch.len(), start.elapsed());
                Ok(())
            }
            Err(e) => {
                self.stats.failed_writes.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    async fn create_database_if_absent(&self) -> InfluxResult<()> {
        debug!("Creating database with name = {}", self.config.database);

        let statement = format!("CREATE DATABASE {}", quote_identifier(&self.config.database));
        let request = self
            .http
            .post(self.endpoint("query"))
            .query(&[("q", statement.as_str())]);

        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        Self::check_response(response).await?;
        self.stats.databases_created.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn close(&self) -> InfluxResult<()> {
        debug!("Closing connection to database = {}", self.config.database);
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

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn test_gzip_round_trips() {
        let body = "cpu value=1i 1\ncpu value=2i 2";
        let compressed = gzip(body.as_bytes()).unwrap();

        let mut decoded = String::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("metrics"), "\"metrics\"");
        assert_eq!(quote_identifier("a\"b"), "\"a\\\"b\"");
    }

    #[test]
    fn test_endpoint_tolerates_trailing_slash() {
        let config = StoreConfig {
            url: "http://localhost:8086/".to_string(),
            ..StoreConfig::default()
        };
        let client = InfluxDbClient::new(config).unwrap();
        assert_eq!(client.endpoint("write"), "http://localhost:8086/write");
    }
}
