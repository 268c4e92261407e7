//! Flush execution: writes a batch and resolves its records

use influxdb_core::{
    encoder::PointBatch,
    error::{InfluxError, InfluxResult},
};
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::accumulator::Batch;
use crate::metrics::EngineMetrics;
use crate::sink::RecordSink;
use crate::store::BoxedStoreClient;
use crate::trigger::FlushReason;

/// Lifecycle of the executor: `Idle -> Flushing -> {Acked, Failed} -> Idle`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FlushState {
    Idle,
    Flushing,
    Acked,
    Failed,
}

/// How a flush ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FlushOutcome {
    /// Nothing to do, or nothing to write
    Skipped,
    /// Points written (if any) and records acked
    Acked,
    /// Write or database creation failed; carries the cause
    Failed(String),
    /// Batch abandoned without writing
    Aborted,
}

/// Summary of a single flush
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub reason: FlushReason,
    pub points_written: usize,
    pub records_acked: usize,
    pub records_failed: usize,
    pub outcome: FlushOutcome,
}

impl FlushReport {
    fn new(reason: FlushReason, outcome: FlushOutcome) -> Self {
        Self {
            reason,
            points_written: 0,
            records_acked: 0,
            records_failed: 0,
            outcome,
        }
    }

    /// Total records resolved by this flush
    pub fn records_resolved(&self) -> usize {
        self.records_acked + self.records_failed
    }
}

/// Drives the store write for a batch and maps the outcome onto every
/// record of that batch
pub struct FlushExecutor {
    client: BoxedStoreClient,
    state: FlushState,
    database_ready: bool,
    fail_records_on_write_failure: bool,
    metrics: EngineMetrics,
}

impl FlushExecutor {
    pub fn new(
        client: BoxedStoreClient,
        fail_records_on_write_failure: bool,
        metrics: EngineMetrics,
    ) -> Self {
        Self {
            client,
            state: FlushState::Idle,
            database_ready: false,
            fail_records_on_write_failure,
            metrics,
        }
    }

    pub fn state(&self) -> FlushState {
        self.state
    }

    /// True once the database has been created (or found) by this executor
    pub fn is_database_ready(&self) -> bool {
        self.database_ready
    }

    pub fn client(&self) -> &BoxedStoreClient {
        &self.client
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Write `batch` and ack or fail each of its records exactly once.
    ///
    /// Never returns an error: every failure is resolved into fail signals
    /// and reported in the returned [`FlushReport`].
    pub async fn flush<R, S>(&mut self, batch: Batch<R>, sink: &S, reason: FlushReason) -> FlushReport
    where
        S: RecordSink<R> + ?Sized,
    {
        if batch.is_empty() {
            debug!("Flush ({}) skipped: batch is empty", reason);
            return FlushReport::new(reason, FlushOutcome::Skipped);
        }

        if self.state == FlushState::Flushing {
            warn!(
                "Flush ({}) refused: a flush is already in progress, failing {} records",
                reason,
                batch.records.len()
            );
            let cause = InfluxError::FlushInProgress.to_string();
            return fail_all(&self.metrics, batch.records, sink, reason, cause);
        }

        self.state = FlushState::Flushing;
        let points = batch.point_batch();
        let mut in_flight = InFlight {
            records: batch.records,
            sink,
            state: &mut self.state,
            metrics: &self.metrics,
            reason,
        };

        if points.is_empty() {
            debug!(
                "Flush ({}): no points to write, acking {} records",
                reason,
                in_flight.records.len()
            );
            return ack_all(&self.metrics, in_flight.take(), sink, reason, 0, FlushOutcome::Skipped);
        }

        self.metrics.flushes.inc();
        let start = Instant::now();
        let result = write(&self.client, &mut self.database_ready, &points).await;
        self.metrics.observe_flush(start.elapsed());

        let report = match result {
            Ok(()) => {
                *in_flight.state = FlushState::Acked;
                self.metrics.points_written.inc_by(points.len() as u64);
                ack_all(
                    &self.metrics,
                    in_flight.take(),
                    sink,
                    reason,
                    points.len(),
                    FlushOutcome::Acked,
                )
            }
            Err(e) => {
                *in_flight.state = FlushState::Failed;
                self.metrics.flush_failures.inc();
                error!(
                    "Error while writing {} points ({}): {} [{}]",
                    points.len(),
                    reason,
                    e,
                    e.category()
                );

                if self.fail_records_on_write_failure {
                    fail_all(&self.metrics, in_flight.take(), sink, reason, e.to_string())
                } else {
                    error!(
                        "Dropping {} metrics, acking {} records",
                        points.len(),
                        in_flight.records.len()
                    );
                    self.metrics.points_dropped.inc_by(points.len() as u64);
                    ack_all(
                        &self.metrics,
                        in_flight.take(),
                        sink,
                        reason,
                        0,
                        FlushOutcome::Failed(e.to_string()),
                    )
                }
            }
        };

        debug!(
            "Flush ({}) finished: {} points, {} acked, {} failed in {:?}",
            reason,
            report.points_written,
            report.records_acked,
            report.records_failed,
            start.elapsed()
        );

        report
    }

    /// Fail every record of `batch` without writing anything
    pub fn abort<R, S>(&mut self, batch: Batch<R>, sink: &S, reason: FlushReason) -> FlushReport
    where
        S: RecordSink<R> + ?Sized,
    {
        if batch.is_empty() {
            return FlushReport::new(reason, FlushOutcome::Aborted);
        }

        warn!(
            "Abandoning batch of {} points ({}), failing {} records",
            batch.points.len(),
            reason,
            batch.records.len()
        );
        self.metrics.points_dropped.inc_by(batch.points.len() as u64);

        let mut report = fail_all(&self.metrics, batch.records, sink, reason, String::new());
        report.outcome = FlushOutcome::Aborted;
        report
    }

    /// Close the store client
    pub async fn close(&self) -> InfluxResult<()> {
        self.client.close().await
    }
}

/// Create the database on first use, then write
async fn write(
    client: &BoxedStoreClient,
    database_ready: &mut bool,
    points: &PointBatch,
) -> InfluxResult<()> {
    if !*database_ready {
        client.create_database_if_absent().await?;
        info!("Database is ready");
        *database_ready = true;
    }
    client.write(points).await
}

/// Records of a flush that are not resolved yet.
///
/// Dropping it, including when the flush future itself is dropped mid-write,
/// fails whatever records are left and puts the executor back to `Idle`.
struct InFlight<'a, R, S: RecordSink<R> + ?Sized> {
    records: Vec<R>,
    sink: &'a S,
    state: &'a mut FlushState,
    metrics: &'a EngineMetrics,
    reason: FlushReason,
}

impl<R, S: RecordSink<R> + ?Sized> InFlight<'_, R, S> {
    fn take(&mut self) -> Vec<R> {
        std::mem::take(&mut self.records)
    }
}

impl<R, S: RecordSink<R> + ?Sized> Drop for InFlight<'_, R, S> {
    fn drop(&mut self) {
        if !self.records.is_empty() {
            warn!(
                "Flush ({}) interrupted before completing, failing {} records",
                self.reason,
                self.records.len()
            );
            self.metrics.records_failed.inc_by(self.records.len() as u64);
            for record in self.records.drain(..) {
                self.sink.fail(record);
            }
        }
        *self.state = FlushState::Idle;
    }
}

fn ack_all<R, S>(
    metrics: &EngineMetrics,
    records: Vec<R>,
    sink: &S,
    reason: FlushReason,
    points_written: usize,
    outcome: FlushOutcome,
) -> FlushReport
where
    S: RecordSink<R> + ?Sized,
{
    let count = records.len();
    for record in records {
        sink.ack(record);
    }
    metrics.records_acked.inc_by(count as u64);

    FlushReport {
        reason,
        points_written,
        records_acked: count,
        records_failed: 0,
        outcome,
    }
}

fn fail_all<R, S>(
    metrics: &EngineMetrics,
    records: Vec<R>,
    sink: &S,
    reason: FlushReason,
    cause: String,
) -> FlushReport
where
    S: RecordSink<R> + ?Sized,
{
    let count = records.len();
    for record in records {
        sink.fail(record);
    }
    metrics.records_failed.inc_by(count as u64);

    FlushReport {
        reason,
        points_written: 0,
        records_acked: 0,
        records_failed: count,
        outcome: FlushOutcome::Failed(cause),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::BatchAccumulator;
    use crate::mock_client::MockStoreClient;
    use crate::sink::{RecordingSink, Resolution};
    use influxdb_core::{DataPoint, Encoder, TagSet};
    use std::sync::Arc;
    use std::time::Duration;

    fn batch_of(records: &[(&'static str, i64)]) -> Batch<&'static str> {
        let encoder = Encoder::new("storm-");
        let mut acc = BatchAccumulator::new();
        for (name, ts) in records {
            let dp = DataPoint::without_fields("cpu", TagSet::new(), *ts, 1i32).unwrap();
            let encoded = encoder.encode(&dp).unwrap();
            acc.add(*name, vec![(dp, encoded)]);
        }
        acc.take()
    }

    fn executor(client: Arc<MockStoreClient>, fail_records: bool) -> FlushExecutor {
        FlushExecutor::new(client, fail_records, EngineMetrics::new().unwrap())
    }

    #[tokio::test]
    async fn test_success_acks_all_records() {
        let client = Arc::new(MockStoreClient::new());
        let mut executor = executor(client.clone(), true);
        let sink = RecordingSink::new();

        let report = executor
            .flush(batch_of(&[("a", 1), ("b", 2)]), &sink, FlushReason::BatchSize)
            .await;

        assert_eq!(report.outcome, FlushOutcome::Acked);
        assert_eq!(report.points_written, 2);
        assert_eq!(sink.acked(), vec!["a", "b"]);
        assert_eq!(executor.state(), FlushState::Idle);
        assert_eq!(client.write_calls(), 1);
        assert_eq!(executor.metrics().snapshot().records_acked, 2);
    }

    #[tokio::test]
    async fn test_write_failure_fails_all_records() {
        let client = Arc::new(MockStoreClient::new().with_error_simulation());
        let mut executor = executor(client, true);
        let sink = RecordingSink::new();

        let report = executor
            .flush(
                batch_of(&[("a", 1), ("b", 2), ("c", 3)]),
                &sink,
                FlushReason::Interval,
            )
            .await;

        assert!(matches!(report.outcome, FlushOutcome::Failed(_)));
        assert_eq!(report.records_failed, 3);
        assert_eq!(sink.failed(), vec!["a", "b", "c"]);
        assert!(sink.acked().is_empty());
        assert_eq!(executor.metrics().snapshot().flush_failures, 1);
    }

    #[tokio::test]
    async fn test_write_failure_acks_when_policy_disabled() {
        let client = Arc::new(MockStoreClient::new().with_error_simulation());
        let mut executor = executor(client, false);
        let sink = RecordingSink::new();

        let report = executor
            .flush(batch_of(&[("a", 1)]), &sink, FlushReason::Interval)
            .await;

        assert!(matches!(report.outcome, FlushOutcome::Failed(_)));
        assert_eq!(report.records_acked, 1);
        assert_eq!(sink.resolutions(), vec![Resolution::Acked("a")]);
        assert_eq!(executor.metrics().snapshot().points_dropped, 1);
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let client = Arc::new(MockStoreClient::new());
        let mut executor = executor(client.clone(), true);
        let sink = RecordingSink::<&str>::new();

        let report = executor
            .flush(BatchAccumulator::<&str>::new().take(), &sink, FlushReason::Interval)
            .await;

        assert_eq!(report.outcome, FlushOutcome::Skipped);
        assert!(sink.is_empty());
        assert!(client.get_operations().is_empty());
    }

    #[tokio::test]
    async fn test_records_without_points_are_acked_without_write() {
        let client = Arc::new(MockStoreClient::new());
        let mut executor = executor(client.clone(), true);
        let sink = RecordingSink::new();

        let mut acc = BatchAccumulator::new();
        acc.add("dropped", Vec::new());

        let report = executor.flush(acc.take(), &sink, FlushReason::Interval).await;

        assert_eq!(report.outcome, FlushOutcome::Skipped);
        assert_eq!(sink.acked(), vec!["dropped"]);
        assert_eq!(client.write_calls(), 0);
        assert_eq!(client.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_database_created_once() {
        let client = Arc::new(MockStoreClient::new());
        let mut executor = executor(client.clone(), true);
        let sink = RecordingSink::new();

        executor.flush(batch_of(&[("a", 1)]), &sink, FlushReason::Interval).await;
        executor.flush(batch_of(&[("b", 2)]), &sink, FlushReason::Interval).await;

        assert_eq!(client.create_calls(), 1);
        assert_eq!(client.write_calls(), 2);
        assert!(executor.is_database_ready());
    }

    #[tokio::test]
    async fn test_create_failure_fails_flush_and_retries_next_time() {
        let client = Arc::new(MockStoreClient::new().with_create_failure());
        let mut executor = executor(client.clone(), true);
        let sink = RecordingSink::new();

        executor.flush(batch_of(&[("a", 1)]), &sink, FlushReason::Interval).await;
        assert_eq!(sink.failed(), vec!["a"]);
        assert_eq!(client.write_calls(), 0);
        assert!(!executor.is_database_ready());

        client.set_fail_create(false);
        executor.flush(batch_of(&[("b", 2)]), &sink, FlushReason::Interval).await;
        assert_eq!(sink.acked(), vec!["b"]);
        assert_eq!(client.create_calls(), 2);
    }

    #[tokio::test]
    async fn test_flush_refused_while_flushing() {
        let client = Arc::new(MockStoreClient::new());
        let mut executor = executor(client.clone(), true);
        executor.state = FlushState::Flushing;
        let sink = RecordingSink::new();

        let report = executor
            .flush(batch_of(&[("a", 1)]), &sink, FlushReason::BatchSize)
            .await;

        assert_eq!(report.records_failed, 1);
        assert_eq!(sink.failed(), vec!["a"]);
        assert_eq!(client.write_calls(), 0);
    }

    #[tokio::test]
    async fn test_interrupted_flush_fails_records_and_resets_state() {
        let client = Arc::new(MockStoreClient::new().with_write_delay(Duration::from_secs(5)));
        let mut executor = executor(client.clone(), true);
        let sink = RecordingSink::new();

        let interrupted = tokio::time::timeout(
            Duration::from_millis(20),
            executor.flush(batch_of(&[("a", 1), ("b", 2)]), &sink, FlushReason::Interval),
        )
        .await;

        assert!(interrupted.is_err());
        assert_eq!(sink.failed(), vec!["a", "b"]);
        assert_eq!(executor.state(), FlushState::Idle);
        assert_eq!(executor.metrics().snapshot().records_failed, 2);

        client.set_write_delay(Duration::ZERO);
        let report = executor
            .flush(batch_of(&[("c", 3)]), &sink, FlushReason::Interval)
            .await;

        assert_eq!(report.outcome, FlushOutcome::Acked);
        assert_eq!(sink.acked(), vec!["c"]);
        assert_eq!(client.write_calls(), 1);
    }

    #[test]
    fn test_abort_fails_everything() {
        let client = Arc::new(MockStoreClient::new());
        let mut executor = executor(client.clone(), true);
        let sink = RecordingSink::new();

        let report = executor.abort(
            batch_of(&[("a", 1), ("b", 2)]),
            &sink,
            FlushReason::AccumulationError,
        );

        assert_eq!(report.outcome, FlushOutcome::Aborted);
        assert_eq!(sink.failed(), vec!["a", "b"]);
        assert!(client.get_operations().is_empty());
    }
}
