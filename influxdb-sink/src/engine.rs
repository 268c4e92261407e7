//! Batching engine
//!
//! Wires mappers, encoder, accumulator, trigger and executor together. The
//! engine is driven by two inputs: records, and timer signals. Both go
//! through the same trigger evaluation, and a flush always runs to
//! completion before the next input is looked at.

use influxdb_core::{
    datapoint::DataPoint,
    encoder::{DropReason, EncodedPoint, Encoder},
    error::{InfluxError, InfluxResult},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::accumulator::BatchAccumulator;
use crate::config::EngineConfig;
use crate::executor::{FlushExecutor, FlushReport};
use crate::mapper::{MappedValue, PointMapper};
use crate::metrics::EngineMetrics;
use crate::sink::RecordSink;
use crate::store::BoxedStoreClient;
use crate::trigger::{FlushReason, FlushTrigger, Signal};

type Converted = Option<(DataPoint, EncodedPoint)>;

/// Accumulates records into batches and flushes them to a store
pub struct BatchingEngine<R, S> {
    mappers: Vec<Arc<dyn PointMapper<R>>>,
    encoder: Encoder,
    accumulator: BatchAccumulator<R>,
    trigger: FlushTrigger,
    executor: FlushExecutor,
    sink: S,
    flush_interval: Duration,
}

impl<R, S> BatchingEngine<R, S>
where
    S: RecordSink<R>,
{
    pub fn new<P: Into<String>>(
        config: &EngineConfig,
        measurement_prefix: P,
        client: BoxedStoreClient,
        sink: S,
    ) -> InfluxResult<Self> {
        if config.batch_size == 0 {
            return Err(InfluxError::configuration("batch_size must be greater than 0"));
        }
        if config.flush_interval_seconds == 0 {
            return Err(InfluxError::configuration(
                "flush_interval_seconds must be greater than 0",
            ));
        }

        let metrics = EngineMetrics::new()?;

        Ok(Self {
            mappers: Vec::new(),
            encoder: Encoder::new(measurement_prefix),
            accumulator: BatchAccumulator::new(),
            trigger: FlushTrigger::new(config.batch_size),
            executor: FlushExecutor::new(client, config.fail_records_on_write_failure, metrics),
            sink,
            flush_interval: config.flush_interval(),
        })
    }

    /// Add a mapper; each mapper yields at most one point per record
    pub fn with_mapper<M>(self, mapper: M) -> Self
    where
        M: PointMapper<R> + 'static,
    {
        self.with_shared_mapper(Arc::new(mapper))
    }

    pub fn with_shared_mapper(mut self, mapper: Arc<dyn PointMapper<R>>) -> Self {
        self.mappers.push(mapper);
        self
    }

    /// Distinct points waiting for the next flush
    pub fn pending_points(&self) -> usize {
        self.accumulator.size()
    }

    /// Records waiting for resolution
    pub fn pending_records(&self) -> usize {
        self.accumulator.record_count()
    }

    pub fn metrics(&self) -> &EngineMetrics {
        self.executor.metrics()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    /// Accumulate `record` and flush if the batch is full.
    ///
    /// If any mapper rejects the record, or its point cannot be built, the
    /// whole current batch is failed together with the record.
    pub async fn on_record(&mut self, record: R) -> Option<FlushReport> {
        let converted: InfluxResult<Vec<Converted>> = self
            .mappers
            .iter()
            .map(|mapper| self.convert(mapper.as_ref(), &record))
            .collect();

        match converted {
            Ok(points) => {
                self.accumulator.add(record, points.into_iter().flatten());
                self.evaluate(Signal::Record).await
            }
            Err(e) => {
                error!(
                    "Error while accumulating record, failing batch of {} records: {}",
                    self.accumulator.record_count() + 1,
                    e
                );
                let mut batch = self.accumulator.take();
                batch.records.push(record);
                Some(
                    self.executor
                        .abort(batch, &self.sink, FlushReason::AccumulationError),
                )
            }
        }
    }

    /// React to the periodic timer
    pub async fn on_timer_signal(&mut self) -> Option<FlushReport> {
        self.evaluate(Signal::Tick).await
    }

    /// Flush whatever is pending, then close the store client
    pub async fn shutdown(mut self) -> FlushReport {
        info!(
            "Shutting down, flushing {} pending records",
            self.accumulator.record_count()
        );
        let report = self.flush(FlushReason::Shutdown).await;

        if let Err(e) = self.executor.close().await {
            error!("Error while closing store client: {}", e);
        }
        report
    }

    /// Drive the engine from a record channel and an interval timer until
    /// the channel closes or `cancel` fires, then shut down.
    ///
    /// The channel is not drained while a flush is in progress, so a bounded
    /// channel pushes back on producers. Records still queued when `cancel`
    /// fires are accumulated before the final flush, so each one is acked
    /// or failed.
    pub async fn run(mut self, receiver: flume::Receiver<R>, cancel: CancellationToken) -> FlushReport {
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        info!(
            "Batching engine started (batch_size={}, flush_interval={:?})",
            self.trigger.batch_size(),
            self.flush_interval
        );

        loop {
            match next_event(&mut ticker, &receiver, &cancel).await {
                Event::Cancelled => {
                    info!("Shutdown requested");
                    break;
                }
                Event::Tick => {
                    self.on_timer_signal().await;
                }
                Event::Record(record) => {
                    self.on_record(record).await;
                }
                Event::Closed => {
                    info!("Record channel closed");
                    break;
                }
            }
        }

        let queued = receiver.len();
        if queued > 0 {
            info!("Draining {} queued records before shutdown", queued);
        }
        while let Ok(record) = receiver.try_recv() {
            self.on_record(record).await;
        }

        self.shutdown().await
    }

    async fn evaluate(&mut self, signal: Signal) -> Option<FlushReport> {
        let reason = self.trigger.evaluate(signal, self.accumulator.size())?;
        Some(self.flush(reason).await)
    }

    async fn flush(&mut self, reason: FlushReason) -> FlushReport {
        let batch = self.accumulator.take();
        self.executor.flush(batch, &self.sink, reason).await
    }

    /// Map, build and encode one point. `Ok(None)` means the point was
    /// dropped and the record survives.
    fn convert(&self, mapper: &dyn PointMapper<R>, record: &R) -> InfluxResult<Converted> {
        let mapped = mapper.map(record)?;

        let value = match mapped.value {
            MappedValue::Present(value) => value,
            MappedValue::Missing => {
                self.dropped(&mapped.metric, DropReason::MissingValue);
                return Ok(None);
            }
            MappedValue::Unsupported { kind } => {
                self.dropped(&mapped.metric, DropReason::UnsupportedKind { kind });
                return Ok(None);
            }
        };

        let point = DataPoint::new(
            mapped.metric,
            mapped.tags,
            mapped.fields,
            mapped.timestamp,
            value,
        )?;

        let fields_dropped = &self.executor.metrics().fields_dropped;
        match self
            .encoder
            .encode_with(&point, |_, _| fields_dropped.inc())
        {
            Ok(encoded) => {
                debug!("Accumulated {}", point);
                Ok(Some((point, encoded)))
            }
            Err(reason) => {
                self.dropped(point.metric().as_str(), reason);
                Ok(None)
            }
        }
    }

    fn dropped(&self, metric: &str, reason: DropReason) {
        warn!("Discarding point for metric {}: {}", metric, reason);
        self.executor.metrics().points_dropped.inc();
    }
}

enum Event<R> {
    Cancelled,
    Tick,
    Record(R),
    Closed,
}

/// Wait for the next input. Cancellation wins over the timer, and the timer
/// wins over a ready record, so a busy channel cannot hold back the time
/// trigger.
async fn next_event<R>(
    ticker: &mut Interval,
    receiver: &flume::Receiver<R>,
    cancel: &CancellationToken,
) -> Event<R> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Event::Cancelled,
        _ = ticker.tick() => Event::Tick,
        received = receiver.recv_async() => match received {
            Ok(record) => Event::Record(record),
            Err(_) => Event::Closed,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::MappedPoint;
    use crate::mock_client::MockStoreClient;
    use crate::sink::RecordingSink;
    use influxdb_core::{FieldMap, FieldValue, TagSet};

    fn mapper(record: &i64) -> InfluxResult<MappedPoint> {
        Ok(MappedPoint {
            metric: "m".to_string(),
            tags: TagSet::new(),
            fields: FieldMap::new(),
            timestamp: *record,
            value: MappedValue::Present(FieldValue::Long(*record)),
        })
    }

    fn engine(batch_size: usize) -> (BatchingEngine<i64, RecordingSink<i64>>, Arc<MockStoreClient>) {
        let client = Arc::new(MockStoreClient::new());
        let config = EngineConfig {
            batch_size,
            ..EngineConfig::default()
        };
        let engine = BatchingEngine::new(&config, "storm-", client.clone(), RecordingSink::new())
            .unwrap()
            .with_mapper(mapper);
        (engine, client)
    }

    #[test]
    fn test_rejects_zero_batch_size() {
        let config = EngineConfig {
            batch_size: 0,
            ..EngineConfig::default()
        };
        let result = BatchingEngine::<i64, _>::new(
            &config,
            "",
            Arc::new(MockStoreClient::new()),
            RecordingSink::new(),
        );
        assert!(matches!(result, Err(InfluxError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_record_below_batch_size_waits() {
        let (mut engine, client) = engine(2);

        assert!(engine.on_record(1).await.is_none());
        assert_eq!(engine.pending_points(), 1);
        assert_eq!(client.write_calls(), 0);

        let report = engine.on_record(2).await.unwrap();
        assert_eq!(report.reason, FlushReason::BatchSize);
        assert_eq!(engine.pending_points(), 0);
        assert_eq!(engine.sink().acked(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_measurement_prefix_applied() {
        let (mut engine, client) = engine(1);
        engine.on_record(5).await;

        let points = client.written_points();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].measurement, "storm-m");
        assert_eq!(points[0].timestamp, 5);
    }

    #[tokio::test]
    async fn test_elapsed_timer_beats_queued_records() {
        let mut ticker = tokio::time::interval(Duration::from_millis(200));
        ticker.tick().await;
        let (sender, receiver) = flume::bounded(4);
        sender.send(1).unwrap();
        sender.send(2).unwrap();
        let cancel = CancellationToken::new();

        tokio::time::sleep(Duration::from_millis(250)).await;

        assert!(matches!(next_event(&mut ticker, &receiver, &cancel).await, Event::Tick));
        assert!(matches!(
            next_event(&mut ticker, &receiver, &cancel).await,
            Event::Record(1)
        ));

        cancel.cancel();
        assert!(matches!(
            next_event(&mut ticker, &receiver, &cancel).await,
            Event::Cancelled
        ));

        drop(sender);
        let mut idle = tokio::time::interval(Duration::from_secs(60));
        idle.tick().await;
        assert!(matches!(
            next_event(&mut idle, &receiver, &CancellationToken::new()).await,
            Event::Record(2)
        ));
        assert!(matches!(
            next_event(&mut idle, &receiver, &CancellationToken::new()).await,
            Event::Closed
        ));
    }

    #[tokio::test]
    async fn test_shutdown_flushes_and_closes() {
        let (mut engine, client) = engine(10);
        engine.on_record(1).await;

        let report = engine.shutdown().await;
        assert_eq!(report.reason, FlushReason::Shutdown);
        assert_eq!(report.records_acked, 1);
        assert!(client.is_closed());
    }
}
