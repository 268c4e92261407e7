//! Acknowledgment interface back to the upstream record source

use parking_lot::Mutex;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};

/// Receives the final fate of every record handed to the engine.
///
/// Records are moved into the call, so a record can only ever be resolved
/// once.
pub trait RecordSink<R>: Send + Sync {
    /// The record's points were written (or it produced none worth writing)
    fn ack(&self, record: R);

    /// The record could not be written and should be redelivered upstream
    fn fail(&self, record: R);
}

/// Sink that only logs resolutions, for sources without redelivery
pub struct LoggingSink<R> {
    _record: PhantomData<fn(R)>,
}

impl<R> LoggingSink<R> {
    pub fn new() -> Self {
        Self {
            _record: PhantomData,
        }
    }
}

impl<R> Default for LoggingSink<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: fmt::Display> RecordSink<R> for LoggingSink<R> {
    fn ack(&self, record: R) {
        debug!("Acked {}", record);
    }

    fn fail(&self, record: R) {
        warn!("Failed {}", record);
    }
}

/// How a record was resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<R> {
    Acked(R),
    Failed(R),
}

/// Sink that remembers every resolution in order, for tests and tooling
#[derive(Debug)]
pub struct RecordingSink<R> {
    resolutions: Arc<Mutex<Vec<Resolution<R>>>>,
}

impl<R> Clone for RecordingSink<R> {
    fn clone(&self) -> Self {
        Self {
            resolutions: Arc::clone(&self.resolutions),
        }
    }
}

impl<R> Default for RecordingSink<R> {
    fn default() -> Self {
        Self {
            resolutions: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<R: Clone> RecordingSink<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// All resolutions in the order they happened
    pub fn resolutions(&self) -> Vec<Resolution<R>> {
        self.resolutions.lock().clone()
    }

    pub fn acked(&self) -> Vec<R> {
        self.resolutions
            .lock()
            .iter()
            .filter_map(|r| match r {
                Resolution::Acked(record) => Some(record.clone()),
                Resolution::Failed(_) => None,
            })
            .collect()
    }

    pub fn failed(&self) -> Vec<R> {
        self.resolutions
            .lock()
            .iter()
            .filter_map(|r| match r {
                Resolution::Failed(record) => Some(record.clone()),
                Resolution::Acked(_) => None,
            })
            .collect()
    }

    /// Total number of resolutions
    pub fn len(&self) -> usize {
        self.resolutions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolutions.lock().is_empty()
    }
}

impl<R: Send> RecordSink<R> for RecordingSink<R> {
    fn ack(&self, record: R) {
        self.resolutions.lock().push(Resolution::Acked(record));
    }

    fn fail(&self, record: R) {
        self.resolutions.lock().push(Resolution::Failed(record));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink_keeps_order() {
        let sink = RecordingSink::new();
        sink.ack(1u32);
        sink.fail(2u32);
        sink.ack(3u32);

        assert_eq!(
            sink.resolutions(),
            vec![
                Resolution::Acked(1),
                Resolution::Failed(2),
                Resolution::Acked(3)
            ]
        );
        assert_eq!(sink.acked(), vec![1, 3]);
        assert_eq!(sink.failed(), vec![2]);
    }

    #[test]
    fn test_recording_sink_clones_share_state() {
        let sink = RecordingSink::new();
        let observer = sink.clone();
        sink.fail("r1".to_string());
        assert_eq!(observer.failed(), vec!["r1".to_string()]);
    }
}
