//! Flush trigger evaluation

use serde::Serialize;
use std::fmt;

/// A control input delivered to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// A record was just accumulated
    Record,
    /// The flush timer fired
    Tick,
}

/// Why a flush was started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushReason {
    /// Accumulated point count reached the batch size
    BatchSize,
    /// The flush interval elapsed
    Interval,
    /// The engine is shutting down
    Shutdown,
    /// A record could not be accumulated and the batch was abandoned
    AccumulationError,
}

/// Decides whether the current batch must be flushed.
///
/// Both triggers are checked on every signal: a tick also flushes a full
/// batch, and a record arriving on a full batch flushes it without waiting
/// for the timer.
#[derive(Debug, Clone)]
pub struct FlushTrigger {
    batch_size: usize,
}

impl FlushTrigger {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Evaluate the triggers for `signal` given the accumulated point count
    pub fn evaluate(&self, signal: Signal, accumulated: usize) -> Option<FlushReason> {
        if signal == Signal::Tick {
            return Some(FlushReason::Interval);
        }
        if accumulated >= self.batch_size {
            return Some(FlushReason::BatchSize);
        }
        None
    }
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlushReason::BatchSize => "batch_size",
            FlushReason::Interval => "interval",
            FlushReason::Shutdown => "shutdown",
            FlushReason::AccumulationError => "accumulation_error",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_trigger_boundary() {
        let trigger = FlushTrigger::new(3);
        assert_eq!(trigger.evaluate(Signal::Record, 2), None);
        assert_eq!(trigger.evaluate(Signal::Record, 3), Some(FlushReason::BatchSize));
        assert_eq!(trigger.evaluate(Signal::Record, 4), Some(FlushReason::BatchSize));
    }

    #[test]
    fn test_tick_always_fires() {
        let trigger = FlushTrigger::new(3);
        assert_eq!(trigger.evaluate(Signal::Tick, 0), Some(FlushReason::Interval));
        assert_eq!(trigger.evaluate(Signal::Tick, 10), Some(FlushReason::Interval));
    }

    #[test]
    fn test_zero_batch_size_is_clamped() {
        let trigger = FlushTrigger::new(0);
        assert_eq!(trigger.batch_size(), 1);
        assert_eq!(trigger.evaluate(Signal::Record, 0), None);
        assert_eq!(trigger.evaluate(Signal::Record, 1), Some(FlushReason::BatchSize));
    }
}
