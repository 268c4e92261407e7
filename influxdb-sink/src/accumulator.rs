//! Batch accumulation of encoded points and the records that produced them

use influxdb_core::{
    datapoint::DataPoint,
    encoder::{EncodedPoint, PointBatch},
};
use std::collections::HashMap;
use tracing::trace;

/// Sequence id of a record within one batch, assigned in arrival order
pub type RecordId = usize;

/// A distinct point together with every record that produced it
#[derive(Debug, Clone)]
pub struct AccumulatedPoint {
    pub point: EncodedPoint,
    /// Never empty
    pub owners: Vec<RecordId>,
}

/// Points and records taken out of the accumulator for one flush
#[derive(Debug)]
pub struct Batch<R> {
    /// Records in arrival order; a record's index is its `RecordId`
    pub records: Vec<R>,
    pub points: Vec<AccumulatedPoint>,
}

/// Buffers encoded points, keyed by data point identity, and keeps every
/// originating record so it can be acked or failed later.
///
/// Identical points are stored once. Records are tracked by sequence id
/// rather than by point, so a record never loses its resolution because
/// another record produced an equal point.
#[derive(Debug)]
pub struct BatchAccumulator<R> {
    records: Vec<R>,
    points: Vec<AccumulatedPoint>,
    index: HashMap<DataPoint, usize>,
}

impl<R> Default for BatchAccumulator<R> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            points: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<R> BatchAccumulator<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `record` and the points it produced. A record with no points
    /// is still tracked so it gets resolved with the batch.
    pub fn add<I>(&mut self, record: R, points: I) -> RecordId
    where
        I: IntoIterator<Item = (DataPoint, EncodedPoint)>,
    {
        let id = self.records.len();
        self.records.push(record);

        for (key, encoded) in points {
            match self.index.get(&key) {
                Some(&position) => {
                    trace!("Duplicate point for {}, adding owner {}", key.metric(), id);
                    let owners = &mut self.points[position].owners;
                    if owners.last() != Some(&id) {
                        owners.push(id);
                    }
                }
                None => {
                    self.index.insert(key, self.points.len());
                    self.points.push(AccumulatedPoint {
                        point: encoded,
                        owners: vec![id],
                    });
                }
            }
        }

        id
    }

    /// The distinct points currently accumulated, in arrival order
    pub fn snapshot(&self) -> PointBatch {
        PointBatch::from_points(self.points.iter().map(|p| p.point.clone()).collect())
    }

    /// Records that produced the point at `position` in the snapshot
    pub fn owners_of(&self, position: usize) -> Option<&[RecordId]> {
        self.points.get(position).map(|p| p.owners.as_slice())
    }

    /// Number of distinct accumulated points
    pub fn size(&self) -> usize {
        self.points.len()
    }

    /// Number of records awaiting resolution
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// True when there is nothing to flush and no record to resolve
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Discard all points and record associations
    pub fn clear(&mut self) {
        self.records.clear();
        self.points.clear();
        self.index.clear();
    }

    /// Move the current batch out, leaving the accumulator empty
    pub fn take(&mut self) -> Batch<R> {
        self.index.clear();
        Batch {
            records: std::mem::take(&mut self.records),
            points: std::mem::take(&mut self.points),
        }
    }
}

impl<R> Batch<R> {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The points to hand to the store
    pub fn point_batch(&self) -> PointBatch {
        PointBatch::from_points(self.points.iter().map(|p| p.point.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use influxdb_core::{Encoder, TagSet};

    fn point(metric: &str, ts: i64, value: i32) -> (DataPoint, EncodedPoint) {
        let dp = DataPoint::without_fields(metric, TagSet::new(), ts, value).unwrap();
        let encoded = Encoder::default().encode(&dp).unwrap();
        (dp, encoded)
    }

    #[test]
    fn test_add_and_snapshot() {
        let mut acc = BatchAccumulator::new();
        assert!(acc.is_empty());

        let a = acc.add("a", vec![point("cpu", 1, 1), point("mem", 1, 2)]);
        let b = acc.add("b", vec![point("cpu", 2, 3)]);

        assert_eq!((a, b), (0, 1));
        assert_eq!(acc.size(), 3);
        assert_eq!(acc.record_count(), 2);

        let snapshot = acc.snapshot();
        let names: Vec<_> = snapshot.iter().map(|p| p.measurement.as_str()).collect();
        assert_eq!(names, vec!["cpu", "mem", "cpu"]);
        assert_eq!(acc.owners_of(2), Some(&[1][..]));
    }

    #[test]
    fn test_identical_points_keep_every_owner() {
        let mut acc = BatchAccumulator::new();
        acc.add("first", vec![point("cpu", 1, 1)]);
        acc.add("second", vec![point("cpu", 1, 1)]);

        assert_eq!(acc.size(), 1);
        assert_eq!(acc.record_count(), 2);
        assert_eq!(acc.owners_of(0), Some(&[0, 1][..]));
    }

    #[test]
    fn test_same_record_duplicate_point_owned_once() {
        let mut acc = BatchAccumulator::new();
        acc.add("only", vec![point("cpu", 1, 1), point("cpu", 1, 1)]);
        assert_eq!(acc.owners_of(0), Some(&[0][..]));
    }

    #[test]
    fn test_record_without_points_is_tracked() {
        let mut acc = BatchAccumulator::new();
        acc.add("empty", Vec::new());

        assert_eq!(acc.size(), 0);
        assert!(!acc.is_empty());
    }

    #[test]
    fn test_take_and_clear() {
        let mut acc = BatchAccumulator::new();
        acc.add("a", vec![point("cpu", 1, 1)]);

        let batch = acc.take();
        assert_eq!(batch.records, vec!["a"]);
        assert_eq!(batch.point_batch().len(), 1);
        assert!(acc.is_empty());
        assert_eq!(acc.size(), 0);

        // Index was reset, so the same point is new again
        acc.add("b", vec![point("cpu", 1, 1)]);
        assert_eq!(acc.owners_of(0), Some(&[0][..]));

        acc.clear();
        assert!(acc.is_empty());
        assert!(acc.snapshot().is_empty());
    }
}
