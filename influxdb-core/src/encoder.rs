//! Conversion of data points into their store-safe representation.
//!
//! Every value kind has its own encode rule:
//!
//! | kind              | rule                                              |
//! |-------------------|---------------------------------------------------|
//! | string            | written as-is                                     |
//! | float, double     | widened to `f64`; NaN or infinite drops the point |
//! | integer, long     | written as a line-protocol integer                |
//! | boolean           | written as-is                                     |
//!
//! A dropped point is reported as a [`DropReason`], never as an error: one
//! bad sample must not fail the batch it would have been part of. Text that
//! line protocol cannot carry (line breaks, stray backslashes) in the
//! measurement or a tag drops the point; in a field key it drops the field.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

use crate::datapoint::{DataPoint, FieldValue};
use crate::line_protocol::{self, KEY_SPECIAL, MEASUREMENT_SPECIAL};
use crate::tags::TagSet;

/// Field key under which the primary value is written
pub const VALUE_FIELD: &str = "value";

/// A value in the form the store accepts on the wire
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum WireValue {
    Float(f64),
    Integer(i64),
    Boolean(bool),
    String(String),
}

/// A point ready to be written to the store
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncodedPoint {
    pub measurement: String,
    pub tags: TagSet,
    pub fields: BTreeMap<String, WireValue>,
    /// Nanoseconds since the Unix epoch
    pub timestamp: i64,
}

/// Why a point was discarded instead of being sent
#[derive(Debug, Clone, PartialEq)]
pub enum DropReason {
    /// The record carried no primary value
    MissingValue,
    /// The value is NaN or infinite and cannot be represented by the store
    NotFinite { kind: &'static str, value: f64 },
    /// The value has no supported representation at all
    UnsupportedKind { kind: String },
    /// A name or tag cannot be written as line protocol
    InvalidText {
        part: &'static str,
        text: String,
        problem: &'static str,
    },
}

/// Batch of encoded points handed to a store client in one write
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PointBatch {
    pub points: Vec<EncodedPoint>,
}

/// Encodes data points, applying the measurement prefix
#[derive(Debug, Clone, Default)]
pub struct Encoder {
    measurement_prefix: String,
}

impl Encoder {
    /// Create an encoder that prepends `measurement_prefix` to every metric name
    pub fn new<S: Into<String>>(measurement_prefix: S) -> Self {
        Self {
            measurement_prefix: measurement_prefix.into(),
        }
    }

    pub fn measurement_prefix(&self) -> &str {
        &self.measurement_prefix
    }

    /// Encode a data point, or report why it has to be dropped
    pub fn encode(&self, point: &DataPoint) -> Result<EncodedPoint, DropReason> {
        self.encode_with(point, |_, _| {})
    }

    /// Like [`Encoder::encode`], calling `on_skipped_field` for every extra
    /// field left out of the encoded point
    pub fn encode_with<F>(
        &self,
        point: &DataPoint,
        mut on_skipped_field: F,
    ) -> Result<EncodedPoint, DropReason>
    where
        F: FnMut(&str, &DropReason),
    {
        let value = encode_value(&FieldValue::from(point.value()))?;
        let measurement = point.metric().measurement(&self.measurement_prefix);
        check_text("measurement", &measurement, MEASUREMENT_SPECIAL)?;

        for (key, value) in point.tags().iter() {
            check_text("tag key", key, KEY_SPECIAL)?;
            check_text("tag value", value, KEY_SPECIAL)?;
        }

        // The store rejects empty tag keys and values
        let tags = point.tags().filtered(|key, value| {
            let keep = !key.is_empty() && !value.is_empty();
            if !keep {
                warn!(
                    "Leaving out tag '{}' of measurement {}: empty key or value",
                    key, measurement
                );
            }
            keep
        });

        let mut fields = BTreeMap::new();
        fields.insert(VALUE_FIELD.to_string(), value);

        // Extra fields go in after the primary value and may override it
        for (key, field) in point.fields() {
            match check_text("field key", key, KEY_SPECIAL).and_then(|()| encode_value(field)) {
                Ok(wire) => {
                    fields.insert(key.clone(), wire);
                }
                Err(reason) => {
                    warn!(
                        "Skipping field {:?} of measurement {}: {}",
                        key, measurement, reason
                    );
                    on_skipped_field(key, &reason);
                }
            }
        }

        Ok(EncodedPoint {
            measurement,
            tags,
            fields,
            timestamp: point.timestamp(),
        })
    }
}

fn check_text(part: &'static str, text: &str, special: &[char]) -> Result<(), DropReason> {
    match line_protocol::unwritable(text, special) {
        Some(problem) => Err(DropReason::InvalidText {
            part,
            text: text.to_string(),
            problem,
        }),
        None => Ok(()),
    }
}

/// Encode one value according to its kind
pub fn encode_value(value: &FieldValue) -> Result<WireValue, DropReason> {
    match value {
        FieldValue::String(s) => Ok(WireValue::String(s.clone())),
        FieldValue::Float(f) => finite(value.kind_name(), f64::from(f.into_inner())),
        FieldValue::Double(d) => finite(value.kind_name(), d.into_inner()),
        FieldValue::Integer(i) => Ok(WireValue::Integer(i64::from(*i))),
        FieldValue::Long(l) => Ok(WireValue::Integer(*l)),
        FieldValue::Boolean(b) => Ok(WireValue::Boolean(*b)),
    }
}

fn finite(kind: &'static str, value: f64) -> Result<WireValue, DropReason> {
    if value.is_finite() {
        Ok(WireValue::Float(value))
    } else {
        Err(DropReason::NotFinite { kind, value })
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::MissingValue => write!(f, "value is null"),
            DropReason::NotFinite { kind, value } => {
                write!(f, "{} value {} is not finite", kind, value)
            }
            DropReason::UnsupportedKind { kind } => {
                write!(f, "unable to encode value of type '{}'", kind)
            }
            DropReason::InvalidText {
                part,
                text,
                problem,
            } => write!(f, "{} {:?} {}", part, text, problem),
        }
    }
}

impl DropReason {
    /// Short label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            DropReason::MissingValue => "missing_value",
            DropReason::NotFinite { .. } => "not_finite",
            DropReason::UnsupportedKind { .. } => "unsupported_kind",
            DropReason::InvalidText { .. } => "invalid_text",
        }
    }
}

impl EncodedPoint {
    /// Render this point as a single line of line protocol
    pub fn to_line(&self) -> String {
        let mut line = String::new();
        line_protocol::write_point(&mut line, self);
        line
    }
}

impl PointBatch {
    /// Create a new empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a batch from a vector of encoded points
    pub fn from_points(points: Vec<EncodedPoint>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EncodedPoint> {
        self.points.iter()
    }

    /// Render the whole batch as newline-separated line protocol
    pub fn to_line_protocol(&self) -> String {
        line_protocol::encode_batch(&self.points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datapoint::FieldMap;

    fn point<V: Into<FieldValue>>(value: V) -> DataPoint {
        DataPoint::without_fields("cpu", TagSet::new(), 1_000, value).unwrap()
    }

    #[test]
    fn test_encode_applies_prefix_and_value_field() {
        let encoder = Encoder::new("storm-");
        let encoded = encoder.encode(&point(3i32)).unwrap();

        assert_eq!(encoded.measurement, "storm-cpu");
        assert_eq!(encoded.timestamp, 1_000);
        assert_eq!(encoded.fields.get(VALUE_FIELD), Some(&WireValue::Integer(3)));
    }

    #[test]
    fn test_float_widened_to_double() {
        let encoded = Encoder::default().encode(&point(0.25f32)).unwrap();
        assert_eq!(encoded.fields.get(VALUE_FIELD), Some(&WireValue::Float(0.25)));
    }

    #[test]
    fn test_long_is_not_rounded_through_float() {
        let big = i64::MAX - 1;
        let encoded = Encoder::default().encode(&point(big)).unwrap();
        assert_eq!(encoded.fields.get(VALUE_FIELD), Some(&WireValue::Integer(big)));
    }

    #[test]
    fn test_non_finite_floats_are_dropped() {
        let encoder = Encoder::default();
        for value in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            let reason = encoder.encode(&point(value)).unwrap_err();
            assert!(matches!(reason, DropReason::NotFinite { kind: "float", .. }));
        }
    }

    #[test]
    fn test_encode_value_per_kind() {
        assert_eq!(
            encode_value(&FieldValue::from("up")),
            Ok(WireValue::String("up".to_string()))
        );
        assert_eq!(encode_value(&FieldValue::from(true)), Ok(WireValue::Boolean(true)));
        assert_eq!(encode_value(&FieldValue::from(7i32)), Ok(WireValue::Integer(7)));
        assert_eq!(encode_value(&FieldValue::from(1.5f64)), Ok(WireValue::Float(1.5)));
        assert!(matches!(
            encode_value(&FieldValue::from(f64::NAN)),
            Err(DropReason::NotFinite { kind: "double", .. })
        ));
    }

    #[test]
    fn test_extra_fields_merged_and_non_finite_skipped() {
        let mut fields = FieldMap::new();
        fields.insert("core".to_string(), FieldValue::from(2i64));
        fields.insert("ratio".to_string(), FieldValue::from(f64::INFINITY));
        fields.insert("state".to_string(), FieldValue::from("busy"));

        let dp = DataPoint::new("cpu", TagSet::new(), fields, 5, 10i32).unwrap();
        let encoded = Encoder::default().encode(&dp).unwrap();

        assert_eq!(encoded.fields.len(), 3);
        assert_eq!(encoded.fields.get("core"), Some(&WireValue::Integer(2)));
        assert!(!encoded.fields.contains_key("ratio"));
    }

    #[test]
    fn test_explicit_value_field_overrides_primary() {
        let mut fields = FieldMap::new();
        fields.insert(VALUE_FIELD.to_string(), FieldValue::from("override"));

        let dp = DataPoint::new("cpu", TagSet::new(), fields, 5, 10i32).unwrap();
        let encoded = Encoder::default().encode(&dp).unwrap();

        assert_eq!(
            encoded.fields.get(VALUE_FIELD),
            Some(&WireValue::String("override".to_string()))
        );
    }

    #[test]
    fn test_skipped_fields_are_reported() {
        let mut fields = FieldMap::new();
        fields.insert("ratio".to_string(), FieldValue::from(f64::NAN));
        fields.insert("bad\nkey".to_string(), FieldValue::from(1i32));
        fields.insert("ok".to_string(), FieldValue::from(1i32));

        let dp = DataPoint::new("cpu", TagSet::new(), fields, 5, 10i32).unwrap();
        let mut skipped = Vec::new();
        let encoded = Encoder::default()
            .encode_with(&dp, |key, reason| skipped.push((key.to_string(), reason.label())))
            .unwrap();

        assert_eq!(
            skipped,
            vec![
                ("bad\nkey".to_string(), "invalid_text"),
                ("ratio".to_string(), "not_finite"),
            ]
        );
        assert_eq!(encoded.fields.len(), 2);
        assert!(encoded.fields.contains_key("ok"));
    }

    #[test]
    fn test_line_break_in_tag_drops_point() {
        let tags = TagSet::from_pairs(vec![("host", "a\nb")]).unwrap();
        let dp = DataPoint::without_fields("cpu", tags, 1, 1i32).unwrap();

        let reason = Encoder::default().encode(&dp).unwrap_err();
        assert_eq!(
            reason,
            DropReason::InvalidText {
                part: "tag value",
                text: "a\nb".to_string(),
                problem: "contains a line break",
            }
        );
        assert_eq!(reason.to_string(), r#"tag value "a\nb" contains a line break"#);
    }

    #[test]
    fn test_trailing_backslash_in_tag_drops_point() {
        let tags = TagSet::from_pairs(vec![("host", "a\\"), ("region", "eu")]).unwrap();
        let dp = DataPoint::without_fields("cpu", tags, 1, 1i32).unwrap();

        let reason = Encoder::default().encode(&dp).unwrap_err();
        assert_eq!(reason.label(), "invalid_text");

        let tags = TagSet::from_pairs(vec![("dir\\", "x")]).unwrap();
        let dp = DataPoint::without_fields("cpu", tags, 1, 1i32).unwrap();
        assert!(matches!(
            Encoder::default().encode(&dp),
            Err(DropReason::InvalidText { part: "tag key", .. })
        ));
    }

    #[test]
    fn test_empty_tag_values_left_out() {
        let tags = TagSet::from_pairs(vec![("host", ""), ("region", "eu")]).unwrap();
        let dp = DataPoint::without_fields("cpu", tags, 7, 1i32).unwrap();

        let encoded = Encoder::new("storm-").encode(&dp).unwrap();
        assert_eq!(encoded.tags.len(), 1);
        assert_eq!(encoded.to_line(), "storm-cpu,region=eu value=1i 7");
    }
}
