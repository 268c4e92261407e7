//! Conversion of upstream records into metric points
//!
//! A [`PointMapper`] turns one record into one [`MappedPoint`]. Engines can
//! run several mappers per record to extract several points from it.

use chrono::Utc;
use influxdb_core::{
    datapoint::{FieldMap, FieldValue},
    error::{InfluxError, InfluxResult},
    tags::TagSet,
};
use serde_json::{Map, Value};
use std::fmt;
use tracing::warn;

use crate::config::MapperConfig;

/// Primary value as extracted from a record, before any validation
#[derive(Debug, Clone, PartialEq)]
pub enum MappedValue {
    Present(FieldValue),
    /// The record has no value, or it is null
    Missing,
    /// The value exists but has no scalar representation
    Unsupported { kind: String },
}

/// Raw parts of a data point extracted from a record
#[derive(Debug, Clone, PartialEq)]
pub struct MappedPoint {
    pub metric: String,
    pub tags: TagSet,
    pub fields: FieldMap,
    /// Nanoseconds since the Unix epoch
    pub timestamp: i64,
    pub value: MappedValue,
}

/// Converts a record into the parts of one data point.
///
/// An error here is an accumulation-time failure and fails the whole
/// current batch.
pub trait PointMapper<R>: Send + Sync {
    fn map(&self, record: &R) -> InfluxResult<MappedPoint>;
}

impl<R, F> PointMapper<R> for F
where
    F: Fn(&R) -> InfluxResult<MappedPoint> + Send + Sync,
{
    fn map(&self, record: &R) -> InfluxResult<MappedPoint> {
        self(record)
    }
}

/// A JSON document received from upstream, identified by its position in
/// the input stream
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRecord {
    pub offset: u64,
    pub payload: Value,
}

impl JsonRecord {
    pub fn new(offset: u64, payload: Value) -> Self {
        Self { offset, payload }
    }
}

impl fmt::Display for JsonRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "record #{}", self.offset)
    }
}

/// Maps JSON records by looking up configurable field names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonFieldMapper {
    metric_field: String,
    timestamp_field: String,
    tags_field: String,
    fields_field: Option<String>,
    value_field: String,
}

impl Default for JsonFieldMapper {
    /// Reads `metric`, `timestamp`, `tags`, `fields` and `value`
    fn default() -> Self {
        Self::from_config(&MapperConfig::default())
    }
}

impl JsonFieldMapper {
    pub fn new<S: Into<String>>(
        metric_field: S,
        timestamp_field: S,
        tags_field: S,
        fields_field: Option<S>,
        value_field: S,
    ) -> Self {
        Self {
            metric_field: metric_field.into(),
            timestamp_field: timestamp_field.into(),
            tags_field: tags_field.into(),
            fields_field: fields_field.map(Into::into),
            value_field: value_field.into(),
        }
    }

    pub fn from_config(config: &MapperConfig) -> Self {
        Self {
            metric_field: config.metric_field.clone(),
            timestamp_field: config.timestamp_field.clone(),
            tags_field: config.tags_field.clone(),
            fields_field: config.fields_field.clone(),
            value_field: config.value_field.clone(),
        }
    }

    /// Same mapper, ignoring any additional fields in the record
    pub fn without_fields(mut self) -> Self {
        self.fields_field = None;
        self
    }

    pub fn metric_field(&self) -> &str {
        &self.metric_field
    }

    pub fn value_field(&self) -> &str {
        &self.value_field
    }

    fn map_object(&self, object: &Map<String, Value>) -> InfluxResult<MappedPoint> {
        let metric = match object.get(&self.metric_field) {
            Some(Value::String(s)) => s.clone(),
            _ => {
                return Err(InfluxError::mapping(format!(
                    "Record has no string field '{}'",
                    self.metric_field
                )))
            }
        };

        let tags = match object.get(&self.tags_field) {
            None | Some(Value::Null) => TagSet::new(),
            Some(Value::Object(map)) => map_tags(map)?,
            Some(other) => {
                return Err(InfluxError::mapping(format!(
                    "Field '{}' must be an object, got {}",
                    self.tags_field,
                    json_kind(other)
                )))
            }
        };

        let fields = match self.fields_field.as_ref().and_then(|f| object.get(f)) {
            None | Some(Value::Null) => FieldMap::new(),
            Some(Value::Object(map)) => map_fields(&metric, map),
            Some(other) => {
                return Err(InfluxError::mapping(format!(
                    "Fields must be an object, got {}",
                    json_kind(other)
                )))
            }
        };

        let timestamp = match object.get(&self.timestamp_field) {
            None | Some(Value::Null) => now_nanos(),
            Some(Value::Number(n)) => n.as_i64().ok_or_else(|| {
                InfluxError::mapping(format!(
                    "Field '{}' must be an integer nanosecond timestamp, got {}",
                    self.timestamp_field, n
                ))
            })?,
            Some(other) => {
                return Err(InfluxError::mapping(format!(
                    "Field '{}' must be an integer, got {}",
                    self.timestamp_field,
                    json_kind(other)
                )))
            }
        };

        let value = match object.get(&self.value_field) {
            None | Some(Value::Null) => MappedValue::Missing,
            Some(Value::Number(n)) => MappedValue::Present(narrow_number(n)),
            Some(Value::Bool(b)) => MappedValue::Present(FieldValue::Boolean(*b)),
            Some(Value::String(s)) => MappedValue::Present(FieldValue::String(s.clone())),
            Some(other) => MappedValue::Unsupported {
                kind: json_kind(other).to_string(),
            },
        };

        Ok(MappedPoint {
            metric,
            tags,
            fields,
            timestamp,
            value,
        })
    }
}

impl PointMapper<JsonRecord> for JsonFieldMapper {
    fn map(&self, record: &JsonRecord) -> InfluxResult<MappedPoint> {
        match &record.payload {
            Value::Object(object) => self.map_object(object),
            other => Err(InfluxError::mapping(format!(
                "{} is not a JSON object but {}",
                record,
                json_kind(other)
            ))),
        }
    }
}

fn map_tags(map: &Map<String, Value>) -> InfluxResult<TagSet> {
    let mut pairs = Vec::with_capacity(map.len());
    for (key, value) in map {
        let value = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null => continue,
            other => {
                return Err(InfluxError::mapping(format!(
                    "Tag '{}' must be a scalar, got {}",
                    key,
                    json_kind(other)
                )))
            }
        };
        pairs.push((key.clone(), value));
    }
    TagSet::from_pairs(pairs)
}

fn map_fields(metric: &str, map: &Map<String, Value>) -> FieldMap {
    let mut fields = FieldMap::new();
    for (key, value) in map {
        match FieldValue::from_json(value) {
            Some(field) => {
                fields.insert(key.clone(), field);
            }
            None => warn!(
                "Skipping field '{}' of metric {}: unsupported type '{}'",
                key,
                metric,
                json_kind(value)
            ),
        }
    }
    fields
}

/// Narrow a JSON number into one of the primary value kinds
fn narrow_number(n: &serde_json::Number) -> FieldValue {
    match n.as_i64() {
        Some(i) => match i32::try_from(i) {
            Ok(small) => FieldValue::Integer(small),
            Err(_) => FieldValue::Long(i),
        },
        // Single precision is the only float kind a primary value may have
        None => FieldValue::from(n.as_f64().unwrap_or(f64::NAN) as f32),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn now_nanos() -> i64 {
    let now = Utc::now();
    now.timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_millis().saturating_mul(1_000_000))
}
