//! Data point types and operations

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{InfluxError, InfluxResult};
use crate::metrics::MetricName;
use crate::tags::TagSet;

/// Additional named values recorded alongside the primary value
pub type FieldMap = BTreeMap<String, FieldValue>;

/// Scalar value kinds a record may carry, either as a primary value or as
/// an additional field.
///
/// Floats are wrapped in `OrderedFloat` so that data points can be compared
/// and hashed, which the batch accumulator relies on for de-duplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldValue {
    /// 32-bit signed integer
    Integer(i32),

    /// 64-bit signed integer
    Long(i64),

    /// Single-precision float
    Float(OrderedFloat<f32>),

    /// Double-precision float
    Double(OrderedFloat<f64>),

    Boolean(bool),

    String(String),
}

/// The primary observation of a data point.
///
/// Deliberately narrower than [`FieldValue`]: the store accepts doubles,
/// booleans and strings, but a data point's primary value must be one of
/// these three kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PointValue {
    Integer(i32),
    Long(i64),
    Float(OrderedFloat<f32>),
}

/// A single immutable metric observation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataPoint {
    metric: MetricName,
    tags: TagSet,
    fields: FieldMap,
    /// Nanoseconds since the Unix epoch
    timestamp: i64,
    value: PointValue,
}

impl FieldValue {
    /// Name of the value kind, used in errors and drop warnings
    pub fn kind_name(&self) -> &'static str {
        match self {
            FieldValue::Integer(_) => "integer",
            FieldValue::Long(_) => "long",
            FieldValue::Float(_) => "float",
            FieldValue::Double(_) => "double",
            FieldValue::Boolean(_) => "boolean",
            FieldValue::String(_) => "string",
        }
    }

    /// Check if this is a numeric value
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldValue::Integer(_)
                | FieldValue::Long(_)
                | FieldValue::Float(_)
                | FieldValue::Double(_)
        )
    }

    /// Convert to f64 if numeric
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(v) => Some(f64::from(*v)),
            FieldValue::Long(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(f64::from(v.into_inner())),
            FieldValue::Double(v) => Some(v.into_inner()),
            _ => None,
        }
    }

    /// Convert a JSON scalar into a field value.
    ///
    /// Integral numbers become `Long`, other numbers `Double`. Returns `None`
    /// for null, arrays and objects, which have no field representation.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(FieldValue::Boolean(*b)),
            serde_json::Value::String(s) => Some(FieldValue::String(s.clone())),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Some(FieldValue::Long(i)),
                None => n.as_f64().map(|f| FieldValue::Double(OrderedFloat(f))),
            },
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Integer(v) => write!(f, "{}", v),
            FieldValue::Long(v) => write!(f, "{}", v),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Double(v) => write!(f, "{}", v),
            FieldValue::Boolean(v) => write!(f, "{}", v),
            FieldValue::String(v) => write!(f, "{:?}", v),
        }
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Long(v)
    }
}

impl From<f32> for FieldValue {
    fn from(v: f32) -> Self {
        FieldValue::Float(OrderedFloat(v))
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Double(OrderedFloat(v))
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Boolean(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<PointValue> for FieldValue {
    fn from(v: PointValue) -> Self {
        match v {
            PointValue::Integer(i) => FieldValue::Integer(i),
            PointValue::Long(l) => FieldValue::Long(l),
            PointValue::Float(f) => FieldValue::Float(f),
        }
    }
}

impl TryFrom<FieldValue> for PointValue {
    type Error = InfluxError;

    fn try_from(value: FieldValue) -> InfluxResult<Self> {
        match value {
            FieldValue::Integer(i) => Ok(PointValue::Integer(i)),
            FieldValue::Long(l) => Ok(PointValue::Long(l)),
            FieldValue::Float(f) => Ok(PointValue::Float(f)),
            other => Err(InfluxError::unsupported_value(
                other.kind_name(),
                format!(
                    "Received record contains unsupported value: {}. It must be Integer/Long/Float.",
                    other
                ),
            )),
        }
    }
}

impl PointValue {
    /// Name of the value kind
    pub fn kind_name(&self) -> &'static str {
        match self {
            PointValue::Integer(_) => "integer",
            PointValue::Long(_) => "long",
            PointValue::Float(_) => "float",
        }
    }
}

impl fmt::Display for PointValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        FieldValue::from(*self).fmt(f)
    }
}

impl DataPoint {
    /// Create a new data point.
    ///
    /// Fails if the metric name is empty, a field key is empty, or `value`
    /// is not an integer, long or float. The error names the rejected kind.
    pub fn new<M, V>(
        metric: M,
        tags: TagSet,
        fields: FieldMap,
        timestamp: i64,
        value: V,
    ) -> InfluxResult<Self>
    where
        M: Into<String>,
        V: Into<FieldValue>,
    {
        let metric = MetricName::new(metric)?;
        let value = PointValue::try_from(value.into())?;

        if fields.keys().any(String::is_empty) {
            return Err(InfluxError::validation("Field key cannot be empty"));
        }

        Ok(Self {
            metric,
            tags,
            fields,
            timestamp,
            value,
        })
    }

    /// Create a data point without additional fields
    pub fn without_fields<M, V>(metric: M, tags: TagSet, timestamp: i64, value: V) -> InfluxResult<Self>
    where
        M: Into<String>,
        V: Into<FieldValue>,
    {
        Self::new(metric, tags, FieldMap::new(), timestamp, value)
    }

    pub fn metric(&self) -> &MetricName {
        &self.metric
    }

    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    /// Timestamp in nanoseconds since the Unix epoch
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn value(&self) -> PointValue {
        self.value
    }
}

impl fmt::Display for DataPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DataPoint{{metric='{}', tags={}, fields={}, timestamp={}, value={}}}",
            self.metric,
            self.tags,
            self.fields.len(),
            self.timestamp,
            self.value
        )
    }
}
