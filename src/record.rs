//! The record model: dynamically typed field values as decoded by the host.
use std::borrow::Cow;

use chrono::{DateTime, TimeZone, Utc};
use indexmap::IndexMap;
use rmpv::{Utf8String, Value};

/// msgpack extension type used by Fluent Bit for event timestamps.
const EVENT_TIME_EXT_TYPE: i8 = 0;

/// A single field value of a record.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Nil,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<FieldValue>),
    Map(Record),
    Ext(i8, Vec<u8>),
}

impl FieldValue {
    /// Returns the value as text if it is a string.
    ///
    /// Raw bytes count as a string and are decoded as UTF-8 (invalid sequences are
    /// replaced). Every other variant yields `None`.
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            FieldValue::Str(s) => Some(Cow::Borrowed(s.as_str())),
            FieldValue::Bytes(b) => Some(String::from_utf8_lossy(b)),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Nil => "nil",
            FieldValue::Bool(_) => "bool",
            FieldValue::Int(_) | FieldValue::UInt(_) => "integer",
            FieldValue::Float(_) => "float",
            FieldValue::Str(_) => "string",
            FieldValue::Bytes(_) => "bytes",
            FieldValue::List(_) => "list",
            FieldValue::Map(_) => "map",
            FieldValue::Ext(..) => "ext",
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Str(s.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Str(s)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(v: Vec<u8>) -> Self {
        FieldValue::Bytes(v)
    }
}

impl From<Record> for FieldValue {
    fn from(r: Record) -> Self {
        FieldValue::Map(r)
    }
}

impl From<Value> for FieldValue {
    /// Binary payloads become strings so that they surface as text rather than an
    /// encoded form, and strings with invalid UTF-8 are decoded lossily. Maps drop every
    /// entry whose key is not a string.
    fn from(value: Value) -> Self {
        match value {
            Value::Nil => FieldValue::Nil,
            Value::Boolean(b) => FieldValue::Bool(b),
            Value::Integer(i) => match i.as_i64() {
                Some(v) => FieldValue::Int(v),
                None => i.as_u64().map(FieldValue::UInt).unwrap_or(FieldValue::Nil),
            },
            Value::F32(f) => FieldValue::Float(f64::from(f)),
            Value::F64(f) => FieldValue::Float(f),
            Value::String(s) => FieldValue::Str(lossy_string(s)),
            Value::Binary(b) => FieldValue::Str(String::from_utf8_lossy(&b).into_owned()),
            Value::Array(items) => FieldValue::List(items.into_iter().map(Into::into).collect()),
            Value::Map(entries) => FieldValue::Map(Record::from_entries(entries)),
            Value::Ext(ty, data) => FieldValue::Ext(ty, data),
        }
    }
}

fn lossy_string(s: Utf8String) -> String {
    match s.as_str() {
        Some(valid) => valid.to_owned(),
        None => String::from_utf8_lossy(s.as_bytes()).into_owned(),
    }
}

/// One structured log entry: field name to value, in the order the host produced them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: IndexMap<String, FieldValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalises a host-decoded msgpack map into a record.
    ///
    /// Returns `None` if `value` is not a map.
    pub fn from_msgpack(value: Value) -> Option<Self> {
        match value {
            Value::Map(entries) => Some(Self::from_entries(entries)),
            _ => None,
        }
    }

    fn from_entries(entries: Vec<(Value, Value)>) -> Self {
        let fields = entries
            .into_iter()
            .filter_map(|(k, v)| match k {
                Value::String(s) => Some((lossy_string(s), FieldValue::from(v))),
                _ => None,
            })
            .collect();
        Record { fields }
    }

    pub fn insert<K, V>(&mut self, key: K, value: V) -> Option<FieldValue>
    where
        K: Into<String>,
        V: Into<FieldValue>,
    {
        self.fields.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K, V> FromIterator<(K, V)> for Record
where
    K: Into<String>,
    V: Into<FieldValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Record {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// The timestamp the host attached to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTime {
    /// Fluent Bit event time: seconds and nanoseconds since the epoch.
    Event { secs: u32, nanos: u32 },
    /// Whole seconds since the epoch.
    Seconds(u64),
    Invalid,
}

impl EventTime {
    /// Converts to a UTC datetime, or `None` if the timestamp is invalid or out of range.
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        match self {
            EventTime::Event { secs, nanos } => Utc.timestamp_opt(i64::from(secs), nanos).single(),
            EventTime::Seconds(secs) => {
                let secs = i64::try_from(secs).ok()?;
                Utc.timestamp_opt(secs, 0).single()
            }
            EventTime::Invalid => None,
        }
    }
}

impl From<&Value> for EventTime {
    fn from(value: &Value) -> Self {
        match value {
            Value::Ext(EVENT_TIME_EXT_TYPE, data) if data.len() == 8 => {
                let secs = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
                let nanos = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
                EventTime::Event { secs, nanos }
            }
            Value::Integer(i) => i.as_u64().map(EventTime::Seconds).unwrap_or(EventTime::Invalid),
            _ => EventTime::Invalid,
        }
    }
}
