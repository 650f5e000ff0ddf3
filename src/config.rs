//! Plugin configuration: the flat key/value settings handed over by the host, parsed into a
//! validated [`MetricSpec`].
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::BuildHasher;
use std::str::FromStr;

use indexmap::IndexMap;
use serde_json::Value;

use crate::common::{ConfigError, UnsupportedMetricType};
use crate::logging::LogLevel;

pub const DEFAULT_COLLECTOR_URL: &str = "127.0.0.1:8125";

/// A source of raw configuration values, looked up by key.
///
/// The host exposes its plugin settings as plain strings; anything that can answer "what
/// is the raw value for this key" can feed [`MetricSpec::parse`].
pub trait ConfigSource {
    fn config_key(&self, key: &str) -> Option<&str>;
}

impl<S: BuildHasher> ConfigSource for HashMap<String, String, S> {
    fn config_key(&self, key: &str) -> Option<&str> {
        self.get(key).map(String::as_str)
    }
}

impl ConfigSource for BTreeMap<String, String> {
    fn config_key(&self, key: &str) -> Option<&str> {
        self.get(key).map(String::as_str)
    }
}

impl<'a> ConfigSource for [(&'a str, &'a str)] {
    fn config_key(&self, key: &str) -> Option<&str> {
        self.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }
}

impl<'a, const N: usize> ConfigSource for [(&'a str, &'a str); N] {
    fn config_key(&self, key: &str) -> Option<&str> {
        self.as_slice().config_key(key)
    }
}

/// The semantic type of the value a metric kind carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// Fire-and-forget, no magnitude.
    None,
    Integer,
    Float,
    /// Opaque string, sent as-is.
    Text,
}

/// The metric primitive a plugin instance emits for every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Count,
    CountIncrement,
    CountDecrement,
    Gauge,
    Set,
    Histogram,
    Distribution,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::CountIncrement => "increment",
            Self::CountDecrement => "decrement",
            Self::Gauge => "gauge",
            Self::Set => "set",
            Self::Histogram => "histogram",
            Self::Distribution => "distribution",
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Self::CountIncrement | Self::CountDecrement => ValueType::None,
            Self::Count => ValueType::Integer,
            Self::Gauge | Self::Histogram | Self::Distribution => ValueType::Float,
            Self::Set => ValueType::Text,
        }
    }

    /// Whether a `value_field` must be configured for this kind.
    ///
    /// Only magnitude-bearing kinds require one. A set without a value field records the
    /// empty member.
    pub fn requires_value(&self) -> bool {
        matches!(self.value_type(), ValueType::Integer | ValueType::Float)
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = UnsupportedMetricType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "count" => Ok(Self::Count),
            "increment" | "incr" | "count_increment" => Ok(Self::CountIncrement),
            "decrement" | "decr" | "count_decrement" => Ok(Self::CountDecrement),
            "gauge" => Ok(Self::Gauge),
            "set" => Ok(Self::Set),
            "histogram" => Ok(Self::Histogram),
            "distribution" => Ok(Self::Distribution),
            other => Err(UnsupportedMetricType(other.to_owned())),
        }
    }
}

/// The shape of the metric emitted for every record.
///
/// Built once when the plugin initializes and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSpec {
    kind: MetricKind,
    name: String,
    namespace: String,
    sample_rate: f64,
    value_field: Option<String>,
    static_tags: IndexMap<String, String>,
    dynamic_tags: Vec<String>,
}

impl MetricSpec {
    /// Parses and validates the metric settings.
    ///
    /// ## Errors
    ///
    /// Returns an error when `metric_type` or `metric_name` are missing, the type is not
    /// supported, `sample_rate` is malformed or outside `(0, 1]`, `metric_static_tags` is not
    /// a JSON object, or a magnitude-bearing kind has no `value_field`.
    pub fn parse<C>(source: &C) -> Result<Self, ConfigError>
    where
        C: ConfigSource + ?Sized,
    {
        let metric_type = string_conf(source, "metric_type", "");
        if metric_type.is_empty() {
            return Err(ConfigError::MissingKey("metric_type"));
        }
        let name = string_conf(source, "metric_name", "");
        if name.is_empty() {
            return Err(ConfigError::MissingKey("metric_name"));
        }
        let kind = metric_type.parse::<MetricKind>()?;

        let sample_rate = parse_sample_rate(&string_conf(source, "sample_rate", ""))?;
        let static_tags = map_conf(source, "metric_static_tags")?;
        let dynamic_tags = slice_conf(source, "metric_dynamic_tags");
        let namespace = string_conf(source, "namespace", "");

        let value_field = Some(string_conf(source, "value_field", "")).filter(|f| !f.is_empty());
        if kind.requires_value() && value_field.is_none() {
            return Err(ConfigError::MissingValueField(kind));
        }

        Ok(MetricSpec {
            kind,
            name,
            namespace,
            sample_rate,
            value_field,
            static_tags,
            dynamic_tags,
        })
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Prefix applied by the client to every metric name. May be empty.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn value_field(&self) -> Option<&str> {
        self.value_field.as_deref()
    }

    pub fn static_tags(&self) -> &IndexMap<String, String> {
        &self.static_tags
    }

    pub fn dynamic_tags(&self) -> &[String] {
        &self.dynamic_tags
    }
}

/// Everything the plugin reads from its configuration: the metric shape plus the collector
/// address and log level.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginConfig {
    pub spec: MetricSpec,
    pub url: String,
    pub log_level: LogLevel,
}

impl PluginConfig {
    pub fn parse<C>(source: &C) -> Result<Self, ConfigError>
    where
        C: ConfigSource + ?Sized,
    {
        let spec = MetricSpec::parse(source)?;
        let url = string_conf(source, "url", DEFAULT_COLLECTOR_URL);
        let log_level = string_conf(source, "loglevel", LogLevel::default().as_str()).parse()?;
        Ok(PluginConfig {
            spec,
            url,
            log_level,
        })
    }
}

fn trim_raw(raw: &str) -> &str {
    raw.trim().trim_matches('"')
}

/// Scalar settings are case-insensitive: they are trimmed and lower-cased.
fn string_conf<C>(source: &C, key: &str, default: &str) -> String
where
    C: ConfigSource + ?Sized,
{
    let value = source.config_key(key).map(trim_raw).unwrap_or_default();
    if value.is_empty() {
        default.to_lowercase()
    } else {
        value.to_lowercase()
    }
}

fn slice_conf<C>(source: &C, key: &str) -> Vec<String>
where
    C: ConfigSource + ?Sized,
{
    let value = source.config_key(key).unwrap_or_default().trim();
    if value.is_empty() {
        return Vec::new();
    }
    value
        .split(',')
        .map(trim_raw)
        .filter(|entry| !entry.is_empty())
        .map(str::to_owned)
        .collect()
}

fn map_conf<C>(source: &C, key: &str) -> Result<IndexMap<String, String>, ConfigError>
where
    C: ConfigSource + ?Sized,
{
    let value = source.config_key(key).unwrap_or_default().trim();
    if value.is_empty() {
        return Ok(IndexMap::new());
    }
    let parsed: Value =
        serde_json::from_str(value).map_err(|e| ConfigError::InvalidStaticTags(e.to_string()))?;
    match parsed {
        Value::Object(map) => Ok(map
            .into_iter()
            .map(|(k, v)| (k, stringify_json(v)))
            .collect()),
        other => Err(ConfigError::InvalidStaticTags(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}

fn stringify_json(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn parse_sample_rate(raw: &str) -> Result<f64, ConfigError> {
    if raw.is_empty() {
        return Ok(1.0);
    }
    let invalid = |reason: String| ConfigError::InvalidSampleRate {
        value: raw.to_owned(),
        reason,
    };
    let rate = raw.parse::<f64>().map_err(|e| invalid(e.to_string()))?;
    if !rate.is_finite() || rate <= 0.0 || rate > 1.0 {
        return Err(invalid("must be within (0, 1]".to_owned()));
    }
    Ok(rate)
}
