//! Turns structured log records into statsd/datadog metrics, one metric per record.
//!
//! ## Basics
//!
//! `fluent-bit-dogstatsd` is the core of a log-processing output plugin: the host decodes
//! log records and hands them over in batches, and every record becomes exactly one metric
//! emission (a counter, gauge, set, histogram or distribution) pushed to a statsd or datadog
//! agent over UDP.
//!
//! ## High-level features
//!
//! - one metric shape per plugin instance, configured from flat key/value settings
//! - tags taken from record fields (dynamic tags) and from a fixed JSON map (static tags)
//! - metric value taken from a record field and coerced to the kind's value type
//! - client-side sampling and a configurable namespace prefix
//! - leveled `key=value` logging to stdout, owned by the plugin instance
//!
//! ## Behavior
//!
//! This crate makes some explicit trade-offs to accomplish its task:
//!
//! - Configuration problems are fatal: the plugin refuses to start
//! - Per-record problems never are. A record whose metric cannot be sent is logged at error
//!   level and dropped; the next record is processed as usual
//! - A numeric value that does not parse is sent as `0` without any diagnostic, while a
//!   tag or value field holding a non-string value is skipped with a warning
//! - Emissions are queued to a background exporter and sent fire-and-forget: there is no
//!   retry and no delivery acknowledgment
//! - Static tags are emitted after dynamic tags, in no particular order among themselves
//!
//! ## Configuration
//!
//! | key                   | meaning                                               | default          |
//! |-----------------------|-------------------------------------------------------|------------------|
//! | `metric_type`         | `count`, `increment`, `decrement`, `gauge`, `set`, `histogram` or `distribution` | required |
//! | `metric_name`         | metric name                                           | required         |
//! | `value_field`         | record field holding the value                        | required for magnitudes |
//! | `metric_dynamic_tags` | comma-separated record fields to use as tags          | none             |
//! | `metric_static_tags`  | JSON object of fixed tags                             | none             |
//! | `sample_rate`         | sampling probability in `(0, 1]`                      | `1`              |
//! | `namespace`           | prefix for the metric name                            | none             |
//! | `url`                 | collector address                                     | `127.0.0.1:8125` |
//! | `loglevel`            | `error`, `warn`, `info` or `debug`                    | `warn`           |
//!
//! ## Usage
//!
//! ```ignore
//! // Build the context once, when the host initializes the plugin. This parses the
//! // configuration, sets up the logger and starts the exporter.
//! let context = PluginContext::new(&settings)?;
//!
//! // Then, for every batch the host flushes, normalise the decoded events and dispatch them.
//! let events = decoded.into_iter().filter_map(|(time, value)| {
//!     Record::from_msgpack(value).map(|record| (EventTime::from(&time), record))
//! });
//! let summary = context.flush("app.logs", events);
//! ```
mod common;
pub use self::common::{ConfigError, SendError, UnsupportedMetricType};

mod config;
pub use self::config::{
    ConfigSource, MetricKind, MetricSpec, PluginConfig, ValueType, DEFAULT_COLLECTOR_URL,
};

mod builder;
pub use self::builder::StatsdBuilder;

mod client;
pub use self::client::{MetricSink, StatsdClient};

mod dispatch;
pub use self::dispatch::{
    DispatchError, DispatchOutcome, Emission, FlushSummary, MetricValue, PluginContext,
};

pub mod formatting;

mod logging;
pub use self::logging::{LogLevel, PluginLogger};

mod record;
pub use self::record::{EventTime, FieldValue, Record};

mod tags;
pub use self::tags::extract_tags;

mod value;
pub use self::value::{coerce_float, coerce_int, extract_value};
