use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::builder::StatsdBuilder;
use crate::client::{MetricSink, StatsdClient};
use crate::common::{ConfigError, SendError};
use crate::config::{ConfigSource, MetricKind, MetricSpec, PluginConfig};
use crate::logging::PluginLogger;
use crate::record::{EventTime, Record};
use crate::tags::extract_tags;
use crate::value::{coerce_float, coerce_int, extract_value};

/// The value carried by one emission, after coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Increment,
    Decrement,
    Integer(i64),
    Float(f64),
    Member(String),
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Increment => f.write_str("+1"),
            MetricValue::Decrement => f.write_str("-1"),
            MetricValue::Integer(v) => write!(f, "{v}"),
            MetricValue::Float(v) => write!(f, "{v}"),
            MetricValue::Member(m) => f.write_str(m),
        }
    }
}

/// Everything that was sent, or attempted, for one record.
#[derive(Debug, Clone, PartialEq)]
pub struct Emission {
    pub kind: MetricKind,
    pub name: String,
    pub value: MetricValue,
    pub tags: Vec<String>,
    pub sample_rate: f64,
}

/// A record whose metric could not be handed to the transport.
#[derive(Debug, Error)]
#[error("failed to send {} metric {}: {source}", .emission.kind, .emission.name)]
pub struct DispatchError {
    pub emission: Emission,
    #[source]
    pub source: SendError,
}

pub type DispatchOutcome = Result<Emission, DispatchError>;

/// Counts of a flushed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub sent: usize,
    pub failed: usize,
}

/// The per-instance plugin state: the metric spec, the transport and the logger.
///
/// Built once when the plugin initializes and then shared by every flush. Nothing in it
/// changes between records.
pub struct PluginContext<S = StatsdClient> {
    spec: MetricSpec,
    client: S,
    logger: PluginLogger,
}

impl PluginContext<StatsdClient> {
    /// Parses the plugin configuration, starts the exporter and returns the context.
    ///
    /// ## Errors
    ///
    /// Any configuration problem is returned and the plugin must not start.
    pub fn new<C>(source: &C) -> Result<Self, ConfigError>
    where
        C: ConfigSource + ?Sized,
    {
        let PluginConfig {
            spec,
            url,
            log_level,
        } = PluginConfig::parse(source)?;
        let logger = PluginLogger::stdout(log_level, spec.name());

        let client = StatsdBuilder::new()
            .with_collector(url.as_str())?
            .set_namespace(spec.namespace())
            .with_dispatch(logger.dispatch().clone())
            .install()?;

        let context = PluginContext::with_client(spec, client, logger);
        context
            .logger
            .in_scope(|| info!(config = ?context.spec, url = %url, "init"));
        Ok(context)
    }
}

impl<S: MetricSink> PluginContext<S> {
    pub fn with_client(spec: MetricSpec, client: S, logger: PluginLogger) -> Self {
        PluginContext {
            spec,
            client,
            logger,
        }
    }

    pub fn spec(&self) -> &MetricSpec {
        &self.spec
    }

    pub fn logger(&self) -> &PluginLogger {
        &self.logger
    }

    /// Converts one record into one metric emission and reports the outcome.
    ///
    /// `tag` and `timestamp` identify the record in the log output. A failed emission is
    /// logged at error level and returned, never retried.
    pub fn dispatch(&self, tag: &str, timestamp: DateTime<Utc>, record: &Record) -> DispatchOutcome {
        self.logger.in_scope(|| {
            let outcome = self.emit(record);
            match &outcome {
                Ok(emission) => debug!(
                    metric_type = %emission.kind,
                    metric_name = %emission.name,
                    value = %emission.value,
                    tags = ?emission.tags,
                    rate = emission.sample_rate,
                    tag,
                    timestamp = %timestamp,
                    "metric sent"
                ),
                Err(err) => error!(
                    metric_type = %err.emission.kind,
                    metric_name = %err.emission.name,
                    value = %err.emission.value,
                    tags = ?err.emission.tags,
                    rate = err.emission.sample_rate,
                    err = %err.source,
                    tag,
                    timestamp = %timestamp,
                    record = ?record,
                    "send failure"
                ),
            }
            outcome
        })
    }

    /// Dispatches every event of a flushed batch.
    ///
    /// Records are independent: a failure is logged and counted, and the next record is
    /// processed as usual.
    pub fn flush<I>(&self, tag: &str, events: I) -> FlushSummary
    where
        I: IntoIterator<Item = (EventTime, Record)>,
    {
        let mut summary = FlushSummary::default();
        for (time, record) in events {
            let timestamp = time.to_datetime().unwrap_or_else(|| {
                self.logger
                    .in_scope(|| warn!(tag, "time provided invalid, defaulting to now."));
                Utc::now()
            });
            match self.dispatch(tag, timestamp, &record) {
                Ok(_) => summary.sent += 1,
                Err(_) => summary.failed += 1,
            }
        }
        summary
    }

    fn emit(&self, record: &Record) -> DispatchOutcome {
        let spec = &self.spec;
        let tags = extract_tags(spec, record);
        let raw = extract_value(spec, record);
        let (name, rate) = (spec.name(), spec.sample_rate());

        let (value, result) = match spec.kind() {
            MetricKind::CountIncrement => {
                (MetricValue::Increment, self.client.incr(name, &tags, rate))
            }
            MetricKind::CountDecrement => {
                (MetricValue::Decrement, self.client.decr(name, &tags, rate))
            }
            MetricKind::Count => {
                let v = coerce_int(&raw);
                (MetricValue::Integer(v), self.client.count(name, v, &tags, rate))
            }
            MetricKind::Gauge => {
                let v = coerce_float(&raw);
                (MetricValue::Float(v), self.client.gauge(name, v, &tags, rate))
            }
            MetricKind::Set => {
                let result = self.client.set(name, &raw, &tags, rate);
                (MetricValue::Member(raw), result)
            }
            MetricKind::Histogram => {
                let v = coerce_float(&raw);
                (MetricValue::Float(v), self.client.histogram(name, v, &tags, rate))
            }
            MetricKind::Distribution => {
                let v = coerce_float(&raw);
                (
                    MetricValue::Float(v),
                    self.client.distribution(name, v, &tags, rate),
                )
            }
        };

        let emission = Emission {
            kind: spec.kind(),
            name: name.to_owned(),
            value,
            tags,
            sample_rate: rate,
        };
        match result {
            Ok(()) => Ok(emission),
            Err(source) => Err(DispatchError { emission, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RecordingSink;
    use crate::logging::{CapturedLogs, LogLevel};
    use crate::record::FieldValue;

    fn context(
        config: &[(&str, &str)],
        sink: RecordingSink,
        logs: &CapturedLogs,
    ) -> PluginContext<RecordingSink> {
        let spec = MetricSpec::parse(config).unwrap();
        PluginContext::with_client(spec, sink, logs.logger(LogLevel::Debug))
    }

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn test_gauge() {
        let logs = CapturedLogs::default();
        let ctx = context(
            &[("metric_type", "gauge"), ("metric_name", "load"), ("value_field", "v")],
            RecordingSink::default(),
            &logs,
        );
        let record: Record = [("v", "3.5")].into_iter().collect();

        let emission = ctx.dispatch("app.logs", now(), &record).unwrap();
        assert_eq!(emission.value, MetricValue::Float(3.5));
        assert_eq!(emission.kind, MetricKind::Gauge);
        assert_eq!(emission.name, "load");
        assert_eq!(
            ctx.client.calls(),
            [("gauge".to_owned(), "3.5".to_owned(), vec![], 1.0)]
        );
    }

    #[test]
    fn test_unparsable_count_is_zero_and_logged_at_debug() {
        let logs = CapturedLogs::default();
        let ctx = context(
            &[("metric_type", "count"), ("metric_name", "bytes"), ("value_field", "v")],
            RecordingSink::default(),
            &logs,
        );
        let record: Record = [("v", "abc")].into_iter().collect();

        let emission = ctx.dispatch("app.logs", now(), &record).unwrap();
        assert_eq!(emission.value, MetricValue::Integer(0));
        assert_eq!(ctx.client.calls()[0].1, "0");

        let out = logs.contents();
        assert!(out.contains("DEBUG"));
        assert!(out.contains("metric sent"));
        assert!(!out.contains("ERROR"));
        assert!(!out.contains("WARN"));
    }

    #[test]
    fn test_set_member_is_not_coerced() {
        let logs = CapturedLogs::default();
        let ctx = context(
            &[("metric_type", "set"), ("metric_name", "sessions"), ("value_field", "v")],
            RecordingSink::default(),
            &logs,
        );
        let record: Record = [("v", "session-42")].into_iter().collect();

        let emission = ctx.dispatch("app.logs", now(), &record).unwrap();
        assert_eq!(emission.value, MetricValue::Member("session-42".to_owned()));
        assert_eq!(ctx.client.calls()[0].0, "set");
        assert_eq!(ctx.client.calls()[0].1, "session-42");
    }

    #[test]
    fn test_primitive_per_kind() {
        // (metric_type, raw value, primitive called, value handed to the primitive)
        let cases = [
            ("increment", "7", "incr", ""),
            ("decrement", "7", "decr", ""),
            ("count", "0x10", "count", "16"),
            ("histogram", "12.5", "histogram", "12.5"),
            ("distribution", "2e3", "distribution", "2000"),
        ];
        for (kind, raw, primitive, sent) in cases {
            let logs = CapturedLogs::default();
            let ctx = context(
                &[
                    ("metric_type", kind),
                    ("metric_name", "m"),
                    ("value_field", "v"),
                    ("sample_rate", "0.5"),
                ],
                RecordingSink::default(),
                &logs,
            );
            let record: Record = [("v", raw)].into_iter().collect();
            ctx.dispatch("t", now(), &record).unwrap();

            let calls = ctx.client.calls();
            assert_eq!(calls.len(), 1, "{kind}");
            assert_eq!(calls[0].0, primitive);
            assert_eq!(calls[0].1, sent);
            assert_eq!(calls[0].3, 0.5);
        }
    }

    #[test]
    fn test_tags_are_passed_through() {
        let logs = CapturedLogs::default();
        let ctx = context(
            &[
                ("metric_type", "incr"),
                ("metric_name", "requests"),
                ("metric_dynamic_tags", "user"),
                ("metric_static_tags", r#"{"env":"prod"}"#),
            ],
            RecordingSink::default(),
            &logs,
        );
        let record: Record = [("user", "alice")].into_iter().collect();

        let emission = ctx.dispatch("t", now(), &record).unwrap();
        assert_eq!(emission.tags, ["user:alice", "env:prod"]);
        assert_eq!(ctx.client.calls()[0].2, ["user:alice", "env:prod"]);
    }

    #[test]
    fn test_send_failure_is_reported() {
        let logs = CapturedLogs::default();
        let ctx = context(
            &[("metric_type", "gauge"), ("metric_name", "load"), ("value_field", "v")],
            RecordingSink::failing(),
            &logs,
        );
        let record: Record = [("v", "1.5")].into_iter().collect();

        let err = ctx.dispatch("app.logs", now(), &record).unwrap_err();
        assert_eq!(err.emission.value, MetricValue::Float(1.5));
        assert!(matches!(err.source, SendError::Io(_)));
        assert!(err.to_string().starts_with("failed to send gauge metric load"));

        let out = logs.contents();
        assert!(out.contains("ERROR"));
        assert!(out.contains("send failure"));
        assert!(out.contains("collector unreachable"));
        assert!(out.contains("tag=\"app.logs\""));
    }

    #[test]
    fn test_dispatch_is_repeatable() {
        let logs = CapturedLogs::default();
        let ctx = context(
            &[
                ("metric_type", "histogram"),
                ("metric_name", "latency"),
                ("value_field", "ms"),
                ("metric_dynamic_tags", "route"),
            ],
            RecordingSink::default(),
            &logs,
        );
        let record: Record = [("ms", "12"), ("route", "/home")].into_iter().collect();

        let first = ctx.dispatch("t", now(), &record).unwrap();
        let second = ctx.dispatch("t", now(), &record).unwrap();
        assert_eq!(first, second);

        let calls = ctx.client.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], calls[1]);
    }

    #[test]
    fn test_arbitrary_records_never_fail() {
        let logs = CapturedLogs::default();
        let ctx = context(
            &[
                ("metric_type", "gauge"),
                ("metric_name", "load"),
                ("value_field", "v"),
                ("metric_dynamic_tags", "a,b,c"),
            ],
            RecordingSink::default(),
            &logs,
        );
        let mut nested = Record::new();
        nested.insert("v", "1");
        let records = [
            Record::new(),
            [("v", "")].into_iter().collect(),
            [("v", FieldValue::Nil), ("a", FieldValue::List(vec![]))]
                .into_iter()
                .collect(),
            [("v", FieldValue::Map(nested)), ("b", FieldValue::Bool(true))]
                .into_iter()
                .collect(),
            [("v", FieldValue::Bytes(vec![0xff, 0xfe])), ("c", FieldValue::UInt(7))]
                .into_iter()
                .collect(),
        ];
        for record in &records {
            let emission = ctx.dispatch("t", now(), record).unwrap();
            assert_eq!(emission.value, MetricValue::Float(0.0));
        }
    }

    #[test]
    fn test_flush_isolates_failures() {
        let logs = CapturedLogs::default();
        let ctx = context(
            &[("metric_type", "incr"), ("metric_name", "hits")],
            RecordingSink::failing(),
            &logs,
        );
        let events = vec![
            (EventTime::Seconds(1_700_000_000), Record::new()),
            (EventTime::Invalid, Record::new()),
        ];

        let summary = ctx.flush("app.logs", events);
        assert_eq!(summary, FlushSummary { sent: 0, failed: 2 });

        let out = logs.contents();
        assert_eq!(out.matches("send failure").count(), 2);
        assert!(out.contains("time provided invalid, defaulting to now."));
        assert!(out.contains("2023-11-14"));
    }

    #[test]
    fn test_flush_counts_sent() {
        let logs = CapturedLogs::default();
        let ctx = context(
            &[("metric_type", "set"), ("metric_name", "users"), ("value_field", "user")],
            RecordingSink::default(),
            &logs,
        );
        let events = (0..3).map(|i| {
            let record: Record = [("user", format!("u{i}"))].into_iter().collect();
            (EventTime::Event { secs: 1, nanos: 0 }, record)
        });

        let summary = ctx.flush("app.logs", events);
        assert_eq!(summary, FlushSummary { sent: 3, failed: 0 });
        let members: Vec<String> = ctx.client.calls().into_iter().map(|c| c.1).collect();
        assert_eq!(members, ["u0", "u1", "u2"]);
    }

    fn plugin_config(url: &str) -> std::collections::HashMap<String, String> {
        [
            ("metric_type", "gauge"),
            ("metric_name", "load"),
            ("value_field", "v"),
            ("metric_dynamic_tags", "env"),
            ("namespace", "app"),
            ("url", url),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect()
    }

    #[tokio::test]
    async fn test_new_sends_to_collector() {
        let collector = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = collector.local_addr().unwrap();

        let ctx = PluginContext::new(&plugin_config(&addr.to_string())).unwrap();
        assert_eq!(ctx.spec().kind(), MetricKind::Gauge);
        assert_eq!(ctx.logger().level(), LogLevel::Warn);

        let record: Record = [("v", "3.5"), ("env", "prod")].into_iter().collect();
        let emission = ctx.dispatch("app.logs", now(), &record).unwrap();
        assert_eq!(emission.tags, ["env:prod"]);

        let mut buf = [0u8; 1500];
        let n = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            collector.recv(&mut buf),
        )
        .await
        .expect("datagram before timeout")
        .unwrap();
        assert_eq!(&buf[..n], b"app.load:3.5|g|#env:prod\n");
    }

    #[test]
    fn test_new_rejects_bad_config() {
        let mut config = plugin_config("127.0.0.1:8125");
        config.insert("metric_type".to_owned(), "bogus".to_owned());
        assert!(matches!(
            PluginContext::new(&config),
            Err(ConfigError::UnsupportedMetricType(_))
        ));

        let mut config = plugin_config("127.0.0.1:8125");
        config.insert("loglevel".to_owned(), "trace".to_owned());
        assert!(matches!(
            PluginContext::new(&config),
            Err(ConfigError::UnsupportedLogLevel(_))
        ));

        let config = plugin_config("not an address");
        assert!(matches!(
            PluginContext::new(&config),
            Err(ConfigError::InvalidCollectorAddress { .. })
        ));

        let mut config = plugin_config("127.0.0.1:8125");
        config.remove("value_field");
        assert!(matches!(
            PluginContext::new(&config),
            Err(ConfigError::MissingValueField(MetricKind::Gauge))
        ));
    }
}
