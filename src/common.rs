use std::io;

use thiserror::Error;

use crate::config::MetricKind;

/// Errors that can occur while building a plugin context from its configuration.
///
/// Every variant is fatal: a plugin that fails to build never processes a record.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A mandatory configuration key was absent or empty.
    #[error("{0} is required")]
    MissingKey(&'static str),

    /// The configured metric type is not one of the supported kinds.
    #[error(transparent)]
    UnsupportedMetricType(#[from] UnsupportedMetricType),

    /// The sample rate could not be parsed, or fell outside `(0, 1]`.
    #[error("invalid sample_rate {value:?}: {reason}")]
    InvalidSampleRate { value: String, reason: String },

    /// `metric_static_tags` was not a JSON object.
    #[error("invalid metric_static_tags: {0}")]
    InvalidStaticTags(String),

    /// The metric kind carries a magnitude, but no `value_field` was configured.
    #[error("value_field is required for {0} metric")]
    MissingValueField(MetricKind),

    /// The configured log level is not one of `error`, `warn`, `info` or `debug`.
    #[error("log level {0} is not supported")]
    UnsupportedLogLevel(String),

    /// The collector address could not be resolved to a socket address.
    #[error("invalid collector address {address:?}: {reason}")]
    InvalidCollectorAddress { address: String, reason: String },

    /// The builder was asked to build an exporter without a collector address.
    #[error("no collector address configured")]
    MissingCollector,

    /// The background runtime or its thread could not be created.
    #[error("failed to create exporter runtime: {0}")]
    FailedToCreateRuntime(String),
}

/// Raised when a metric type name does not match any supported kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported metric type {0}")]
pub struct UnsupportedMetricType(pub String);

/// Errors returned by a metric emission call.
#[derive(Debug, Error)]
pub enum SendError {
    /// The exporter task has stopped and no longer accepts metrics.
    #[error("metric exporter is closed")]
    Closed,

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            ConfigError::MissingKey("metric_name").to_string(),
            "metric_name is required"
        );
        assert_eq!(
            ConfigError::MissingValueField(MetricKind::Gauge).to_string(),
            "value_field is required for gauge metric"
        );

        let err: ConfigError = UnsupportedMetricType("bogus".to_owned()).into();
        assert_eq!(err.to_string(), "unsupported metric type bogus");
    }
}
