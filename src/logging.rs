//! The plugin's own leveled logger.
//!
//! Each plugin context owns a [`tracing::Dispatch`] built from a `tracing-subscriber` fmt
//! subscriber. Nothing is installed globally: code that runs inside
//! [`PluginLogger::in_scope`] emits ordinary `tracing` events, and those events are filtered
//! by the configured [`LogLevel`] and written as `key=value` lines to the logger's writer
//! (stdout unless told otherwise).
use std::fmt;
use std::str::FromStr;

use tracing::{Dispatch, Level, Span};
use tracing_subscriber::fmt::MakeWriter;

use crate::common::ConfigError;

pub(crate) const PLUGIN_NAME: &str = "dogstatsd_metrics";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "error" => Ok(Self::Error),
            "warn" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            other => Err(ConfigError::UnsupportedLogLevel(other.to_owned())),
        }
    }
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
        }
    }
}

/// Leveled logger owned by a plugin context.
#[derive(Clone)]
pub struct PluginLogger {
    dispatch: Dispatch,
    span: Span,
    level: LogLevel,
}

impl PluginLogger {
    /// Creates a logger writing to the process's standard output.
    pub fn stdout(level: LogLevel, metric: &str) -> Self {
        Self::with_writer(level, metric, std::io::stdout)
    }

    /// Creates a logger writing to an arbitrary writer.
    ///
    /// Every line is attributed to a `dogstatsd_metrics` span carrying the metric name.
    pub fn with_writer<W>(level: LogLevel, metric: &str, writer: W) -> Self
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(Level::from(level))
            .with_writer(writer)
            .with_ansi(false)
            .with_target(false)
            .finish();
        let dispatch = Dispatch::new(subscriber);
        let span = tracing::dispatcher::with_default(&dispatch, || {
            tracing::error_span!("dogstatsd_metrics", plugin = PLUGIN_NAME, metric = %metric)
        });

        PluginLogger {
            dispatch,
            span,
            level,
        }
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub(crate) fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// Runs `f` with this logger as the current `tracing` dispatcher.
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, || self.span.in_scope(f))
    }
}

impl fmt::Debug for PluginLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginLogger")
            .field("level", &self.level)
            .finish()
    }
}

/// In-memory log sink for tests.
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct CapturedLogs(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

#[cfg(test)]
impl CapturedLogs {
    pub(crate) fn logger(&self, level: LogLevel) -> PluginLogger {
        PluginLogger::with_writer(level, "test.metric", self.clone())
    }

    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

#[cfg(test)]
impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
