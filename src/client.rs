use tokio::sync::mpsc::UnboundedSender;

use crate::common::SendError;
use crate::formatting::{sanitize_set_member, write_metric_line};

/// The metric emission primitives the dispatcher calls into.
///
/// Every call takes the metric name, its tags and a sample rate, and reports whether the
/// emission was accepted. Acceptance is the only signal available: delivery is never
/// acknowledged.
pub trait MetricSink {
    /// Adds one to a counter.
    fn incr(&self, name: &str, tags: &[String], rate: f64) -> Result<(), SendError>;

    /// Subtracts one from a counter.
    fn decr(&self, name: &str, tags: &[String], rate: f64) -> Result<(), SendError>;

    fn count(&self, name: &str, value: i64, tags: &[String], rate: f64) -> Result<(), SendError>;

    fn gauge(&self, name: &str, value: f64, tags: &[String], rate: f64) -> Result<(), SendError>;

    /// Records `value` as a member of a set of unique values.
    fn set(&self, name: &str, value: &str, tags: &[String], rate: f64) -> Result<(), SendError>;

    fn histogram(&self, name: &str, value: f64, tags: &[String], rate: f64)
        -> Result<(), SendError>;

    fn distribution(
        &self,
        name: &str,
        value: f64,
        tags: &[String],
        rate: f64,
    ) -> Result<(), SendError>;
}

/// A dogstatsd client.
///
/// Each emission is rendered to a single line and queued to the exporter task created by
/// [`StatsdBuilder`](crate::StatsdBuilder), which packs lines into datagrams and sends them
/// to the collector. Emissions with a sample rate below 1 are sampled on the client side.
#[derive(Clone, Debug)]
pub struct StatsdClient {
    namespace: Option<String>,
    sender: UnboundedSender<String>,
}

impl StatsdClient {
    pub(crate) fn new(namespace: Option<String>, sender: UnboundedSender<String>) -> Self {
        StatsdClient { namespace, sender }
    }

    /// Returns `true` once the exporter has stopped accepting metrics.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    fn submit<T>(
        &self,
        name: &str,
        value: T,
        mtype: &str,
        tags: &[String],
        rate: f64,
    ) -> Result<(), SendError>
    where
        T: std::fmt::Display,
    {
        if !should_sample(rate) {
            return Ok(());
        }
        let mut line = String::new();
        write_metric_line(
            &mut line,
            self.namespace.as_deref(),
            name,
            mtype,
            tags,
            value,
            rate,
        );
        self.sender.send(line).map_err(|_| SendError::Closed)
    }
}

fn should_sample(rate: f64) -> bool {
    rate >= 1.0 || fastrand::f64() < rate
}

impl MetricSink for StatsdClient {
    fn incr(&self, name: &str, tags: &[String], rate: f64) -> Result<(), SendError> {
        self.submit(name, 1, "c", tags, rate)
    }

    fn decr(&self, name: &str, tags: &[String], rate: f64) -> Result<(), SendError> {
        self.submit(name, -1, "c", tags, rate)
    }

    fn count(&self, name: &str, value: i64, tags: &[String], rate: f64) -> Result<(), SendError> {
        self.submit(name, value, "c", tags, rate)
    }

    fn gauge(&self, name: &str, value: f64, tags: &[String], rate: f64) -> Result<(), SendError> {
        self.submit(name, value, "g", tags, rate)
    }

    fn set(&self, name: &str, value: &str, tags: &[String], rate: f64) -> Result<(), SendError> {
        self.submit(name, sanitize_set_member(value), "s", tags, rate)
    }

    fn histogram(
        &self,
        name: &str,
        value: f64,
        tags: &[String],
        rate: f64,
    ) -> Result<(), SendError> {
        self.submit(name, value, "h", tags, rate)
    }

    fn distribution(
        &self,
        name: &str,
        value: f64,
        tags: &[String],
        rate: f64,
    ) -> Result<(), SendError> {
        self.submit(name, value, "d", tags, rate)
    }
}

/// A sink that remembers every call, optionally failing them all.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingSink {
    pub(crate) calls: std::sync::Mutex<Vec<(String, String, Vec<String>, f64)>>,
    pub(crate) fail: bool,
}

#[cfg(test)]
impl RecordingSink {
    pub(crate) fn failing() -> Self {
        RecordingSink {
            fail: true,
            ..Default::default()
        }
    }

    pub(crate) fn calls(&self) -> Vec<(String, String, Vec<String>, f64)> {
        self.calls.lock().unwrap().clone()
    }

    fn record(
        &self,
        primitive: &str,
        value: String,
        tags: &[String],
        rate: f64,
    ) -> Result<(), SendError> {
        if self.fail {
            return Err(SendError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "collector unreachable",
            )));
        }
        self.calls
            .lock()
            .unwrap()
            .push((primitive.to_owned(), value, tags.to_vec(), rate));
        Ok(())
    }
}

#[cfg(test)]
impl MetricSink for RecordingSink {
    fn incr(&self, _name: &str, tags: &[String], rate: f64) -> Result<(), SendError> {
        self.record("incr", String::new(), tags, rate)
    }

    fn decr(&self, _name: &str, tags: &[String], rate: f64) -> Result<(), SendError> {
        self.record("decr", String::new(), tags, rate)
    }

    fn count(&self, _name: &str, value: i64, tags: &[String], rate: f64) -> Result<(), SendError> {
        self.record("count", value.to_string(), tags, rate)
    }

    fn gauge(&self, _name: &str, value: f64, tags: &[String], rate: f64) -> Result<(), SendError> {
        self.record("gauge", value.to_string(), tags, rate)
    }

    fn set(&self, _name: &str, value: &str, tags: &[String], rate: f64) -> Result<(), SendError> {
        self.record("set", value.to_owned(), tags, rate)
    }

    fn histogram(
        &self,
        _name: &str,
        value: f64,
        tags: &[String],
        rate: f64,
    ) -> Result<(), SendError> {
        self.record("histogram", value.to_string(), tags, rate)
    }

    fn distribution(
        &self,
        _name: &str,
        value: f64,
        tags: &[String],
        rate: f64,
    ) -> Result<(), SendError> {
        self.record("distribution", value.to_string(), tags, rate)
    }
}
