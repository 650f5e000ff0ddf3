use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::pin::Pin;
use std::thread;
use std::time::Duration;

use quanta::{Clock, Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::{net::UdpSocket, runtime};
use tracing::instrument::WithSubscriber;
use tracing::{error, warn, Dispatch};

use crate::client::StatsdClient;
use crate::common::ConfigError;

type ExporterFuture = Pin<Box<dyn Future<Output = io::Result<()>> + Send + 'static>>;

const DEFAULT_MAX_PACKET_SIZE: usize = 1432;
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);
const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);
const ERROR_REPORT_INTERVAL: Duration = Duration::from_secs(60);

/// Builder for creating a [`StatsdClient`] and the exporter task that feeds the collector.
pub struct StatsdBuilder {
    endpoint: Option<SocketAddr>,
    namespace: Option<String>,
    max_packet_size: usize,
    flush_interval: Duration,
    dispatch: Option<Dispatch>,
    clock: Clock,
}

impl StatsdBuilder {
    /// Creates a new [`StatsdBuilder`].
    pub fn new() -> Self {
        Self {
            endpoint: None,
            namespace: None,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            dispatch: None,
            clock: Clock::new(),
        }
    }

    /// Configures the collector the exporter sends datagrams to.
    ///
    /// The address is resolved once, here.
    ///
    /// ## Errors
    ///
    /// If the given address cannot be resolved into a valid SocketAddr, an error variant will
    /// be returned describing the error.
    pub fn with_collector<T>(mut self, address: T) -> Result<Self, ConfigError>
    where
        T: ToSocketAddrs + std::fmt::Debug,
    {
        let invalid = |reason: String| ConfigError::InvalidCollectorAddress {
            address: format!("{address:?}"),
            reason,
        };
        let endpoint = address
            .to_socket_addrs()
            .map_err(|e| invalid(e.to_string()))?
            .next() // just use the first address we resolve to
            .ok_or_else(|| invalid("address resolved to nothing".to_owned()))?;

        self.endpoint = Some(endpoint);
        Ok(self)
    }

    /// Sets a prefix for every metric name.
    ///
    /// An empty namespace means no prefix.
    #[must_use]
    pub fn set_namespace<P>(mut self, namespace: P) -> Self
    where
        P: Into<String>,
    {
        let namespace = namespace.into();
        self.namespace = Some(namespace).filter(|ns| !ns.is_empty());
        self
    }

    /// Sets the maximum size of packets going out to the collector.
    ///
    /// Defaults to 1432 bytes
    pub fn set_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }

    /// Sets how often buffered lines are flushed when the buffer does not fill up.
    ///
    /// Defaults to one second. Intervals below one millisecond are raised to one millisecond.
    pub fn set_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval.max(MIN_FLUSH_INTERVAL);
        self
    }

    /// Routes the exporter task's own log events to `dispatch`.
    #[must_use]
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    /// Builds the client and exporter and spawns the exporter.
    ///
    /// When called from within a Tokio runtime, the exporter future is spawned directly
    /// into the runtime.  Otherwise, a new single-threaded Tokio runtime is created
    /// on a background thread, and the exporter is spawned there.
    ///
    /// ## Errors
    ///
    /// If there is an error while either building the client and exporter, or starting the
    /// exporter runtime, an error variant will be returned describing the error.
    pub fn install(self) -> Result<StatsdClient, ConfigError> {
        if let Ok(handle) = runtime::Handle::try_current() {
            let (client, exporter) = {
                let _g = handle.enter();
                self.build()?
            };

            handle.spawn(exporter);

            Ok(client)
        } else {
            let runtime = runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| ConfigError::FailedToCreateRuntime(e.to_string()))?;

            let (client, exporter) = {
                let _g = runtime.enter();
                self.build()?
            };

            thread::Builder::new()
                .name("dogstatsd-metrics-exporter".to_owned())
                .spawn(move || runtime.block_on(exporter))
                .map_err(|e| ConfigError::FailedToCreateRuntime(e.to_string()))?;

            Ok(client)
        }
    }

    /// Builds the client and exporter and returns them both.
    ///
    /// In most cases, users should prefer to use [`install`][StatsdBuilder::install]. The
    /// exporter future must be polled on a Tokio runtime with IO and time enabled; it
    /// completes once every clone of the client has been dropped and the remaining lines
    /// have been flushed.
    ///
    /// ## Errors
    ///
    /// If no collector was configured, an error variant will be returned.
    pub fn build(self) -> Result<(StatsdClient, ExporterFuture), ConfigError> {
        let endpoint = self.endpoint.ok_or(ConfigError::MissingCollector)?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let client = StatsdClient::new(self.namespace, sender);

        let exporter = Exporter {
            bind_addr: bind_addr_for(&endpoint),
            endpoint,
            max_packet_size: self.max_packet_size,
            flush_interval: self.flush_interval,
            reporter: ErrorReporter::new(self.clock),
        }
        .run(receiver);

        let exporter: ExporterFuture = match self.dispatch {
            Some(dispatch) => Box::pin(exporter.with_subscriber(dispatch)),
            None => Box::pin(exporter),
        };
        Ok((client, exporter))
    }
}

impl Default for StatsdBuilder {
    fn default() -> Self {
        StatsdBuilder::new()
    }
}

fn bind_addr_for(endpoint: &SocketAddr) -> SocketAddr {
    let ip = if endpoint.is_ipv4() {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    } else {
        IpAddr::V6(Ipv6Addr::UNSPECIFIED)
    };
    SocketAddr::new(ip, 0)
}

struct Exporter {
    bind_addr: SocketAddr,
    endpoint: SocketAddr,
    max_packet_size: usize,
    flush_interval: Duration,
    reporter: ErrorReporter,
}

impl Exporter {
    async fn run(mut self, mut receiver: UnboundedReceiver<String>) -> io::Result<()> {
        let socket = match UdpSocket::bind(self.bind_addr).await {
            Ok(socket) => socket,
            Err(e) => {
                error!(bind_addr = %self.bind_addr, "failed to bind exporter socket: {e}");
                return Err(e);
            }
        };
        let mut buffer = String::new();
        let mut ticker = tokio::time::interval(self.flush_interval);

        loop {
            tokio::select! {
                line = receiver.recv() => match line {
                    Some(line) => {
                        buffer.push_str(&line);
                        if buffer.len() >= self.max_packet_size {
                            self.flush(&socket, &mut buffer).await;
                        }
                    }
                    None => {
                        self.flush(&socket, &mut buffer).await;
                        return Ok(());
                    }
                },
                _ = ticker.tick() => self.flush(&socket, &mut buffer).await,
            }
        }
    }

    async fn flush(&mut self, socket: &UdpSocket, buffer: &mut String) {
        if buffer.is_empty() {
            return;
        }
        if let Err(e) = send_all(socket, buffer, &self.endpoint, self.max_packet_size).await {
            if self.reporter.should_report() {
                warn!(endpoint = %self.endpoint, "sending metrics error: {e:?}");
            }
        }
        buffer.clear();
    }
}

/// Lets background send failures through at most once per reporting interval.
struct ErrorReporter {
    clock: Clock,
    last_report: Option<Instant>,
}

impl ErrorReporter {
    fn new(clock: Clock) -> Self {
        ErrorReporter {
            clock,
            last_report: None,
        }
    }

    fn should_report(&mut self) -> bool {
        let now = self.clock.now();
        if let Some(last) = self.last_report {
            if now.duration_since(last) < ERROR_REPORT_INTERVAL {
                return false;
            }
        }
        self.last_report = Some(now);
        true
    }
}

// Packets are split alone new lines because that's how the dogstatsd protocol works
// so we look for \n in the buffer and try to put them together at that delimiter.
fn split_in_packets(buf: &[u8], max_packet_size: usize) -> Vec<(usize, usize)> {
    let mut n_pos_iter = buf.iter();
    let mut last_sent = 0;
    let mut packets = vec![];
    let mut acc = 0;
    let mut previous_acc = acc;

    while let Some(next_send_candidate) = n_pos_iter.position(|&c| c == b'\n') {
        acc += next_send_candidate + 1;
        match acc.cmp(&max_packet_size) {
            std::cmp::Ordering::Less => (), // check if there's a bigger opportunity
            std::cmp::Ordering::Equal => {
                // we can't be any bigger so save this position
                packets.push((last_sent, last_sent + acc));
                last_sent += acc;
                acc = 0;
            }
            std::cmp::Ordering::Greater => {
                // we gone over, if we have a previous accumulator that has something,
                // flush it out.
                if previous_acc != 0 {
                    packets.push((last_sent, last_sent + previous_acc));
                    last_sent += previous_acc;
                    acc = next_send_candidate + 1;
                }

                // a single line larger than a packet goes out on its own
                if next_send_candidate + 1 > max_packet_size {
                    packets.push((last_sent, last_sent + acc));
                    last_sent += acc;
                    acc = 0;
                }
            }
        }
        previous_acc = acc;
    }

    if acc != 0 {
        packets.push((last_sent, last_sent + acc));
        last_sent += acc;
    }
    // trailing bytes without a final newline
    if last_sent < buf.len() {
        packets.push((last_sent, buf.len()));
    }

    packets
}

async fn send_all(
    socket: &UdpSocket,
    body: &str,
    endpoint: &SocketAddr,
    max_packet_size: usize,
) -> io::Result<()> {
    let buf = body.as_bytes();

    let mut sent = 0;
    let mut last_error = None;
    for (start, end) in split_in_packets(buf, max_packet_size) {
        // one failed packet does not stop the others
        match socket.send_to(&buf[start..end], endpoint).await {
            Ok(nsent) => sent += nsent,
            Err(e) => last_error = Some(e),
        }
    }
    if let Some(e) = last_error {
        return Err(e);
    }
    if sent != buf.len() {
        return Err(io::Error::new(
            io::ErrorKind::WriteZero,
            format!("sent {sent} of {} bytes", buf.len()),
        ));
    }
    Ok(())
}
