use std::ops::{Deref, DerefMut};

use tracing::{debug, warn};

use crate::{
    error::Error,
    formatter::{LineFormatter, MetricValue, Protocol},
    registry::BackendSpec,
    telemetry::{Telemetry, TelemetryUpdate},
    transport::{Transport, TransportConfiguration, TransportKind},
};

/// Client configuration shared by every client an emitter hands out.
#[derive(Clone, Debug)]
pub(crate) struct ClientConfiguration {
    pub prefix: String,
    pub fail_silently: bool,
    pub telemetry: bool,
    pub transport: TransportConfiguration,
}

/// Returns `true` if a metric sampled at `rate` should be sent, given a uniform draw in `[0, 1)`.
fn sampled_in(rate: f64, draw: f64) -> bool {
    rate >= 1.0 || draw < rate
}

/// A connection to a single backend.
///
/// Metrics are rendered in the backend's line protocol and either transmitted immediately, or buffered while a
/// [`Pipeline`] is open and transmitted together when it closes.
///
/// Once disconnected, a client stays inert: every send is a no-op returning `false`. A client that could not connect
/// while failing silently starts out in that state. Dropping a client disconnects it, flushing any buffered lines first.
///
/// A client serves one caller at a time. Use one client per task.
///
/// Sends are synchronous: outside of a pipeline, and when a pipeline closes, lines are written to the socket directly,
/// which blocks the calling thread for up to the configured write timeout if the collector stalls. On an async runtime,
/// prefer batching through a pipeline, or sending over UDP, to keep that out of latency-sensitive tasks.
pub struct Client {
    backend: String,
    kind: TransportKind,
    formatter: LineFormatter,
    transport: Option<Transport>,
    pipeline: Option<Vec<String>>,
    fail_silently: bool,
    telemetry_enabled: bool,
    telemetry: Option<Telemetry>,
    telemetry_update: TelemetryUpdate,
}

impl Client {
    fn new(
        backend: String,
        kind: TransportKind,
        protocol: Protocol,
        transport: Option<Transport>,
        config: &ClientConfiguration,
    ) -> Self {
        Client {
            backend,
            kind,
            formatter: LineFormatter::new(protocol, &config.prefix),
            transport,
            pipeline: None,
            fail_silently: config.fail_silently,
            telemetry_enabled: config.telemetry,
            telemetry: None,
            telemetry_update: TelemetryUpdate::default(),
        }
    }

    /// Connects to the given backend.
    ///
    /// When the connection fails and the configuration says to fail silently, an inert client is returned instead of
    /// an error.
    pub(crate) async fn connect(spec: &BackendSpec, config: &ClientConfiguration) -> Result<Self, Error> {
        let kind = spec.transport_kind();
        let transport = match Transport::connect(kind, spec.hostname(), spec.port(), &config.transport).await {
            Ok(transport) => {
                debug!(backend = %spec.name(), transport = kind.transport_id(), "Connected to backend.");
                Some(transport)
            }
            Err(e) if config.fail_silently => {
                warn!(backend = %spec.name(), error = %e, "Failed to connect to backend, metrics will be dropped.");
                None
            }
            Err(source) => return Err(Error::Connection { backend: spec.name().to_string(), source }),
        };

        Ok(Client::new(spec.name().to_string(), kind, spec.protocol(), transport, config))
    }

    /// Creates a client that discards everything, for when no backend is configured.
    pub(crate) fn null(config: &ClientConfiguration) -> Self {
        Client::new(String::from("null"), TransportKind::Null, Protocol::StatsD, Some(Transport::Null), config)
    }

    /// Returns the name of the backend this client sends to.
    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Returns the line protocol this client renders metrics in.
    pub fn protocol(&self) -> Protocol {
        self.formatter.protocol()
    }

    /// Returns `true` while the client holds a usable connection.
    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Returns `true` while a pipeline is open.
    pub fn is_pipelined(&self) -> bool {
        self.pipeline.is_some()
    }

    /// Sends a metric value as-is.
    ///
    /// With a `rate` below one, the metric is only sent with probability `rate`, and StatsD lines carry the rate so the
    /// collector can scale the value back up.
    ///
    /// Returns `true` if the metric was transmitted, or buffered in an open pipeline. The null backend never reports
    /// success.
    ///
    /// # Errors
    ///
    /// If writing to the connection fails, an error is returned, unless the client fails silently.
    pub fn send<V: Into<MetricValue>>(&mut self, stat: &str, value: V, rate: f64) -> Result<bool, Error> {
        let value = value.into();
        self.emit(rate, |formatter, rate| formatter.format_raw(stat, value, rate))
    }

    /// Increments a counter by `count`.
    ///
    /// # Errors
    ///
    /// If writing to the connection fails, an error is returned, unless the client fails silently.
    pub fn increment(&mut self, stat: &str, count: i64, rate: f64) -> Result<bool, Error> {
        self.emit(rate, |formatter, rate| formatter.format_counter(stat, count, rate))
    }

    /// Decrements a counter by `count`.
    ///
    /// # Errors
    ///
    /// If writing to the connection fails, an error is returned, unless the client fails silently.
    pub fn decrement(&mut self, stat: &str, count: i64, rate: f64) -> Result<bool, Error> {
        self.increment(stat, count.saturating_neg(), rate)
    }

    /// Records a timing, in milliseconds.
    ///
    /// # Errors
    ///
    /// If writing to the connection fails, an error is returned, unless the client fails silently.
    pub fn timing(&mut self, stat: &str, delta_ms: u64, rate: f64) -> Result<bool, Error> {
        self.emit(rate, |formatter, rate| formatter.format_timer(stat, delta_ms, rate))
    }

    /// Sets a gauge. Gauges are never sampled.
    ///
    /// # Errors
    ///
    /// If writing to the connection fails, an error is returned, unless the client fails silently.
    pub fn gauge<V: Into<MetricValue>>(&mut self, stat: &str, value: V) -> Result<bool, Error> {
        let value = value.into();
        self.emit(1.0, |formatter, _| formatter.format_gauge(stat, value))
    }

    fn emit<F>(&mut self, rate: f64, render: F) -> Result<bool, Error>
    where
        F: FnOnce(&mut LineFormatter, Option<f64>) -> Option<String>,
    {
        if !matches!(self.transport, Some(Transport::Tcp(_) | Transport::Udp { .. })) {
            return Ok(false);
        }

        if !sampled_in(rate, rand::random::<f64>()) {
            self.telemetry_update.track_line_sampled_out();
            self.flush_telemetry();
            return Ok(false);
        }

        let sample_rate = if rate < 1.0 { Some(rate) } else { None };
        let Some(line) = render(&mut self.formatter, sample_rate) else {
            return Ok(false);
        };

        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.push(line);
            return Ok(true);
        }

        self.transmit(&[line])
    }

    fn transmit(&mut self, lines: &[String]) -> Result<bool, Error> {
        let Some(transport) = self.transport.as_mut() else {
            return Ok(false);
        };

        let result = transport.transmit(lines.iter().map(String::as_str), &mut self.telemetry_update);
        self.flush_telemetry();

        match result {
            Ok(sent) => Ok(sent),
            Err(e) if self.fail_silently => {
                debug!(backend = %self.backend, error = %e, "Failed to send metrics, dropping.");
                Ok(false)
            }
            Err(e) => Err(Error::from(e)),
        }
    }

    fn flush_telemetry(&mut self) {
        if self.telemetry_enabled && self.telemetry_update.had_updates() {
            let kind = self.kind;
            let telemetry = self.telemetry.get_or_insert_with(|| Telemetry::new(kind.transport_id()));
            telemetry.apply_update(&self.telemetry_update);
        }

        self.telemetry_update.clear();
    }

    /// Opens a pipeline.
    ///
    /// Until the returned guard is finished or dropped, metrics sent through it are buffered instead of transmitted.
    /// Closing the pipeline transmits the buffered lines, in the order they were sent, and disconnects the client.
    /// This happens on every exit path, including early returns and unwinding panics.
    pub fn pipe(&mut self) -> Pipeline<'_> {
        if self.pipeline.is_none() {
            self.pipeline = Some(Vec::new());
        }

        Pipeline { client: self, finished: false }
    }

    /// Transmits any buffered lines, keeping the pipeline open.
    ///
    /// Returns `true` if anything was transmitted.
    ///
    /// # Errors
    ///
    /// If writing to the connection fails, an error is returned. The buffered lines are discarded either way.
    pub fn flush(&mut self) -> Result<bool, Error> {
        let lines = match self.pipeline.as_mut() {
            Some(pipeline) if !pipeline.is_empty() => std::mem::take(pipeline),
            _ => return Ok(false),
        };

        self.transmit(&lines)
    }

    /// Disconnects from the backend.
    ///
    /// Any open pipeline is flushed first. The connection is closed and the pipeline cleared even if the flush fails.
    ///
    /// Returns `true` if buffered lines were transmitted.
    ///
    /// # Errors
    ///
    /// If flushing the pipeline fails, an error is returned.
    pub fn disconnect(&mut self) -> Result<bool, Error> {
        let result = self.flush();

        if self.transport.take().is_some() {
            debug!(backend = %self.backend, "Disconnected from backend.");
        }
        self.pipeline = None;

        result
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            warn!(backend = %self.backend, error = %e, "Failed to flush metrics on drop.");
        }
    }
}

/// An open pipeline on a [`Client`].
///
/// Dereferences to the client, so metrics are sent through the guard as usual. When the guard is finished or dropped,
/// the buffered lines are transmitted and the client is disconnected.
pub struct Pipeline<'a> {
    client: &'a mut Client,
    finished: bool,
}

impl<'a> Pipeline<'a> {
    /// Closes the pipeline: transmits the buffered lines and disconnects the client.
    ///
    /// Unlike dropping the guard, this reports write errors to the caller.
    ///
    /// # Errors
    ///
    /// If writing to the connection fails, an error is returned. The client is disconnected either way.
    pub fn finish(mut self) -> Result<bool, Error> {
        self.finished = true;
        self.client.disconnect()
    }
}

impl<'a> Deref for Pipeline<'a> {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        self.client
    }
}

impl<'a> DerefMut for Pipeline<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.client
    }
}

impl<'a> Drop for Pipeline<'a> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        if let Err(e) = self.client.disconnect() {
            warn!(backend = %self.client.backend, error = %e, "Failed to flush pipeline.");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{net::UdpSocket, time::Duration};

    use rand::{Rng as _, SeedableRng as _};
    use rand_xoshiro::Xoshiro256StarStar;

    use super::{sampled_in, Client, ClientConfiguration};
    use crate::{formatter::Protocol, registry::BackendSpec, transport::TransportConfiguration};

    fn config() -> ClientConfiguration {
        ClientConfiguration {
            prefix: String::from("app."),
            fail_silently: false,
            telemetry: false,
            transport: TransportConfiguration {
                max_udp_payload_len: 512,
                connect_timeout: Duration::from_secs(1),
                write_timeout: Duration::from_secs(1),
            },
        }
    }

    async fn udp_client() -> (Client, UdpSocket) {
        let collector = UdpSocket::bind("127.0.0.1:0").unwrap();
        collector.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let port = collector.local_addr().unwrap().port();

        let spec = BackendSpec::new("statsd", "udp+statsd", "127.0.0.1", port);
        let client = Client::connect(&spec, &config()).await.unwrap();
        (client, collector)
    }

    fn buffered(client: &Client) -> Vec<String> {
        client.pipeline.clone().unwrap_or_default()
    }

    fn recv_string(socket: &UdpSocket) -> String {
        let mut buf = [0u8; 2048];
        let len = socket.recv(&mut buf).unwrap();
        String::from_utf8(buf[..len].to_vec()).unwrap()
    }

    #[test]
    fn sampling_bounds() {
        assert!(sampled_in(1.0, 0.999));
        assert!(sampled_in(2.0, 0.5));
        assert!(!sampled_in(0.0, 0.0));
        assert!(!sampled_in(-1.0, 0.0));
        assert!(sampled_in(0.5, 0.49));
        assert!(!sampled_in(0.5, 0.5));
    }

    #[test]
    fn sampling_converges_to_rate() {
        let mut rng = Xoshiro256StarStar::seed_from_u64(0x5eed);
        let trials = 100_000;

        for rate in [0.0, 0.1, 0.25, 0.5, 0.9, 1.0] {
            let accepted = (0..trials).filter(|_| sampled_in(rate, rng.random::<f64>())).count();
            let observed = accepted as f64 / f64::from(trials);
            assert!((observed - rate).abs() < 0.01, "rate {rate}: observed {observed}");
        }
    }

    #[tokio::test]
    async fn pipeline_preserves_order() {
        let (mut client, collector) = udp_client().await;
        let mut pipe = client.pipe();
        assert!(pipe.is_pipelined());

        assert!(pipe.send("stats", 21, 1.0).unwrap());
        assert!(pipe.increment("count", 3, 1.0).unwrap());
        assert!(pipe.decrement("count", 2, 1.0).unwrap());
        assert!(pipe.timing("run", 30, 1.0).unwrap());
        assert!(pipe.gauge("temp", 21.5).unwrap());

        assert_eq!(
            buffered(&pipe),
            vec!["app.stats:21", "app.count:3|c", "app.count:-2|c", "app.run:30|ms", "app.temp:21.5|g"]
        );

        assert!(pipe.finish().unwrap());
        assert_eq!(
            recv_string(&collector),
            "app.stats:21\napp.count:3|c\napp.count:-2|c\napp.run:30|ms\napp.temp:21.5|g\n"
        );
    }

    #[tokio::test]
    async fn sampled_sends_converge_in_pipeline() {
        let (mut client, _collector) = udp_client().await;
        let mut pipe = client.pipe();

        let trials = 20_000;
        let mut accepted = 0;
        for _ in 0..trials {
            if pipe.increment("hits", 1, 0.3).unwrap() {
                accepted += 1;
            }
        }

        let lines = buffered(&pipe);
        assert_eq!(lines.len(), accepted);
        assert!(lines.iter().all(|line| line == "app.hits:1|c|@0.3"));

        let observed = accepted as f64 / f64::from(trials);
        assert!((observed - 0.3).abs() < 0.02, "observed {observed}");
    }

    #[tokio::test]
    async fn zero_rate_never_sends() {
        let (mut client, _collector) = udp_client().await;
        let mut pipe = client.pipe();
        for _ in 0..1000 {
            assert!(!pipe.increment("hits", 1, 0.0).unwrap());
        }
        assert!(buffered(&pipe).is_empty());
    }

    #[tokio::test]
    async fn empty_stat_is_skipped() {
        let (mut client, _collector) = udp_client().await;
        let mut pipe = client.pipe();
        assert!(!pipe.send("", 1, 1.0).unwrap());
        assert!(buffered(&pipe).is_empty());
    }

    #[test]
    fn null_client_reports_failure() {
        let mut client = Client::null(&config());
        assert_eq!(client.backend(), "null");
        assert_eq!(client.protocol(), Protocol::StatsD);
        assert!(client.is_connected());
        assert!(!client.send("test", 12345, 1.0).unwrap());
        assert!(!client.increment("test", 1, 1.0).unwrap());

        // Nothing is reported as sent inside a pipeline either.
        let mut pipe = client.pipe();
        assert!(!pipe.send("test", 12345, 1.0).unwrap());
        assert!(!pipe.timing("test", 5, 1.0).unwrap());
        assert!(!pipe.gauge("test", 1).unwrap());
        assert!(buffered(&pipe).is_empty());
        assert!(!pipe.finish().unwrap());
    }

    #[tokio::test]
    async fn pipeline_closes_on_drop() {
        let (mut client, collector) = udp_client().await;
        {
            let mut pipe = client.pipe();
            pipe.send("test", 12345, 1.0).unwrap();
            pipe.send("test", 12345, 1.0).unwrap();
        }

        assert!(!client.is_pipelined());
        assert!(!client.is_connected());
        assert_eq!(recv_string(&collector), "app.test:12345\napp.test:12345\n");

        // Disconnected clients are inert.
        assert!(!client.send("test", 1, 1.0).unwrap());
        let mut pipe = client.pipe();
        assert!(!pipe.send("test", 1, 1.0).unwrap());
        assert!(buffered(&pipe).is_empty());
    }

    #[tokio::test]
    async fn pipeline_finish() {
        let (mut client, collector) = udp_client().await;
        let mut pipe = client.pipe();
        pipe.gauge("queue", 3).unwrap();

        assert!(pipe.finish().unwrap());
        assert!(!client.is_pipelined());
        assert!(!client.is_connected());
        assert_eq!(recv_string(&collector), "app.queue:3|g\n");
    }

    #[tokio::test]
    async fn flush_keeps_pipeline_open() {
        let (mut client, collector) = udp_client().await;
        let mut pipe = client.pipe();
        pipe.increment("a", 1, 1.0).unwrap();
        assert!(pipe.flush().unwrap());

        assert!(pipe.is_pipelined());
        assert!(buffered(&pipe).is_empty());
        assert_eq!(recv_string(&collector), "app.a:1|c\n");
    }

    #[tokio::test]
    async fn write_errors_are_dropped_when_failing_silently() {
        let port = {
            let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
            socket.local_addr().unwrap().port()
        };

        let config = ClientConfiguration { fail_silently: true, ..config() };
        let spec = BackendSpec::new("statsd", "udp+statsd", "127.0.0.1", port);
        let mut client = Client::connect(&spec, &config).await.unwrap();

        // Refusals from the closed port surface on later sends, and must never escape.
        for _ in 0..5 {
            assert!(client.increment("hits", 1, 1.0).is_ok());
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(client.is_connected());
    }
}
