use std::time::Duration;

use crate::{
    client::ClientConfiguration,
    emitter::Emitter,
    error::Error,
    registry::{BackendRegistry, BackendSpec},
    transport::{TransportConfiguration, SMALLEST_VALID_LINE},
};

const DEFAULT_MAX_UDP_PAYLOAD_LEN: usize = 512;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Builder for an [`Emitter`].
pub struct EmitterBuilder {
    backends: Vec<BackendSpec>,
    default_backend: Option<String>,
    prefix: String,
    fail_silently: bool,
    max_udp_payload_len: usize,
    connect_timeout: Duration,
    write_timeout: Duration,
    telemetry: bool,
}

impl EmitterBuilder {
    /// Adds a named backend.
    ///
    /// The URL takes the form of `<scheme>://<host>:<port>`, where the scheme selects both the transport and the line
    /// protocol:
    ///
    /// - `tcp` / `udp`: Graphite over TCP or UDP
    /// - `tcp+statsd` / `udp+statsd`: StatsD over TCP or UDP
    /// - `null`: discard everything
    ///
    /// Any other scheme is treated as `tcp`. Backends keep the order they were added in.
    ///
    /// # Errors
    ///
    /// If the URL cannot be parsed, an error will be returned indicating the reason.
    pub fn with_backend<N, U>(mut self, name: N, url: U) -> Result<Self, Error>
    where
        N: Into<String>,
        U: AsRef<str>,
    {
        self.backends.push(BackendSpec::parse(name, url.as_ref())?);
        Ok(self)
    }

    /// Adds a backend from already-resolved connection parameters.
    #[must_use]
    pub fn with_backend_spec(mut self, spec: BackendSpec) -> Self {
        self.backends.push(spec);
        self
    }

    /// Sets the backend used when a client is requested without a name.
    ///
    /// Defaults to the first backend added.
    #[must_use]
    pub fn with_default_backend<N: Into<String>>(mut self, name: N) -> Self {
        self.default_backend = Some(name.into());
        self
    }

    /// Sets the prefix prepended to every stat name.
    ///
    /// The prefix is used verbatim, so it should usually end with a separator, such as `myapp.`.
    ///
    /// Defaults to no prefix.
    #[must_use]
    pub fn with_prefix<P: Into<String>>(mut self, prefix: P) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Sets whether or not connection failures are swallowed.
    ///
    /// When enabled, a backend that cannot be reached yields an inert client which drops every metric, instead of
    /// returning an error. This keeps metrics from ever interrupting the work being measured.
    ///
    /// Defaults to `false`.
    #[must_use]
    pub fn with_fail_silently(mut self, fail_silently: bool) -> Self {
        self.fail_silently = fail_silently;
        self
    }

    /// Sets the maximum payload length of a single UDP datagram.
    ///
    /// Buffered lines are packed into datagrams no larger than this. A single line that is larger than this on its
    /// own is dropped. Has no effect on TCP backends.
    ///
    /// Defaults to 512 bytes.
    #[must_use]
    pub fn with_maximum_udp_payload_length(mut self, max_udp_payload_len: usize) -> Self {
        self.max_udp_payload_len = max_udp_payload_len;
        self
    }

    /// Sets the timeout for establishing a connection, including name resolution.
    ///
    /// Defaults to 3 seconds.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the write timeout for sending metrics.
    ///
    /// When the write timeout is reached, the write is aborted and an error is returned to the sender.
    ///
    /// Defaults to 1 second.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Sets whether or not to enable telemetry for the emitter.
    ///
    /// When enabled, counters describing the emitter's own operation, such as the number of frames and bytes sent or
    /// dropped, are reported through the globally installed `metrics` recorder.
    ///
    /// Defaults to `false`.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: bool) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Builds the emitter.
    ///
    /// # Errors
    ///
    /// If the default backend does not exist, two backends share a name, or the maximum UDP payload length is too small
    /// to hold any line, an error will be returned.
    pub fn build(self) -> Result<Emitter, Error> {
        if self.max_udp_payload_len < SMALLEST_VALID_LINE.len() {
            return Err(Error::configuration(format!(
                "maximum UDP payload length must be {} or greater",
                SMALLEST_VALID_LINE.len()
            )));
        }

        let registry = BackendRegistry::new(self.backends, self.default_backend)?;

        let config = ClientConfiguration {
            prefix: self.prefix,
            fail_silently: self.fail_silently,
            telemetry: self.telemetry,
            transport: TransportConfiguration {
                max_udp_payload_len: self.max_udp_payload_len,
                connect_timeout: self.connect_timeout,
                write_timeout: self.write_timeout,
            },
        };

        Ok(Emitter::new(registry, config))
    }
}

impl Default for EmitterBuilder {
    fn default() -> Self {
        EmitterBuilder {
            backends: Vec::new(),
            default_backend: None,
            prefix: String::new(),
            fail_silently: false,
            max_udp_payload_len: DEFAULT_MAX_UDP_PAYLOAD_LEN,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            telemetry: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::EmitterBuilder;
    use crate::error::Error;

    #[test]
    fn defaults() {
        let emitter = EmitterBuilder::default().build().unwrap();
        assert!(!emitter.backends().is_enabled());
        assert!(!emitter.fails_silently());
        assert_eq!(emitter.prefix(), "");
    }

    #[test]
    fn backends_in_order() {
        let emitter = EmitterBuilder::default()
            .with_backend("statsd", "udp+statsd://127.0.0.1:9999")
            .and_then(|b| b.with_backend("udp", "udp://127.0.0.1:9999"))
            .and_then(|b| b.with_backend("tcp", "tcp://127.0.0.1:9999"))
            .and_then(|b| b.with_backend("null", "null://127.0.0.1:9999"))
            .unwrap()
            .with_prefix("muffin.")
            .with_fail_silently(true)
            .build()
            .unwrap();

        let names = emitter.backends().backends().iter().map(|b| b.name()).collect::<Vec<_>>();
        assert_eq!(names, vec!["statsd", "udp", "tcp", "null"]);
        assert_eq!(emitter.backends().default_backend(), Some("statsd"));
        assert_eq!(emitter.prefix(), "muffin.");
        assert!(emitter.fails_silently());
    }

    #[test]
    fn invalid_backend_url() {
        let result = EmitterBuilder::default().with_backend("bad", "localhost");
        assert!(matches!(result, Err(Error::Configuration { .. })));
    }

    #[test]
    fn unknown_default_backend() {
        let result = EmitterBuilder::default()
            .with_backend("statsd", "udp+statsd://127.0.0.1:9999")
            .unwrap()
            .with_default_backend("graphite")
            .build();
        assert!(matches!(result, Err(Error::Configuration { .. })));
    }

    #[test]
    fn payload_length_too_small() {
        let result = EmitterBuilder::default().with_maximum_udp_payload_length(3).build();
        assert!(matches!(result, Err(Error::Configuration { .. })));

        let result = EmitterBuilder::default().with_maximum_udp_payload_length(4).build();
        assert!(result.is_ok());
    }
}
