use crate::{error::Error, formatter::Protocol, transport::TransportKind};

/// Schemes understood by the emitter, and the transport/protocol pairing each one selects.
///
/// Unknown schemes fall back to Graphite over TCP.
const SCHEMES: &[(&str, TransportKind, Protocol)] = &[
    ("tcp", TransportKind::Tcp, Protocol::Graphite),
    ("udp", TransportKind::Udp, Protocol::Graphite),
    ("tcp+statsd", TransportKind::Tcp, Protocol::StatsD),
    ("udp+statsd", TransportKind::Udp, Protocol::StatsD),
    ("null", TransportKind::Null, Protocol::StatsD),
];

const FALLBACK: (TransportKind, Protocol) = (TransportKind::Tcp, Protocol::Graphite);

/// Connection parameters of a named backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendSpec {
    name: String,
    scheme: String,
    hostname: String,
    port: u16,
}

impl BackendSpec {
    /// Creates a backend from already-resolved parts.
    pub fn new<N, S, H>(name: N, scheme: S, hostname: H, port: u16) -> Self
    where
        N: Into<String>,
        S: AsRef<str>,
        H: Into<String>,
    {
        BackendSpec {
            name: name.into(),
            scheme: scheme.as_ref().to_ascii_lowercase(),
            hostname: hostname.into(),
            port,
        }
    }

    /// Parses a backend from a URL in the form of `<scheme>://<host>:<port>`.
    ///
    /// IPv6 hosts must be enclosed in brackets. The `null` scheme does not need a host or port.
    ///
    /// # Errors
    ///
    /// If the URL has no scheme, or the host or port are missing or invalid, an error is returned.
    pub fn parse<N: Into<String>>(name: N, url: &str) -> Result<Self, Error> {
        let name = name.into();
        let (scheme, location) = url
            .split_once("://")
            .ok_or_else(|| Error::configuration(format!("backend '{name}': missing scheme in '{url}'")))?;
        let location = location.trim_end_matches('/');

        if scheme.eq_ignore_ascii_case("null") {
            let (hostname, port) = split_host_port(location).unwrap_or(("", 0));
            return Ok(BackendSpec::new(name, scheme, hostname, port));
        }

        let (hostname, port) = split_host_port(location).ok_or_else(|| {
            Error::configuration(format!("backend '{name}': expected '<host>:<port>' in '{url}'"))
        })?;

        Ok(BackendSpec::new(name, scheme, hostname, port))
    }

    /// Returns the backend name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the URL scheme, lowercased.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Returns the hostname.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Returns the port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the line protocol selected by the scheme.
    pub fn protocol(&self) -> Protocol {
        self.dispatch().1
    }

    pub(crate) fn transport_kind(&self) -> TransportKind {
        self.dispatch().0
    }

    fn dispatch(&self) -> (TransportKind, Protocol) {
        SCHEMES
            .iter()
            .find(|(scheme, _, _)| *scheme == self.scheme)
            .map_or(FALLBACK, |(_, kind, protocol)| (*kind, *protocol))
    }
}

fn split_host_port(location: &str) -> Option<(&str, u16)> {
    let (host, port) = if let Some(rest) = location.strip_prefix('[') {
        let (host, port) = rest.split_once("]:")?;
        (host, port)
    } else {
        location.rsplit_once(':')?
    };

    if host.is_empty() {
        return None;
    }

    port.parse().ok().map(|port| (host, port))
}

/// The set of configured backends.
///
/// Backends keep their configuration order. When no default is given, the first backend becomes the default.
#[derive(Clone, Debug, Default)]
pub struct BackendRegistry {
    backends: Vec<BackendSpec>,
    default: Option<String>,
}

impl BackendRegistry {
    /// Creates a registry from an ordered list of backends and an optional default backend name.
    ///
    /// # Errors
    ///
    /// If two backends share a name, or the default backend is not one of the given backends, an error is returned.
    pub fn new(backends: Vec<BackendSpec>, default: Option<String>) -> Result<Self, Error> {
        for (i, backend) in backends.iter().enumerate() {
            if backends[..i].iter().any(|other| other.name == backend.name) {
                return Err(Error::configuration(format!("duplicate backend: {}", backend.name)));
            }
        }

        let default = default.or_else(|| backends.first().map(|backend| backend.name.clone()));
        if let Some(name) = default.as_deref() {
            if !backends.iter().any(|backend| backend.name == name) {
                return Err(Error::configuration(format!("backend not found: {name}")));
            }
        }

        Ok(BackendRegistry { backends, default })
    }

    /// Returns `true` if at least one backend is configured.
    pub fn is_enabled(&self) -> bool {
        !self.backends.is_empty()
    }

    /// Returns the name of the default backend, if any.
    pub fn default_backend(&self) -> Option<&str> {
        self.default.as_deref()
    }

    /// Returns all backends, in configuration order.
    pub fn backends(&self) -> &[BackendSpec] {
        &self.backends
    }

    /// Resolves a backend by name, or the default backend when no name is given.
    ///
    /// Returns `Ok(None)` when no name is given and no backends are configured at all.
    ///
    /// # Errors
    ///
    /// If no backend with the given name exists, an error is returned.
    pub fn resolve(&self, name: Option<&str>) -> Result<Option<&BackendSpec>, Error> {
        let Some(name) = name.or(self.default.as_deref()) else {
            return Ok(None);
        };

        self.backends
            .iter()
            .find(|backend| backend.name == name)
            .map(Some)
            .ok_or_else(|| Error::configuration(format!("backend not found: {name}")))
    }
}
