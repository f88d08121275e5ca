use tracing::debug;

use crate::{
    builder::EmitterBuilder,
    client::{Client, ClientConfiguration},
    error::Error,
    formatter::MetricValue,
    registry::BackendRegistry,
    timer::Timer,
};

/// Entry point for sending metrics to the configured backends.
///
/// An `Emitter` holds no connections itself: every call to [`client`](Emitter::client) opens a fresh [`Client`]
/// exclusively owned by the caller. An emitter can be shared freely, for example behind an `Arc`.
#[derive(Debug)]
pub struct Emitter {
    registry: BackendRegistry,
    config: ClientConfiguration,
}

impl Emitter {
    pub(crate) fn new(registry: BackendRegistry, config: ClientConfiguration) -> Self {
        Emitter { registry, config }
    }

    /// Creates a builder for configuring an emitter.
    pub fn builder() -> EmitterBuilder {
        EmitterBuilder::default()
    }

    /// Returns the configured backends.
    pub fn backends(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Returns the prefix prepended to every stat name.
    pub fn prefix(&self) -> &str {
        &self.config.prefix
    }

    /// Returns `true` if connection failures are swallowed.
    pub fn fails_silently(&self) -> bool {
        self.config.fail_silently
    }

    /// Opens a client to the named backend, or to the default backend when no name is given.
    ///
    /// With no backends configured at all, a client that discards everything is returned.
    ///
    /// # Errors
    ///
    /// If the backend does not exist, an error is returned. If the connection fails, an error is returned unless the
    /// emitter fails silently, in which case an inert client is returned instead.
    pub async fn client(&self, name: Option<&str>) -> Result<Client, Error> {
        match self.registry.resolve(name)? {
            Some(spec) => Client::connect(spec, &self.config).await,
            None => {
                debug!("No backends configured, using null client.");
                Ok(Client::null(&self.config))
            }
        }
    }

    /// Sends a single metric: opens a client, sends, and disconnects.
    ///
    /// Returns `false` if the metric was not transmitted, such as when there is no usable backend.
    ///
    /// # Errors
    ///
    /// If the backend does not exist, an error is returned. Connection and write errors are returned unless the
    /// emitter fails silently.
    pub async fn send<V: Into<MetricValue>>(
        &self,
        stat: &str,
        value: V,
        backend: Option<&str>,
    ) -> Result<bool, Error> {
        let mut client = self.client(backend).await?;
        let sent = client.send(stat, value, 1.0);
        let disconnected = client.disconnect();

        match sent.and_then(|sent| disconnected.map(|_| sent)) {
            Err(Error::Io(e)) if self.config.fail_silently => {
                debug!(error = %e, "Failed to send metric.");
                Ok(false)
            }
            result => result,
        }
    }

    /// Creates a new, stopped timer.
    pub fn time() -> Timer {
        Timer::new()
    }
}
