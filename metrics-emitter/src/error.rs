use std::io;

use thiserror::Error;

/// Errors that could occur while configuring an emitter or sending metrics through it.
#[derive(Debug, Error)]
pub enum Error {
    /// The emitter configuration is invalid, or refers to a backend that does not exist.
    #[error("invalid configuration: {reason}")]
    Configuration {
        /// Details about the configuration failure.
        reason: String,
    },

    /// Failed to connect to the remote collector.
    ///
    /// Never returned when the emitter is configured to fail silently.
    #[error("failed to connect to backend '{backend}': {source}")]
    Connection {
        /// Name of the backend that could not be reached.
        backend: String,

        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Failed to write to an established connection.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn configuration<R: Into<String>>(reason: R) -> Self {
        Error::Configuration { reason: reason.into() }
    }
}
