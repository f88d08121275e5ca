//! A client for sending metrics to [Graphite][graphite]- and [StatsD][statsd]-compatible collectors.
//!
//! [graphite]: https://graphite.readthedocs.io/en/latest/feeding-carbon.html
//! [statsd]: https://github.com/statsd/statsd/blob/master/docs/metric_types.md
//!
//! # Usage
//!
//! ```no_run
//! # use metrics_emitter::Emitter;
//! # async fn run() -> Result<(), metrics_emitter::Error> {
//! // First, configure the backends metrics can be sent to.
//! //
//! // The URL scheme selects both the transport (TCP or UDP) and the line protocol (Graphite, or StatsD with the
//! // `+statsd` suffix). The first backend is the default one, unless another one is picked explicitly.
//! let emitter = Emitter::builder()
//!     .with_backend("statsd", "udp+statsd://127.0.0.1:8125")?
//!     .with_backend("graphite", "tcp://127.0.0.1:2003")?
//!     .with_prefix("myapp.")
//!     .with_fail_silently(true)
//!     .build()?;
//!
//! // Single metrics can be sent directly, which opens a connection, sends, and closes it again.
//! emitter.send("started", 1, Some("graphite")).await?;
//!
//! // Multiple metrics can be batched through a pipeline, which transmits everything at once when it closes.
//! let mut client = emitter.client(None).await?;
//! let mut pipe = client.pipe();
//! pipe.increment("requests", 1, 1.0)?;
//! pipe.timing("latency", 42, 0.5)?;
//! pipe.gauge("queue_depth", 7)?;
//! pipe.finish()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! ## Batching
//!
//! While a [`Pipeline`] is open, metrics are buffered and transmitted together when it closes, in the order they were
//! sent. Over UDP, buffered lines are packed into as few datagrams as the configured maximum payload length allows,
//! never splitting a line across datagrams. Over TCP, everything is written at once.
//!
//! The pipeline is closed, and the client disconnected, on every exit path: explicitly with [`Pipeline::finish`], or
//! when the guard is dropped because of an early return or a panic.
//!
//! ## Sampling
//!
//! Counters and timings can be sampled: with a rate below one, a metric is only sent with that probability. StatsD
//! lines carry the rate, so the collector can scale values back up.
//!
//! ## Failing silently
//!
//! When configured to fail silently, an unreachable backend yields an inert client that drops every metric instead of
//! returning an error, and failed writes on an established connection are dropped as well, so metrics never get in the
//! way of the work being measured.
//!
//! ## Telemetry
//!
//! The emitter can report on its own operation, such as the number of frames and bytes sent or dropped, through the
//! globally installed [`metrics`] recorder. All internal telemetry is under the `metrics_emitter` namespace.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod builder;
pub use self::builder::EmitterBuilder;

mod client;
pub use self::client::{Client, Pipeline};

mod emitter;
pub use self::emitter::Emitter;

mod error;
pub use self::error::Error;

mod formatter;
pub use self::formatter::{MetricValue, Protocol};

pub mod middleware;

mod registry;
pub use self::registry::{BackendRegistry, BackendSpec};

mod telemetry;

mod timer;
pub use self::timer::{Timer, TimerScope};

mod transport;
