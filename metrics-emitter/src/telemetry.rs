use metrics::{counter, Counter};

/// Emitter telemetry.
///
/// `Telemetry` collects information about the emitter's own behavior and, when enabled, reports it as normal metrics
/// through the globally installed `metrics` recorder.
pub struct Telemetry {
    frames_sent: Counter,
    frames_dropped: Counter,
    bytes_sent: Counter,
    bytes_dropped: Counter,
    lines_sampled_out: Counter,
    lines_dropped_oversize: Counter,
}

impl Telemetry {
    /// Creates a `Telemetry` instance.
    pub fn new(transport: &'static str) -> Self {
        let labels = telemetry_tags!("client_transport" => transport);

        Self {
            frames_sent: counter!("metrics_emitter.frames_sent", labels.iter()),
            frames_dropped: counter!("metrics_emitter.frames_dropped", labels.iter()),
            bytes_sent: counter!("metrics_emitter.bytes_sent", labels.iter()),
            bytes_dropped: counter!("metrics_emitter.bytes_dropped", labels.iter()),
            lines_sampled_out: counter!("metrics_emitter.lines_sampled_out", labels.iter()),
            lines_dropped_oversize: counter!(
                "metrics_emitter.lines_dropped_oversize",
                labels.iter()
            ),
        }
    }

    /// Applies the given telemetry update, updating the internal metrics.
    pub fn apply_update(&mut self, update: &TelemetryUpdate) {
        self.frames_sent.increment(update.frames_sent);
        self.frames_dropped.increment(update.frames_dropped);
        self.bytes_sent.increment(update.bytes_sent);
        self.bytes_dropped.increment(update.bytes_dropped);
        self.lines_sampled_out.increment(update.lines_sampled_out);
        self.lines_dropped_oversize.increment(update.lines_dropped_oversize);
    }
}

/// A buffer for collecting telemetry updates.
#[derive(Debug, Default)]
pub struct TelemetryUpdate {
    frames_sent: u64,
    frames_dropped: u64,
    bytes_sent: u64,
    bytes_dropped: u64,
    lines_sampled_out: u64,
    lines_dropped_oversize: u64,
}

impl TelemetryUpdate {
    /// Clears the update buffer, resetting it back to an empty state.
    pub fn clear(&mut self) {
        *self = TelemetryUpdate::default();
    }

    /// Returns `true` if any updates have been recorded.
    pub fn had_updates(&self) -> bool {
        self.frames_sent > 0
            || self.frames_dropped > 0
            || self.lines_sampled_out > 0
            || self.lines_dropped_oversize > 0
    }

    /// Tracks a successful frame send.
    pub fn track_frame_send_succeeded(&mut self, bytes_len: usize) {
        self.frames_sent += 1;
        self.bytes_sent += bytes_len as u64;
    }

    /// Tracks a failed frame send.
    pub fn track_frame_send_failed(&mut self, bytes_len: usize) {
        self.frames_dropped += 1;
        self.bytes_dropped += bytes_len as u64;
    }

    /// Tracks a line skipped by sampling.
    pub fn track_line_sampled_out(&mut self) {
        self.lines_sampled_out += 1;
    }

    /// Tracks lines dropped for not fitting in a single frame.
    pub fn track_lines_dropped_oversize(&mut self, lines: u64, bytes_len: u64) {
        self.lines_dropped_oversize += lines;
        self.bytes_dropped += bytes_len;
    }
}

macro_rules! _telemetry_tags {
    ($($k:literal => $v:expr),*) => {
        [
            ::metrics::Label::from_static_parts("client", "rust"),
            ::metrics::Label::from_static_parts("client_version", env!("CARGO_PKG_VERSION")),
            $(::metrics::Label::from_static_parts($k, $v),)*
        ]
    };
}

pub(crate) use _telemetry_tags as telemetry_tags;
