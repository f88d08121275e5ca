use std::time::{SystemTime, UNIX_EPOCH};

/// Line protocol spoken by a backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    /// Graphite plaintext protocol: `<path> <value> <timestamp>`.
    Graphite,

    /// StatsD protocol: `<name>:<value>|<type>[|@<rate>]`.
    StatsD,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MetricType {
    Counter,
    Timer,
    Gauge,
    Raw,
}

impl MetricType {
    fn as_str(self) -> &'static str {
        match self {
            MetricType::Counter => "|c",
            MetricType::Timer => "|ms",
            MetricType::Gauge => "|g",
            MetricType::Raw => "",
        }
    }
}

/// A metric value.
///
/// Integers are rendered exactly, floating point values use the shortest representation that round-trips.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MetricValue {
    /// Signed integer.
    Signed(i64),

    /// Unsigned integer.
    Unsigned(u64),

    /// Floating point number.
    FloatingPoint(f64),
}

macro_rules! impl_from_value {
    ($variant:ident($target:ty): $($source:ty),+) => {
        $(
            impl From<$source> for MetricValue {
                fn from(value: $source) -> Self {
                    MetricValue::$variant(<$target>::from(value))
                }
            }
        )+
    };
}

impl_from_value!(Signed(i64): i8, i16, i32, i64);
impl_from_value!(Unsigned(u64): u8, u16, u32, u64);
impl_from_value!(FloatingPoint(f64): f32, f64);

impl From<usize> for MetricValue {
    fn from(value: usize) -> Self {
        MetricValue::Unsigned(value as u64)
    }
}

impl From<isize> for MetricValue {
    fn from(value: isize) -> Self {
        MetricValue::Signed(value as i64)
    }
}

struct MetricValueFormatter {
    int_writer: itoa::Buffer,
    float_writer: ryu::Buffer,
}

impl MetricValueFormatter {
    fn new() -> Self {
        Self { int_writer: itoa::Buffer::new(), float_writer: ryu::Buffer::new() }
    }

    fn format(&mut self, value: MetricValue) -> &str {
        match value {
            MetricValue::Signed(v) => self.int_writer.format(v),
            MetricValue::Unsigned(v) => self.int_writer.format(v),
            MetricValue::FloatingPoint(v) => self.float_writer.format(v),
        }
    }
}

/// Current Unix time in seconds, rounded to the nearest second.
pub(crate) fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() + u64::from(d.subsec_millis() >= 500))
        .unwrap_or(0)
}

/// Renders metrics into single lines of a backend's line protocol.
///
/// Lines are returned without a trailing newline: framing is the transport's business.
pub(crate) struct LineFormatter {
    protocol: Protocol,
    prefix: String,
    values: MetricValueFormatter,
    timestamp: fn() -> u64,
}

impl LineFormatter {
    pub fn new(protocol: Protocol, prefix: &str) -> Self {
        Self {
            protocol,
            prefix: prefix.to_string(),
            values: MetricValueFormatter::new(),
            timestamp: unix_timestamp,
        }
    }

    #[cfg(test)]
    pub fn with_timestamp(mut self, timestamp: fn() -> u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn format_counter(&mut self, stat: &str, count: i64, sample_rate: Option<f64>) -> Option<String> {
        self.render(stat, MetricValue::Signed(count), MetricType::Counter, sample_rate)
    }

    pub fn format_timer(&mut self, stat: &str, delta_ms: u64, sample_rate: Option<f64>) -> Option<String> {
        self.render(stat, MetricValue::Unsigned(delta_ms), MetricType::Timer, sample_rate)
    }

    pub fn format_gauge(&mut self, stat: &str, value: MetricValue) -> Option<String> {
        self.render(stat, value, MetricType::Gauge, None)
    }

    pub fn format_raw(&mut self, stat: &str, value: MetricValue, sample_rate: Option<f64>) -> Option<String> {
        self.render(stat, value, MetricType::Raw, sample_rate)
    }

    /// Renders a single line, or `None` if there is nothing to render.
    ///
    /// The sample rate is only annotated for StatsD, and only when it is below one.
    fn render(
        &mut self,
        stat: &str,
        value: MetricValue,
        metric_type: MetricType,
        sample_rate: Option<f64>,
    ) -> Option<String> {
        if stat.is_empty() {
            return None;
        }

        let value_str = self.values.format(value);
        let mut line = String::with_capacity(self.prefix.len() + stat.len() + value_str.len() + 16);
        line.push_str(&self.prefix);
        line.push_str(stat);

        match self.protocol {
            Protocol::Graphite => {
                line.push(' ');
                line.push_str(value_str);
                line.push(' ');
                line.push_str(itoa::Buffer::new().format((self.timestamp)()));
            }
            Protocol::StatsD => {
                line.push(':');
                line.push_str(value_str);
                line.push_str(metric_type.as_str());

                if let Some(rate) = sample_rate.filter(|rate| *rate < 1.0) {
                    line.push_str("|@");
                    line.push_str(ryu::Buffer::new().format(rate));
                }
            }
        }

        Some(line)
    }
}
