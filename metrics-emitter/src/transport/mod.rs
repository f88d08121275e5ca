use std::{
    io::{self, Write as _},
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream, UdpSocket},
    time::Duration,
};

use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::telemetry::TelemetryUpdate;

mod frames;
pub(crate) use self::frames::SMALLEST_VALID_LINE;
use self::frames::FrameWriter;

/// Kind of connection a backend is reached over.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TransportKind {
    Udp,
    Tcp,
    Null,
}

impl TransportKind {
    /// Returns the transport ID, a short acronym used in logs and telemetry.
    pub const fn transport_id(self) -> &'static str {
        match self {
            TransportKind::Udp => "udp",
            TransportKind::Tcp => "tcp",
            TransportKind::Null => "null",
        }
    }
}

/// Transport configuration.
#[derive(Clone, Debug)]
pub(crate) struct TransportConfiguration {
    pub max_udp_payload_len: usize,
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
}

/// An established connection to a collector.
pub(crate) enum Transport {
    Udp { socket: UdpSocket, writer: FrameWriter },
    Tcp(TcpStream),
    Null,
}

impl Transport {
    /// Connects to `host:port` over the given kind of transport.
    ///
    /// Name resolution and the TCP handshake run on the async runtime and are bounded by the connect timeout. Once
    /// established, the socket is switched to blocking writes bounded by the write timeout.
    pub async fn connect(
        kind: TransportKind,
        host: &str,
        port: u16,
        config: &TransportConfiguration,
    ) -> io::Result<Self> {
        match kind {
            TransportKind::Null => Ok(Transport::Null),
            TransportKind::Udp => {
                let addrs = with_timeout(config.connect_timeout, tokio::net::lookup_host((host, port)))
                    .await?
                    .collect::<Vec<_>>();
                let first = addrs.first().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::AddrNotAvailable, format!("no addresses found for {host}"))
                })?;

                let local: SocketAddr = if first.is_ipv4() {
                    (Ipv4Addr::UNSPECIFIED, 0).into()
                } else {
                    (Ipv6Addr::UNSPECIFIED, 0).into()
                };
                let socket = UdpSocket::bind(local)?;
                socket.connect(&addrs[..])?;
                socket.set_write_timeout(Some(config.write_timeout))?;

                Ok(Transport::Udp { socket, writer: FrameWriter::new(config.max_udp_payload_len) })
            }
            TransportKind::Tcp => {
                let stream =
                    with_timeout(config.connect_timeout, tokio::net::TcpStream::connect((host, port))).await?;
                let stream = stream.into_std()?;
                stream.set_nonblocking(false)?;
                stream.set_nodelay(true)?;
                stream.set_write_timeout(Some(config.write_timeout))?;

                Ok(Transport::Tcp(stream))
            }
        }
    }

    /// Transmits the given lines, in order.
    ///
    /// Over UDP, lines are packed into as few datagrams as the maximum payload length allows. Over TCP, all lines go
    /// out in a single newline-terminated write. The null transport discards everything.
    ///
    /// Returns `true` if anything was written.
    pub fn transmit<'a, I>(&mut self, lines: I, telemetry: &mut TelemetryUpdate) -> io::Result<bool>
    where
        I: IntoIterator<Item = &'a str>,
    {
        match self {
            Transport::Null => Ok(false),
            Transport::Udp { socket, writer } => {
                let result = writer.write_lines(lines);
                if result.lines_dropped() > 0 {
                    warn!(
                        lines_dropped = result.lines_dropped(),
                        "Dropped lines larger than the maximum UDP payload length."
                    );
                    telemetry.track_lines_dropped_oversize(result.lines_dropped(), result.bytes_dropped());
                }

                let mut frames = writer.frames();
                trace!(lines = result.lines_written(), frames = frames.len(), "Sending frames.");

                let mut frames_sent = 0;
                while let Some(frame) = frames.next_frame() {
                    match socket.send(frame) {
                        Ok(_) => {
                            trace!(bytes = frame.len(), "Sent frame.");
                            telemetry.track_frame_send_succeeded(frame.len());
                            frames_sent += 1;
                        }
                        Err(e) => {
                            debug!(error = %e, "Failed to send frame.");
                            telemetry.track_frame_send_failed(frame.len());
                            return Err(e);
                        }
                    }
                }

                Ok(frames_sent > 0)
            }
            Transport::Tcp(stream) => {
                let mut payload = String::new();
                for line in lines {
                    payload.push_str(line);
                    payload.push('\n');
                }

                if payload.is_empty() {
                    return Ok(false);
                }

                match stream.write_all(payload.as_bytes()) {
                    Ok(()) => {
                        trace!(bytes = payload.len(), "Sent payload.");
                        telemetry.track_frame_send_succeeded(payload.len());
                        Ok(true)
                    }
                    Err(e) => {
                        debug!(error = %e, "Failed to send payload.");
                        telemetry.track_frame_send_failed(payload.len());
                        Err(e)
                    }
                }
            }
        }
    }
}

async fn with_timeout<F, T>(duration: Duration, fut: F) -> io::Result<T>
where
    F: std::future::Future<Output = io::Result<T>>,
{
    match timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "timed out while connecting")),
    }
}
