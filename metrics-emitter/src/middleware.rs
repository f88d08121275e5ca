//! Request instrumentation.
//!
//! [`instrument`] wraps a unit of work, such as the handling of a single request, and reports on it through a single
//! pipeline: one counter for the request, one counter for its outcome, and one timing. Exactly one transmission
//! happens per unit of work, whether it succeeds or fails.

use std::future::Future;

use tracing::debug;

use crate::{emitter::Emitter, error::Error, timer::Timer};

/// Stat name under which the duration of instrumented work is recorded.
pub const RESPONSE_TIME_STAT: &str = "response.time";

/// Runs `work`, reporting on it to the given backend (or the default backend).
///
/// `request_stat` is counted before the work starts. Once it completes, `classify` maps its result to an outcome stat,
/// such as `response.status.200` or `response.exception`, which is counted as well, and the duration of the work is
/// recorded as [`RESPONSE_TIME_STAT`]. All three metrics are flushed together when the work is done.
///
/// The result of `work` is returned untouched.
///
/// # Errors
///
/// If the backend cannot be resolved or connected to, the work is not run and the error is returned, converted into
/// the work's error type. If flushing the metrics fails, the error is returned in place of the work's result. Neither
/// happens when the emitter fails silently: metrics are then dropped without affecting the work.
pub async fn instrument<F, T, E, C>(
    emitter: &Emitter,
    backend: Option<&str>,
    request_stat: &str,
    classify: C,
    work: F,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<Error>,
    C: FnOnce(&Result<T, E>) -> String,
{
    let mut client = emitter.client(backend).await?;
    let mut timer = Timer::new();

    let mut pipe = client.pipe();
    pipe.increment(request_stat, 1, 1.0)?;

    let result = timer.measure(work).await;

    pipe.increment(&classify(&result), 1, 1.0)?;
    pipe.timing(RESPONSE_TIME_STAT, timer.elapsed_ms().unwrap_or_default(), 1.0)?;

    match pipe.finish() {
        Err(e) if !emitter.fails_silently() => Err(e.into()),
        Err(e) => {
            debug!(error = %e, "Failed to flush request metrics.");
            result
        }
        Ok(_) => result,
    }
}

#[cfg(test)]
mod tests {
    use std::{net::UdpSocket, time::Duration};

    use super::instrument;
    use crate::{emitter::Emitter, error::Error};

    #[derive(Debug)]
    enum HandlerError {
        Status(u16),
        Metrics(Error),
    }

    impl From<Error> for HandlerError {
        fn from(e: Error) -> Self {
            HandlerError::Metrics(e)
        }
    }

    fn classify(result: &Result<u16, HandlerError>) -> String {
        match result {
            Ok(status) | Err(HandlerError::Status(status)) => format!("response.status.{status}"),
            Err(HandlerError::Metrics(_)) => String::from("response.exception"),
        }
    }

    fn collector() -> (UdpSocket, u16) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let port = socket.local_addr().unwrap().port();
        (socket, port)
    }

    fn recv_string(socket: &UdpSocket) -> String {
        let mut buf = [0u8; 2048];
        let len = socket.recv(&mut buf).unwrap();
        String::from_utf8(buf[..len].to_vec()).unwrap()
    }

    #[tokio::test]
    async fn one_transmission_per_request() {
        let (collector, port) = collector();
        let emitter = Emitter::builder()
            .with_backend("statsd", format!("udp+statsd://127.0.0.1:{port}"))
            .unwrap()
            .with_prefix("muffin.")
            .build()
            .unwrap();

        let result = instrument(&emitter, None, "request.method.GET", classify, async { Ok(200) }).await;
        assert_eq!(result.unwrap(), 200);
        assert_eq!(
            recv_string(&collector),
            "muffin.request.method.GET:1|c\nmuffin.response.status.200:1|c\nmuffin.response.time:0|ms\n"
        );

        let result =
            instrument(&emitter, None, "request.method.GET", classify, async { Err(HandlerError::Status(302)) })
                .await;
        assert!(matches!(result, Err(HandlerError::Status(302))));
        assert_eq!(
            recv_string(&collector),
            "muffin.request.method.GET:1|c\nmuffin.response.status.302:1|c\nmuffin.response.time:0|ms\n"
        );
    }

    #[tokio::test]
    async fn unreachable_backend_fails_silently() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let emitter = Emitter::builder()
            .with_backend("tcp", format!("tcp+statsd://127.0.0.1:{port}"))
            .unwrap()
            .with_fail_silently(true)
            .build()
            .unwrap();

        let result = instrument(&emitter, None, "request.method.GET", classify, async { Ok(200) }).await;
        assert_eq!(result.unwrap(), 200);
    }

    #[tokio::test]
    async fn unreachable_backend_aborts() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let emitter = Emitter::builder()
            .with_backend("tcp", format!("tcp+statsd://127.0.0.1:{port}"))
            .unwrap()
            .build()
            .unwrap();

        let mut ran = false;
        let result = instrument(&emitter, None, "request.method.GET", classify, async {
            ran = true;
            Ok(200)
        })
        .await;

        assert!(matches!(result, Err(HandlerError::Metrics(Error::Connection { .. }))));
        assert!(!ran);
    }
}
