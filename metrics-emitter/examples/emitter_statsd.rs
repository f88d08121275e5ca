use std::time::Duration;

use metrics_emitter::{middleware, Emitter, Error};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let emitter = Emitter::builder()
        .with_backend("statsd", "udp+statsd://localhost:8125")
        .and_then(|b| b.with_backend("graphite", "tcp://localhost:2003"))
        .expect("failed to parse backend URLs")
        .with_prefix("example.")
        .with_fail_silently(true)
        .build()
        .expect("failed to build emitter");

    emitter.send("started", 1, Some("graphite")).await.expect("failed to send");

    let mut rng = Xoshiro256StarStar::try_from_rng(&mut rand::rng()).unwrap();

    // Loop over and over, pretending to handle requests.
    loop {
        let latency = Duration::from_millis(rng.random_range(5..50));
        let status = if rand::random_bool(0.9) { 200 } else { 500 };

        let result = middleware::instrument(
            &emitter,
            None,
            "request.method.GET",
            |result: &Result<u16, Error>| match result {
                Ok(status) => format!("response.status.{status}"),
                Err(_) => String::from("response.exception"),
            },
            async move {
                tokio::time::sleep(latency).await;
                Ok(status)
            },
        )
        .await;

        if let Ok(mut client) = emitter.client(None).await {
            let mut pipe = client.pipe();
            if let Err(e) = pipe.gauge("queue_depth", rng.random_range(0..100u64)) {
                tracing::warn!(error = %e, "Failed to record queue depth.");
            }
            if let Err(e) = pipe.increment("loops", 1, 0.1) {
                tracing::warn!(error = %e, "Failed to count loop.");
            }
            if let Err(e) = pipe.finish() {
                tracing::warn!(error = %e, "Failed to flush metrics.");
            }
        }

        tracing::info!(?result, "Handled request.");
    }
}
