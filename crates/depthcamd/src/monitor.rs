//! Local subscriber that reports per-stream delivery rates.

use depthcam_core::CameraMessage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

/// Spawn a task that drains `rx` and logs the observed rate every `interval`.
pub fn spawn_monitor(
    topic: String,
    mut rx: broadcast::Receiver<Arc<CameraMessage>>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        let mut received = 0u64;
        let mut lagged = 0u64;
        let mut last: Option<Arc<CameraMessage>> = None;

        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Ok(msg) => {
                        received += 1;
                        last = Some(msg);
                    }
                    Err(RecvError::Lagged(n)) => lagged += n,
                    Err(RecvError::Closed) => break,
                },
                _ = ticker.tick() => {
                    let rate = received as f64 / interval.as_secs_f64();
                    match &last {
                        Some(msg) => tracing::info!(
                            topic = %topic,
                            rate_hz = (rate * 10.0).round() / 10.0,
                            lagged,
                            width = msg.image.width,
                            height = msg.image.height,
                            encoding = msg.image.encoding.as_str(),
                            frame_id = %msg.image.frame_id,
                            "stream rate"
                        ),
                        None => tracing::warn!(topic = %topic, "no samples received"),
                    }
                    received = 0;
                    lagged = 0;
                }
            }
        }
        tracing::debug!(topic = %topic, "monitor exiting");
    })
}
