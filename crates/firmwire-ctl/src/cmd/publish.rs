//! Publish an envelope to a firmwired instance as a series of DATA frames.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;

use firmwire_core::wire::fragment_frames;
use firmwire_core::Qos;

/// Default fragment payload size.
pub const DEFAULT_FRAGMENT_SIZE: usize = 1024;

pub async fn cmd_publish(
    path: &Path,
    to: &str,
    topic: &str,
    qos: Qos,
    fragment_size: usize,
    pace: Duration,
) -> Result<()> {
    let message =
        std::fs::read(path).with_context(|| format!("failed to read envelope: {}", path.display()))?;
    let frames = fragment_frames(&message, topic, qos, fragment_size)?;

    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .context("failed to bind publish socket")?;
    for frame in &frames {
        socket
            .send_to(frame, to)
            .await
            .with_context(|| format!("failed to send to {to}"))?;
        if !pace.is_zero() {
            tokio::time::sleep(pace).await;
        }
    }

    tracing::debug!(frames = frames.len(), to, "publish complete");
    println!(
        "Published {} bytes to {} on '{}' in {} fragments",
        message.len(),
        to,
        topic,
        frames.len()
    );
    Ok(())
}
