//! Relay session: the daemon's side of the message relay.
//!
//! A thin datagram adapter: SUBSCRIBE once, then receive DATA frames,
//! PING to keep the subscription alive and DISCONNECT on the way out.
//! Without a configured relay the session is a passive listener that
//! accepts frames from any sender and sends nothing.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::time::Instant;

use firmwire_core::config::SessionConfig;
use firmwire_core::wire::{FrameKind, RelayFrame};
use firmwire_core::Qos;

pub struct RelaySession {
    socket: UdpSocket,
    relay: Option<SocketAddr>,
}

impl RelaySession {
    /// Bind the local socket and resolve the relay address.
    pub async fn open(config: &SessionConfig) -> Result<Self> {
        let socket = UdpSocket::bind(&config.bind)
            .await
            .with_context(|| format!("failed to bind {}", config.bind))?;

        let relay = if config.broker.is_empty() {
            None
        } else {
            let addr = tokio::net::lookup_host(&config.broker)
                .await
                .with_context(|| format!("failed to resolve relay {}", config.broker))?
                .next()
                .with_context(|| format!("relay {} has no address", config.broker))?;
            Some(addr)
        };

        tracing::info!(
            local = %socket.local_addr()?,
            relay = ?relay,
            client_id = %config.client_id,
            "relay session open"
        );
        Ok(Self { socket, relay })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn relay(&self) -> Option<SocketAddr> {
        self.relay
    }

    /// Register interest in `topic`.
    pub async fn subscribe(&self, topic: &str, qos: Qos) -> Result<()> {
        self.send(&RelayFrame::subscribe(topic, qos)).await?;
        tracing::info!(topic, qos = ?qos, "subscribed");
        Ok(())
    }

    pub async fn ping(&self) -> Result<()> {
        self.send(&RelayFrame::control(FrameKind::Ping)).await?;
        tracing::trace!("keep-alive ping sent");
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.send(&RelayFrame::control(FrameKind::Disconnect)).await?;
        tracing::info!("relay session closed");
        Ok(())
    }

    /// Wait up to `timeout` for one datagram from the relay.
    ///
    /// Returns the datagram length, or `None` when the wait timed out.
    /// Datagrams from anyone other than the configured relay are dropped
    /// without extending the wait.
    pub async fn wait(&self, buf: &mut [u8], timeout: Duration) -> Result<Option<usize>> {
        let deadline = Instant::now() + timeout;
        loop {
            let (len, from) =
                match tokio::time::timeout_at(deadline, self.socket.recv_from(buf)).await {
                    Ok(result) => result.context("recv_from failed")?,
                    Err(_) => return Ok(None),
                };

            match self.relay {
                Some(relay) if relay != from => {
                    tracing::debug!(%from, "datagram from unknown sender, discarding");
                }
                _ => return Ok(Some(len)),
            }
        }
    }

    async fn send(&self, frame: &RelayFrame<'_>) -> Result<()> {
        let Some(relay) = self.relay else {
            return Ok(());
        };
        let datagram = frame.encode()?;
        self.socket
            .send_to(&datagram, relay)
            .await
            .with_context(|| format!("failed to send {:?} frame to {relay}", frame.kind))?;
        Ok(())
    }
}
