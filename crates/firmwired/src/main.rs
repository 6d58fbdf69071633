//! firmwired: receives signed firmware from a message relay, verifies it
//! and writes it to disk.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast;
use tokio::time::Instant;

use firmwire_core::config::{FirmwireConfig, SessionConfig};
use firmwire_core::wire::{FrameKind, RelayFrame, MAX_DATAGRAM};
use firmwire_services::{
    Delivery, FileSink, MessageHandler, PersistenceSink, Phase, TransferController,
};

mod logging;
mod session;

use logging::{init_logging, LogLevel};
use session::RelaySession;

#[derive(Parser, Debug)]
#[command(name = "firmwired", version, about = "Signed firmware receiver")]
struct Args {
    /// Config file (default: $FIRMWIRE_CONFIG or ~/.config/firmwire/config.toml).
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Save verified firmware as this file.
    #[arg(short = 'f', long, value_name = "FILE")]
    save_as: Option<PathBuf>,

    /// Local address to receive relay frames on.
    #[arg(short = 'b', long, value_name = "ADDR")]
    bind: Option<String>,

    /// Relay to subscribe with, host:port.
    #[arg(short = 'r', long, value_name = "ADDR")]
    broker: Option<String>,

    /// Firmware topic.
    #[arg(long)]
    topic: Option<String>,

    /// Subscription QoS, 0-2.
    #[arg(short = 'q', long)]
    qos: Option<u8>,

    /// Keep-alive seconds.
    #[arg(short = 'k', long)]
    keep_alive: Option<u16>,

    /// Client id reported in logs.
    #[arg(short = 'i', long)]
    client_id: Option<String>,

    /// Command timeout in milliseconds.
    #[arg(short = 'C', long, value_name = "MS")]
    cmd_timeout: Option<u32>,

    /// Test mode: leave after the first wait cycle.
    #[arg(short = 'T', long)]
    test_mode: bool,

    /// Minimum log level; RUST_LOG overrides.
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,
}

impl Args {
    fn apply(&self, config: &mut FirmwireConfig) {
        if let Some(v) = &self.save_as {
            config.firmware.save_as = v.clone();
        }
        if let Some(v) = &self.bind {
            config.session.bind = v.clone();
        }
        if let Some(v) = &self.broker {
            config.session.broker = v.clone();
        }
        if let Some(v) = &self.topic {
            config.firmware.topic = v.clone();
        }
        if let Some(v) = self.qos {
            config.firmware.qos = v;
        }
        if let Some(v) = self.keep_alive {
            config.session.keep_alive_secs = v;
        }
        if let Some(v) = &self.client_id {
            config.session.client_id = v.clone();
        }
        if let Some(v) = self.cmd_timeout {
            config.session.cmd_timeout_ms = v;
        }
        if self.test_mode {
            config.session.test_mode = true;
        }
    }
}

fn load_config(args: &Args) -> FirmwireConfig {
    let loaded = match &args.config {
        Some(path) => FirmwireConfig::load_from(path),
        None => {
            if let Err(e) = FirmwireConfig::write_default_if_missing() {
                tracing::warn!(error = %e, "failed to write default config");
            }
            FirmwireConfig::load()
        }
    };
    loaded.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        FirmwireConfig::default()
    })
}

/// What the session loop does after a datagram.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Decode one datagram and hand DATA frames to the controller.
fn handle_datagram<S: PersistenceSink>(
    controller: &mut TransferController<S>,
    datagram: &[u8],
) -> Flow {
    let frame = match RelayFrame::decode(datagram) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(error = %e, len = datagram.len(), "malformed relay frame, discarding");
            return Flow::Continue;
        }
    };

    match frame.kind {
        FrameKind::Data => {
            if let Some(delivery) = Delivery::from_frame(&frame) {
                tracing::trace!(
                    topic = delivery.topic,
                    offset = delivery.offset,
                    len = delivery.payload.len(),
                    total_len = delivery.total_len,
                    "fragment received"
                );
                controller.on_message(&delivery);
            }
            Flow::Continue
        }
        FrameKind::Disconnect => {
            tracing::info!("relay closed the session");
            Flow::Stop
        }
        FrameKind::Ping | FrameKind::Subscribe => Flow::Continue,
    }
}

/// Why the session loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Shutdown,
    RelayClosed,
    TestMode,
    Failed,
}

/// Run the session loop until shutdown, a relay DISCONNECT, an I/O failure
/// or, in test mode, the end of the first wait cycle.
///
/// A wait that times out while a transfer is in progress abandons it: the
/// relay delivered nothing for a whole `cmd_timeout`, so the remaining
/// fragments are lost and the publisher has to start over. Any partial
/// transfer is also abandoned on the way out.
async fn run_session<S: PersistenceSink>(
    session: &RelaySession,
    controller: &mut TransferController<S>,
    settings: &SessionConfig,
    shutdown: &mut broadcast::Receiver<()>,
) -> Exit {
    let cmd_timeout = Duration::from_millis(u64::from(settings.cmd_timeout_ms));
    let keep_alive = (settings.keep_alive_secs > 0)
        .then(|| Duration::from_secs(u64::from(settings.keep_alive_secs)));
    let mut last_ping = Instant::now();
    let mut buf = vec![0u8; MAX_DATAGRAM];

    let exit = loop {
        tokio::select! {
            _ = shutdown.recv() => break Exit::Shutdown,
            waited = session.wait(&mut buf, cmd_timeout) => match waited {
                Ok(Some(len)) => {
                    if handle_datagram(controller, &buf[..len]) == Flow::Stop {
                        break Exit::RelayClosed;
                    }
                }
                Ok(None) => {
                    if controller.phase() == Phase::Receiving {
                        tracing::warn!(
                            timeout_ms = settings.cmd_timeout_ms,
                            "no fragment within the command timeout"
                        );
                        controller.abandon();
                    }
                    if let Err(e) = session.ping().await {
                        tracing::error!(error = %e, "keep-alive ping failed");
                        break Exit::Failed;
                    }
                    last_ping = Instant::now();
                }
                Err(e) => {
                    tracing::error!(error = %e, "message wait failed");
                    break Exit::Failed;
                }
            },
        }

        if settings.test_mode {
            tracing::info!("test mode, leaving after one wait cycle");
            break Exit::TestMode;
        }
        if keep_alive.is_some_and(|every| last_ping.elapsed() >= every) {
            if let Err(e) = session.ping().await {
                tracing::error!(error = %e, "keep-alive ping failed");
                break Exit::Failed;
            }
            last_ping = Instant::now();
        }
    };

    controller.abandon();
    exit
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_level);

    let mut config = load_config(&args);
    args.apply(&mut config);
    config.validate().context("invalid configuration")?;
    let qos = config.qos()?;

    tracing::info!(
        topic = %config.firmware.topic,
        save_as = %config.firmware.save_as.display(),
        qos = ?qos,
        "firmwired starting"
    );

    let session = RelaySession::open(&config.session).await?;
    session.subscribe(&config.firmware.topic, qos).await?;

    let mut controller = TransferController::from_config(&config.firmware, FileSink);

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Session loop ─────────────────────────────────────────────────────────
    tracing::info!("waiting for firmware");
    let exit = run_session(&session, &mut controller, &config.session, &mut shutdown_rx).await;
    tracing::debug!(exit = ?exit, "session loop finished");

    if let Err(e) = session.disconnect().await {
        tracing::warn!(error = %e, "disconnect failed");
    }
    tracing::info!("firmwired stopped");
    Ok(())
}
