//! firmwire-ctl: operator tool for signing, inspecting and publishing
//! firmware envelopes.

mod cmd;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use firmwire_core::wire::DEFAULT_FIRMWARE_TOPIC;
use firmwire_core::Qos;

#[derive(Parser, Debug)]
#[command(name = "firmwire-ctl", version, about = "Firmwire operator tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a signing keypair.
    Keygen {
        /// Where to write the secret key.
        #[arg(short, long, default_value = "firmwire.key")]
        out: PathBuf,
        /// Replace an existing key file.
        #[arg(long)]
        force: bool,
    },
    /// Sign a firmware image into an envelope.
    Sign {
        #[arg(short, long)]
        key: PathBuf,
        /// Firmware image to sign.
        firmware: PathBuf,
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Parse and verify a stored envelope.
    Inspect {
        envelope: PathBuf,
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Send an envelope to firmwired as DATA frames.
    Publish {
        envelope: PathBuf,
        /// firmwired address, host:port.
        #[arg(long, default_value = "127.0.0.1:18830")]
        to: String,
        #[arg(long, default_value = DEFAULT_FIRMWARE_TOPIC)]
        topic: String,
        #[arg(short, long, default_value_t = 2)]
        qos: u8,
        /// Payload bytes per fragment.
        #[arg(long, default_value_t = cmd::publish::DEFAULT_FRAGMENT_SIZE)]
        fragment_size: usize,
        /// Pause between fragments, in milliseconds.
        #[arg(long, default_value_t = 0)]
        pace_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Keygen { out, force } => cmd::keys::cmd_keygen(&out, force),
        Command::Sign { key, firmware, out } => cmd::envelope::cmd_sign(&key, &firmware, &out),
        Command::Inspect { envelope, json } => cmd::envelope::cmd_inspect(&envelope, json),
        Command::Publish {
            envelope,
            to,
            topic,
            qos,
            fragment_size,
            pace_ms,
        } => {
            let qos = Qos::try_from(qos)?;
            cmd::publish::cmd_publish(
                &envelope,
                &to,
                &topic,
                qos,
                fragment_size,
                Duration::from_millis(pace_ms),
            )
            .await
        }
    }
}
