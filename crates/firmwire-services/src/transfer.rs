//! Transfer controller: owns the single in-flight transfer and drives it
//! through assembly, the envelope size gate and the verification gate.
//!
//! States: Idle → Receiving → Verifying → (Accepted | Rejected) → Idle.
//! Verifying and the two verdicts happen inside the call that delivers the
//! last fragment, so between calls the controller is only ever Idle or
//! Receiving. The transfer buffer is owned by the Receiving state; every
//! path out of it drops the buffer.

use std::path::{Path, PathBuf};

use thiserror::Error;

use firmwire_core::config::FirmwareConfig;
use firmwire_core::crypto::{self, VerificationError};
use firmwire_core::envelope::{Envelope, EnvelopeError};

use crate::assembler::{AssemblyError, Transfer};
use crate::service::{Delivery, MessageHandler};
use crate::sink::{PersistenceSink, SinkError};

/// Observable controller state between deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Receiving,
}

#[derive(Debug)]
enum State {
    Idle,
    Receiving(Transfer),
}

/// What one delivery did.
#[derive(Debug)]
pub enum Outcome {
    /// The fragment was dropped without touching any transfer.
    Ignored(Ignored),
    /// The fragment was written; more are expected.
    Receiving { bytes_written: u64, total_len: u32 },
    /// Verified and persisted.
    Accepted {
        firmware_len: usize,
        digest: [u8; 32],
    },
    /// Verified, but the sink failed. The signature verdict stands.
    Unsaved {
        firmware_len: usize,
        digest: [u8; 32],
        error: TransferError,
    },
    /// The transfer was discarded.
    Rejected(TransferError),
}

impl Outcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Outcome::Accepted { .. })
    }
}

/// Why a fragment was ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ignored {
    /// Not published on the firmware topic.
    OtherTopic,
    /// A new message started while another is still being received.
    TransferActive { active_len: u32 },
    /// A continuation fragment arrived with no transfer in flight.
    NoActiveTransfer,
    /// A continuation fragment declares a different message length.
    LengthChanged { expected: u32, actual: u32 },
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Verification(#[from] VerificationError),

    #[error(transparent)]
    Persistence(#[from] SinkError),
}

impl TransferError {
    /// Resource exhaustion, as opposed to a problem with the message itself.
    pub fn is_systemic(&self) -> bool {
        matches!(self, TransferError::Assembly(AssemblyError::Allocation { .. }))
    }
}

/// Run the envelope codec and the verification gate over a complete buffer,
/// returning the firmware segment on success.
pub fn open_envelope(buffer: &[u8]) -> Result<&[u8], TransferError> {
    let envelope = Envelope::parse(buffer)?;
    crypto::verify(envelope.public_key, envelope.signature, envelope.firmware)?;
    Ok(envelope.firmware)
}

pub struct TransferController<S> {
    topic: String,
    destination: PathBuf,
    max_transfer_bytes: u32,
    sink: S,
    state: State,
}

impl<S: PersistenceSink> TransferController<S> {
    pub fn new(
        topic: impl Into<String>,
        destination: impl Into<PathBuf>,
        max_transfer_bytes: u32,
        sink: S,
    ) -> Self {
        Self {
            topic: topic.into(),
            destination: destination.into(),
            max_transfer_bytes,
            sink,
            state: State::Idle,
        }
    }

    pub fn from_config(config: &FirmwareConfig, sink: S) -> Self {
        Self::new(
            config.topic.clone(),
            config.save_as.clone(),
            config.max_transfer_bytes,
            sink,
        )
    }

    pub fn phase(&self) -> Phase {
        match self.state {
            State::Idle => Phase::Idle,
            State::Receiving(_) => Phase::Receiving,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Feed one delivery through the state machine.
    pub fn handle(&mut self, delivery: &Delivery<'_>) -> Outcome {
        if delivery.topic != self.topic {
            tracing::trace!(topic = delivery.topic, "not the firmware topic, ignoring");
            return Outcome::Ignored(Ignored::OtherTopic);
        }

        match std::mem::replace(&mut self.state, State::Idle) {
            State::Idle => {
                if !delivery.new_message {
                    tracing::debug!(
                        offset = delivery.offset,
                        len = delivery.payload.len(),
                        "continuation fragment with no transfer in flight, ignoring"
                    );
                    return Outcome::Ignored(Ignored::NoActiveTransfer);
                }

                let transfer = match Transfer::begin(delivery.total_len, self.max_transfer_bytes) {
                    Ok(t) => t,
                    Err(e) => {
                        tracing::error!(
                            total_len = delivery.total_len,
                            error = %e,
                            "out of buffer, firmware message rejected"
                        );
                        return Outcome::Rejected(e.into());
                    }
                };
                tracing::debug!(
                    total_len = delivery.total_len,
                    qos = ?delivery.qos,
                    "firmware transfer started"
                );
                self.receive(transfer, delivery)
            }

            State::Receiving(transfer) => {
                let active_len = transfer.total_len();
                if delivery.new_message {
                    tracing::warn!(
                        active_len,
                        total_len = delivery.total_len,
                        "new firmware message while a transfer is active, ignoring"
                    );
                    self.state = State::Receiving(transfer);
                    return Outcome::Ignored(Ignored::TransferActive { active_len });
                }
                if delivery.total_len != active_len {
                    tracing::warn!(
                        expected = active_len,
                        actual = delivery.total_len,
                        offset = delivery.offset,
                        "fragment declares a different message length, ignoring"
                    );
                    self.state = State::Receiving(transfer);
                    return Outcome::Ignored(Ignored::LengthChanged {
                        expected: active_len,
                        actual: delivery.total_len,
                    });
                }
                self.receive(transfer, delivery)
            }
        }
    }

    /// Write a fragment. Leaves the controller Receiving unless the transfer
    /// completed or the fragment was out of bounds.
    fn receive(&mut self, mut transfer: Transfer, delivery: &Delivery<'_>) -> Outcome {
        if let Err(e) = transfer.write(&delivery.fragment()) {
            tracing::warn!(
                offset = delivery.offset,
                len = delivery.payload.len(),
                total_len = transfer.total_len(),
                error = %e,
                "fragment out of bounds, transfer discarded"
            );
            return Outcome::Rejected(e.into());
        }

        if !transfer.is_complete() {
            let outcome = Outcome::Receiving {
                bytes_written: transfer.bytes_written(),
                total_len: transfer.total_len(),
            };
            self.state = State::Receiving(transfer);
            return outcome;
        }

        self.resolve(transfer)
    }

    /// Verifying → Accepted | Rejected. Consumes the transfer; the buffer is
    /// freed when this returns.
    fn resolve(&mut self, transfer: Transfer) -> Outcome {
        let total_len = transfer.total_len();
        if transfer.bytes_written() != u64::from(total_len) {
            tracing::warn!(
                written = transfer.bytes_written(),
                total_len,
                "fragments did not cover the message exactly"
            );
        }

        let buffer = transfer.into_buffer();
        let firmware = match open_envelope(&buffer) {
            Ok(fw) => fw,
            Err(e) => {
                tracing::warn!(total_len, error = %e, "firmware rejected");
                return Outcome::Rejected(e);
            }
        };

        let digest = crypto::sha256(firmware);
        tracing::info!(
            firmware_len = firmware.len(),
            digest = %hex::encode(digest),
            "firmware signature verified"
        );

        match self.sink.save(&self.destination, firmware) {
            Ok(()) => {
                tracing::info!(
                    path = %self.destination.display(),
                    firmware_len = firmware.len(),
                    "firmware accepted"
                );
                Outcome::Accepted {
                    firmware_len: firmware.len(),
                    digest,
                }
            }
            Err(e) => {
                tracing::error!(
                    path = %self.destination.display(),
                    error = %e,
                    "verified firmware could not be saved"
                );
                Outcome::Unsaved {
                    firmware_len: firmware.len(),
                    digest,
                    error: e.into(),
                }
            }
        }
    }
}

impl<S: PersistenceSink> MessageHandler for TransferController<S> {
    type Outcome = Outcome;

    fn on_message(&mut self, delivery: &Delivery<'_>) -> Outcome {
        self.handle(delivery)
    }

    fn abandon(&mut self) {
        if let State::Receiving(transfer) = std::mem::replace(&mut self.state, State::Idle) {
            tracing::warn!(
                written = transfer.bytes_written(),
                total_len = transfer.total_len(),
                "abandoning partially received firmware"
            );
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
