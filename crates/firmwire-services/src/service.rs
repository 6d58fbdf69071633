//! Message delivery contract between the session loop and the pipeline.
//!
//! The session loop owns the network. For every inbound fragment it builds
//! a [`Delivery`] and calls [`MessageHandler::on_message`] synchronously;
//! the handler runs to completion (assembly, parsing, verification,
//! persistence) before the loop reads the next datagram.
//!
//! Delivery contract the session loop must uphold:
//!   - fragments of one message arrive in order, each at most once
//!   - the first fragment of a message carries `new_message`, the one
//!     covering its final byte carries `last_fragment`
//!   - fragments of two messages on the firmware topic are not interleaved
//!
//! The handler checks offsets against the buffer and nothing more. A
//! transport that reorders or duplicates fragments produces a corrupted
//! buffer, which the envelope and signature gates then reject.

use firmwire_core::wire::{FrameKind, RelayFrame};
use firmwire_core::Qos;

use crate::assembler::Fragment;

/// One inbound fragment as handed over by the session loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery<'a> {
    pub topic: &'a str,
    pub new_message: bool,
    pub last_fragment: bool,
    /// Length of the whole message this fragment belongs to.
    pub total_len: u32,
    pub offset: u32,
    pub payload: &'a [u8],
    pub qos: Qos,
}

impl<'a> Delivery<'a> {
    /// Build a delivery from a DATA relay frame. Other frame kinds carry no
    /// message and yield `None`.
    pub fn from_frame(frame: &RelayFrame<'a>) -> Option<Self> {
        if frame.kind != FrameKind::Data {
            return None;
        }
        Some(Self {
            topic: frame.topic,
            new_message: frame.new_message,
            last_fragment: frame.last_fragment,
            total_len: frame.total_len,
            offset: frame.offset,
            payload: frame.payload,
            qos: frame.qos,
        })
    }

    /// The assembler's view of this delivery.
    pub fn fragment(&self) -> Fragment<'a> {
        Fragment {
            first_of_message: self.new_message,
            last_of_message: self.last_fragment,
            offset: self.offset,
            payload: self.payload,
        }
    }
}

/// Anything the session loop can hand inbound fragments to.
pub trait MessageHandler {
    type Outcome;

    /// Handle one fragment. Must not block on I/O other than persistence.
    fn on_message(&mut self, delivery: &Delivery<'_>) -> Self::Outcome;

    /// Drop any partially received message. Called when the session ends.
    fn abandon(&mut self);
}
