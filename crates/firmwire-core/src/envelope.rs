//! Envelope codec: slices a received buffer into its signature, public key
//! and firmware segments.
//!
//! Parsing is a sequence of hard gates. The size gate compares the lengths
//! the header declares against the length actually received; no segment is
//! sliced until it has passed, so a forged header can never point a slice
//! past the end of the buffer.

use thiserror::Error;
use zerocopy::{AsBytes, FromBytes};

use crate::wire::{EnvelopeHeader, ENVELOPE_HEADER_SIZE};

/// Borrowed view over a validated envelope.
///
/// The three segments are non-overlapping sub-slices of the buffer passed to
/// [`Envelope::parse`]; nothing is copied and the buffer must outlive the
/// view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope<'a> {
    pub signature: &'a [u8],
    pub public_key: &'a [u8],
    pub firmware: &'a [u8],
}

impl<'a> Envelope<'a> {
    /// Parse `buffer` as a complete envelope.
    pub fn parse(buffer: &'a [u8]) -> Result<Self, EnvelopeError> {
        let header = EnvelopeHeader::read_from_prefix(buffer).ok_or(
            EnvelopeError::TruncatedHeader {
                actual: buffer.len(),
            },
        )?;

        let expected = header.declared_len();
        if expected != buffer.len() as u64 {
            return Err(EnvelopeError::SizeMismatch {
                expected,
                actual: buffer.len(),
            });
        }

        // Lengths are now known to sum to the buffer length, so every
        // cumulative offset below is in bounds.
        let sig_len = header.sig_len.get() as usize;
        let pub_key_len = header.pub_key_len.get() as usize;

        let segments = &buffer[ENVELOPE_HEADER_SIZE..];
        let (signature, rest) = segments.split_at(sig_len);
        let (public_key, firmware) = rest.split_at(pub_key_len);

        Ok(Self {
            signature,
            public_key,
            firmware,
        })
    }

    /// Pack three segments into the wire layout.
    pub fn encode(
        signature: &[u8],
        public_key: &[u8],
        firmware: &[u8],
    ) -> Result<Vec<u8>, EnvelopeError> {
        let header = EnvelopeHeader::new(
            segment_len(signature)?,
            segment_len(public_key)?,
            segment_len(firmware)?,
        );

        let mut out = Vec::with_capacity(
            ENVELOPE_HEADER_SIZE + signature.len() + public_key.len() + firmware.len(),
        );
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(signature);
        out.extend_from_slice(public_key);
        out.extend_from_slice(firmware);
        Ok(out)
    }

    /// Length of the whole envelope on the wire.
    pub fn wire_len(&self) -> usize {
        ENVELOPE_HEADER_SIZE + self.signature.len() + self.public_key.len() + self.firmware.len()
    }
}

fn segment_len(segment: &[u8]) -> Result<u32, EnvelopeError> {
    u32::try_from(segment.len()).map_err(|_| EnvelopeError::SegmentTooLarge(segment.len()))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("envelope of {actual} bytes is shorter than the {}-byte header", ENVELOPE_HEADER_SIZE)]
    TruncatedHeader { actual: usize },

    #[error("envelope header declares {expected} bytes but {actual} were received")]
    SizeMismatch { expected: u64, actual: usize },

    #[error("segment of {0} bytes does not fit a u32 length field")]
    SegmentTooLarge(usize),
}
