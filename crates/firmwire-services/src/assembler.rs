//! Fragment assembler: accumulates offset-addressed fragments into one
//! buffer sized by the transport-reported total length.
//!
//! The assembler trusts the transport for ordering. It checks that every
//! fragment lands inside the buffer and nothing else: duplicate ranges
//! overwrite, gaps stay zeroed. The envelope size gate and the signature
//! gate downstream are what reject a buffer assembled from bad fragments.

use thiserror::Error;

/// One transport-level delivery unit of a larger message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment<'a> {
    pub first_of_message: bool,
    pub last_of_message: bool,
    /// Where `payload` lands inside the message.
    pub offset: u32,
    pub payload: &'a [u8],
}

impl Fragment<'_> {
    /// One past the last byte this fragment writes, computed without wrap.
    pub fn end(&self) -> u64 {
        u64::from(self.offset) + self.payload.len() as u64
    }
}

/// One message being reassembled.
///
/// Owns its buffer outright. Consuming the transfer with
/// [`Transfer::into_buffer`] is the only way to get the bytes out.
#[derive(Debug)]
pub struct Transfer {
    total_len: u32,
    buffer: Vec<u8>,
    bytes_written: u64,
    complete: bool,
}

impl Transfer {
    /// Allocate a zeroed buffer of exactly `total_len` bytes.
    ///
    /// A zero-length message is refused, as is anything larger than
    /// `limit` or anything the allocator cannot satisfy.
    pub fn begin(total_len: u32, limit: u32) -> Result<Self, AssemblyError> {
        if total_len == 0 {
            return Err(AssemblyError::Allocation {
                requested: total_len,
                cause: AllocationFailure::ZeroLength,
            });
        }
        if total_len > limit {
            return Err(AssemblyError::Allocation {
                requested: total_len,
                cause: AllocationFailure::OverLimit(limit),
            });
        }

        let len = total_len as usize;
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(len)
            .map_err(|_| AssemblyError::Allocation {
                requested: total_len,
                cause: AllocationFailure::OutOfMemory,
            })?;
        buffer.resize(len, 0);

        Ok(Self {
            total_len,
            buffer,
            bytes_written: 0,
            complete: false,
        })
    }

    /// Copy `fragment` into the buffer at its offset.
    ///
    /// The bounds check runs before anything is copied; a rejected
    /// fragment leaves the buffer untouched.
    pub fn write(&mut self, fragment: &Fragment<'_>) -> Result<(), AssemblyError> {
        let end = fragment.end();
        if end > u64::from(self.total_len) {
            return Err(AssemblyError::Bounds {
                offset: fragment.offset,
                len: fragment.payload.len(),
                total_len: self.total_len,
            });
        }

        let start = fragment.offset as usize;
        self.buffer[start..end as usize].copy_from_slice(fragment.payload);
        self.bytes_written += fragment.payload.len() as u64;

        if fragment.last_of_message {
            self.complete = true;
        }
        Ok(())
    }

    /// True once the fragment marked last-of-message has been written.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn total_len(&self) -> u32 {
        self.total_len
    }

    /// Sum of all fragment lengths written so far, duplicates included.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Give up the buffer, ending the transfer.
    pub fn into_buffer(self) -> Vec<u8> {
        self.buffer
    }
}

/// Why a transfer buffer could not be allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationFailure {
    ZeroLength,
    /// Larger than the configured cap.
    OverLimit(u32),
    OutOfMemory,
}

impl std::fmt::Display for AllocationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZeroLength => write!(f, "message declares zero length"),
            Self::OverLimit(limit) => write!(f, "limit is {limit} bytes"),
            Self::OutOfMemory => write!(f, "out of memory"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblyError {
    #[error("cannot allocate {requested}-byte transfer buffer: {cause}")]
    Allocation {
        requested: u32,
        cause: AllocationFailure,
    },

    #[error("fragment of {len} bytes at offset {offset} overruns {total_len}-byte transfer")]
    Bounds {
        offset: u32,
        len: usize,
        total_len: u32,
    },
}
