//! Firmwire wire format: on-wire types for envelopes and relay frames.
//!
//! These types ARE the protocol. Every field and every size is part of the
//! wire format; a publisher built against an older layout must keep
//! producing bytes this module accepts.
//!
//! All multi-byte integers are little-endian and wrapped in zerocopy's
//! byteorder types, so every header is alignment-1, padding-free and can be
//! read from any offset of an untrusted buffer. There is no unsafe code in
//! this module.

use static_assertions::assert_eq_size;
use zerocopy::byteorder::{LittleEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

type U16Le = U16<LittleEndian>;
type U32Le = U32<LittleEndian>;

// ── Envelope Header ──────────────────────────────────────────────────────────

/// Fixed header at the start of every firmware envelope.
///
/// Followed by three contiguous segments in this order: signature
/// (`sig_len` bytes), public key (`pub_key_len` bytes), firmware
/// (`fw_len` bytes). The envelope length must equal
/// `ENVELOPE_HEADER_SIZE + sig_len + pub_key_len + fw_len` exactly.
///
/// Wire size: 12 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct EnvelopeHeader {
    /// Length of the signature segment.
    pub sig_len: U32Le,
    /// Length of the public key segment.
    pub pub_key_len: U32Le,
    /// Length of the firmware segment.
    pub fw_len: U32Le,
}

assert_eq_size!(EnvelopeHeader, [u8; 12]);

/// Size of [`EnvelopeHeader`] on the wire.
pub const ENVELOPE_HEADER_SIZE: usize = 12;

impl EnvelopeHeader {
    pub fn new(sig_len: u32, pub_key_len: u32, fw_len: u32) -> Self {
        Self {
            sig_len: U32Le::new(sig_len),
            pub_key_len: U32Le::new(pub_key_len),
            fw_len: U32Le::new(fw_len),
        }
    }

    /// Total envelope length the header declares, header included.
    ///
    /// Computed in u64 so three u32 lengths can never wrap.
    pub fn declared_len(&self) -> u64 {
        ENVELOPE_HEADER_SIZE as u64
            + u64::from(self.sig_len.get())
            + u64::from(self.pub_key_len.get())
            + u64::from(self.fw_len.get())
    }
}

// ── Relay Frame Header ───────────────────────────────────────────────────────

/// Header of one datagram exchanged with the message relay.
///
/// A DATA frame carries one fragment of a published message: the topic it
/// was published on, the total message length and the fragment's offset.
/// The topic bytes (`topic_len`) follow the header, the fragment bytes take
/// the rest of the datagram.
///
/// Wire size: 12 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct RelayFrameHeader {
    /// Low nibble: [`FrameKind`]. Bit 6: first fragment of a message.
    /// Bit 7: last fragment of a message. Bits 4-5 reserved, must be zero.
    pub kind: u8,
    /// Delivery guarantee the message was published with.
    pub qos: u8,
    /// Length of the UTF-8 topic that follows the header.
    pub topic_len: U16Le,
    /// Length of the whole logical message.
    pub total_len: U32Le,
    /// Where this fragment lands inside the message.
    pub offset: U32Le,
}

assert_eq_size!(RelayFrameHeader, [u8; 12]);

/// Size of [`RelayFrameHeader`] on the wire.
pub const RELAY_HEADER_SIZE: usize = 12;

/// Flag bit: this fragment starts a new message.
pub const FLAG_NEW_MESSAGE: u8 = 0x40;

/// Flag bit: this fragment completes its message.
pub const FLAG_LAST_FRAGMENT: u8 = 0x80;

const KIND_MASK: u8 = 0x0f;
const RESERVED_MASK: u8 = 0x30;

/// Largest datagram the relay adapter sends or accepts.
pub const MAX_DATAGRAM: usize = 65_507;

/// Relay frame kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// A fragment of a published message.
    Data = 0x01,
    /// Register interest in a topic at the given QoS.
    Subscribe = 0x02,
    /// Keep-alive.
    Ping = 0x03,
    /// Session end.
    Disconnect = 0x04,
}

impl TryFrom<u8> for FrameKind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(FrameKind::Data),
            0x02 => Ok(FrameKind::Subscribe),
            0x03 => Ok(FrameKind::Ping),
            0x04 => Ok(FrameKind::Disconnect),
            other => Err(WireError::UnknownFrameKind(other)),
        }
    }
}

// ── QoS ──────────────────────────────────────────────────────────────────────

/// Delivery guarantee requested for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Qos {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    #[default]
    ExactlyOnce = 2,
}

impl TryFrom<u8> for Qos {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Qos::AtMostOnce),
            1 => Ok(Qos::AtLeastOnce),
            2 => Ok(Qos::ExactlyOnce),
            other => Err(WireError::UnknownQos(other)),
        }
    }
}

impl From<Qos> for u8 {
    fn from(q: Qos) -> u8 {
        q as u8
    }
}

// ── Relay Frame ──────────────────────────────────────────────────────────────

/// A decoded relay frame borrowing from the datagram it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayFrame<'a> {
    pub kind: FrameKind,
    pub new_message: bool,
    pub last_fragment: bool,
    pub qos: Qos,
    pub topic: &'a str,
    pub total_len: u32,
    pub offset: u32,
    pub payload: &'a [u8],
}

impl<'a> RelayFrame<'a> {
    /// A frame with no topic and no payload (PING, DISCONNECT).
    pub fn control(kind: FrameKind) -> Self {
        Self {
            kind,
            new_message: false,
            last_fragment: false,
            qos: Qos::AtMostOnce,
            topic: "",
            total_len: 0,
            offset: 0,
            payload: &[],
        }
    }

    /// A SUBSCRIBE frame for `topic`.
    pub fn subscribe(topic: &'a str, qos: Qos) -> Self {
        Self {
            topic,
            qos,
            ..Self::control(FrameKind::Subscribe)
        }
    }

    /// Decode a datagram. Every length is checked against the datagram
    /// before any slice is taken.
    pub fn decode(datagram: &'a [u8]) -> Result<Self, WireError> {
        let header = RelayFrameHeader::read_from_prefix(datagram)
            .ok_or(WireError::TruncatedFrame(datagram.len()))?;

        if header.kind & RESERVED_MASK != 0 {
            return Err(WireError::ReservedFlagsSet(header.kind));
        }
        let kind = FrameKind::try_from(header.kind & KIND_MASK)?;
        let qos = Qos::try_from(header.qos)?;

        let topic_len = usize::from(header.topic_len.get());
        let body = &datagram[RELAY_HEADER_SIZE..];
        if topic_len > body.len() {
            return Err(WireError::TopicOverrun {
                topic_len,
                available: body.len(),
            });
        }
        let (topic, payload) = body.split_at(topic_len);
        let topic = std::str::from_utf8(topic).map_err(|_| WireError::TopicNotUtf8)?;

        Ok(Self {
            kind,
            new_message: header.kind & FLAG_NEW_MESSAGE != 0,
            last_fragment: header.kind & FLAG_LAST_FRAGMENT != 0,
            qos,
            topic,
            total_len: header.total_len.get(),
            offset: header.offset.get(),
            payload,
        })
    }

    /// Encode into a fresh datagram.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let topic_len =
            u16::try_from(self.topic.len()).map_err(|_| WireError::TopicTooLong(self.topic.len()))?;
        let len = RELAY_HEADER_SIZE + self.topic.len() + self.payload.len();
        if len > MAX_DATAGRAM {
            return Err(WireError::DatagramTooLarge(len));
        }

        let mut kind = self.kind as u8;
        if self.new_message {
            kind |= FLAG_NEW_MESSAGE;
        }
        if self.last_fragment {
            kind |= FLAG_LAST_FRAGMENT;
        }
        let header = RelayFrameHeader {
            kind,
            qos: self.qos.into(),
            topic_len: U16Le::new(topic_len),
            total_len: U32Le::new(self.total_len),
            offset: U32Le::new(self.offset),
        };

        let mut out = Vec::with_capacity(len);
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(self.topic.as_bytes());
        out.extend_from_slice(self.payload);
        Ok(out)
    }
}

/// Split `message` into encoded DATA frames carrying at most `fragment_size`
/// bytes each. The first frame starts the message, the last completes it.
pub fn fragment_frames(
    message: &[u8],
    topic: &str,
    qos: Qos,
    fragment_size: usize,
) -> Result<Vec<Vec<u8>>, WireError> {
    if fragment_size == 0 {
        return Err(WireError::ZeroFragmentSize);
    }
    let room = MAX_DATAGRAM.saturating_sub(RELAY_HEADER_SIZE + topic.len());
    if fragment_size > room {
        return Err(WireError::FragmentTooLarge {
            size: fragment_size,
            room,
        });
    }
    let total_len =
        u32::try_from(message.len()).map_err(|_| WireError::MessageTooLarge(message.len()))?;

    let count = message.len().div_ceil(fragment_size).max(1);
    let mut frames = Vec::with_capacity(count);
    for i in 0..count {
        let offset = i * fragment_size;
        let end = (offset + fragment_size).min(message.len());
        let frame = RelayFrame {
            kind: FrameKind::Data,
            new_message: i == 0,
            last_fragment: i + 1 == count,
            qos,
            topic,
            total_len,
            offset: offset as u32,
            payload: &message[offset..end],
        };
        frames.push(frame.encode()?);
    }
    Ok(frames)
}

// ── Constants ────────────────────────────────────────────────────────────────

/// Default topic firmware images are published on.
pub const DEFAULT_FIRMWARE_TOPIC: &str = "firmwire/example/firmware";

// ── Errors ───────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting relay frames.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unknown QoS level: {0}")]
    UnknownQos(u8),

    #[error("unknown frame kind: 0x{0:02x}")]
    UnknownFrameKind(u8),

    #[error("reserved frame flags are non-zero: 0x{0:02x}")]
    ReservedFlagsSet(u8),

    #[error("datagram of {0} bytes is shorter than the relay header")]
    TruncatedFrame(usize),

    #[error("topic length {topic_len} exceeds the {available} bytes after the header")]
    TopicOverrun { topic_len: usize, available: usize },

    #[error("topic is not valid UTF-8")]
    TopicNotUtf8,

    #[error("topic of {0} bytes does not fit a u16 length")]
    TopicTooLong(usize),

    #[error("datagram of {0} bytes exceeds maximum {}", MAX_DATAGRAM)]
    DatagramTooLarge(usize),

    #[error("fragment size must be at least 1 byte")]
    ZeroFragmentSize,

    #[error("fragment size {size} leaves no room in a datagram (max {room})")]
    FragmentTooLarge { size: usize, room: usize },

    #[error("message of {0} bytes does not fit a u32 length")]
    MessageTooLarge(usize),
}

// ── Tests ────────────────────────────────────────────────────────────────────
