//! firmwire-core: wire format, envelope codec, signature verification and
//! configuration. All other Firmwire crates depend on this one.

pub mod config;
pub mod crypto;
pub mod envelope;
pub mod wire;

pub use envelope::{Envelope, EnvelopeError};
pub use wire::Qos;
