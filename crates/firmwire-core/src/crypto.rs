//! Cryptographic primitives for Firmwire.
//!
//! Provides two things:
//!   1. The verification gate: import a public key, check an ECDSA
//!      signature over firmware bytes
//!   2. The publisher side: a signing keypair that produces complete
//!      signed envelopes
//!
//! The algorithm pair is pinned: ECDSA over secp256k1 with a SHA-256
//! message digest. Nothing in a received envelope selects or negotiates an
//! algorithm. Public keys are SEC1 uncompressed points (65 bytes, 0x04
//! prefix); signatures are fixed-width `r || s` (64 bytes).
//!
//! This is not wire-compatible with wolfSSL-based firmware publishers,
//! which sign with NIST P-256 and emit DER-encoded signatures. Their
//! public keys fail import here with [`KeyImportReason::NotOnCurve`] and
//! their 70-72 byte signatures are never accepted.
//! Envelopes must be produced by [`FirmwareSigner`] or an equivalent
//! secp256k1 signer.
//!
//! There is no unsafe code in this module.

use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::envelope::{Envelope, EnvelopeError};

/// Length of an imported public key (SEC1 uncompressed point).
pub const PUBLIC_KEY_LEN: usize = 65;

/// Leading byte of a SEC1 uncompressed point.
const UNCOMPRESSED_TAG: u8 = 0x04;

/// Length of a fixed-width `r || s` signature.
pub const SIGNATURE_LEN: usize = 64;

/// Length of a secret scalar.
pub const SECRET_KEY_LEN: usize = 32;

// ── SHA-256 ──────────────────────────────────────────────────────────────────

/// SHA-256 digest of `data`. The same digest the signature scheme signs.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

// ── Verification ─────────────────────────────────────────────────────────────

/// A public key imported from envelope bytes.
#[derive(Debug, Clone)]
pub struct FirmwareKey(VerifyingKey);

impl FirmwareKey {
    /// Import a SEC1 uncompressed public key.
    ///
    /// Anything that is not exactly 65 bytes starting with 0x04 and naming a
    /// point on the curve is rejected before any signature math runs.
    pub fn import(bytes: &[u8]) -> Result<Self, VerificationError> {
        if bytes.len() != PUBLIC_KEY_LEN {
            return Err(VerificationError::KeyImport {
                reason: KeyImportReason::Length(bytes.len()),
            });
        }
        if bytes[0] != UNCOMPRESSED_TAG {
            return Err(VerificationError::KeyImport {
                reason: KeyImportReason::Encoding(bytes[0]),
            });
        }
        VerifyingKey::from_sec1_bytes(bytes)
            .map(Self)
            .map_err(|_| VerificationError::KeyImport {
                reason: KeyImportReason::NotOnCurve,
            })
    }

    /// Check `signature` over `firmware`.
    ///
    /// A malformed signature encoding, a high-S signature and a signature
    /// that simply does not match all come back as `VerificationFailed`.
    pub fn verify(&self, signature: &[u8], firmware: &[u8]) -> Result<(), VerificationError> {
        let sig =
            Signature::from_slice(signature).map_err(|_| VerificationError::VerificationFailed)?;
        self.0
            .verify(firmware, &sig)
            .map_err(|_| VerificationError::VerificationFailed)
    }

    /// SEC1 uncompressed encoding of this key.
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        let point = self.0.to_encoded_point(false);
        let mut out = [0u8; PUBLIC_KEY_LEN];
        out.copy_from_slice(point.as_bytes());
        out
    }
}

/// The verification gate: import `public_key`, then check `signature` over
/// `firmware`.
///
/// Borrows all three inputs for the duration of the call only.
pub fn verify(
    public_key: &[u8],
    signature: &[u8],
    firmware: &[u8],
) -> Result<(), VerificationError> {
    FirmwareKey::import(public_key)?.verify(signature, firmware)
}

/// Why a public key was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyImportReason {
    /// Not 65 bytes long.
    Length(usize),
    /// Leading byte is not the uncompressed-point tag.
    Encoding(u8),
    /// Coordinates do not name a point on secp256k1.
    NotOnCurve,
}

impl std::fmt::Display for KeyImportReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Length(len) => write!(f, "expected {PUBLIC_KEY_LEN} bytes, got {len}"),
            Self::Encoding(tag) => write!(f, "expected uncompressed tag 0x04, got 0x{tag:02x}"),
            Self::NotOnCurve => write!(f, "point is not on secp256k1"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error("public key import failed: {reason}")]
    KeyImport { reason: KeyImportReason },

    #[error("firmware signature verification failed")]
    VerificationFailed,
}

// ── Signing ──────────────────────────────────────────────────────────────────

/// A publisher's signing keypair.
///
/// Signatures are deterministic (RFC 6979) and low-S normalised. The secret
/// scalar is zeroized when the key is dropped.
pub struct FirmwareSigner {
    signing_key: SigningKey,
}

impl FirmwareSigner {
    /// Generate a random keypair.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut rand::thread_rng()),
        }
    }

    /// Reconstruct a keypair from stored secret bytes.
    pub fn from_secret(bytes: &[u8]) -> Result<Self, SignerError> {
        if bytes.len() != SECRET_KEY_LEN {
            return Err(SignerError::SecretLength(bytes.len()));
        }
        SigningKey::from_slice(bytes)
            .map(|signing_key| Self { signing_key })
            .map_err(|_| SignerError::InvalidSecret)
    }

    /// Secret scalar for persistent storage. Store with mode 0600.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; SECRET_KEY_LEN]> {
        Zeroizing::new(self.signing_key.to_bytes().into())
    }

    /// The public half, as it is embedded in envelopes.
    pub fn public_key(&self) -> FirmwareKey {
        FirmwareKey(self.signing_key.verifying_key().clone())
    }

    /// Sign `firmware`, returning the 64-byte `r || s` signature.
    pub fn sign(&self, firmware: &[u8]) -> [u8; SIGNATURE_LEN] {
        let sig: Signature = self.signing_key.sign(firmware);
        let mut out = [0u8; SIGNATURE_LEN];
        out.copy_from_slice(&sig.to_bytes());
        out
    }

    /// Sign `firmware` and pack signature, public key and firmware into a
    /// complete envelope.
    pub fn seal(&self, firmware: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
        let signature = self.sign(firmware);
        let public_key = self.public_key().to_bytes();
        Envelope::encode(&signature, &public_key, firmware)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignerError {
    #[error("secret key must be {} bytes, got {0}", SECRET_KEY_LEN)]
    SecretLength(usize),

    #[error("secret key is not a valid secp256k1 scalar")]
    InvalidSecret,
}

// ── Tests ────────────────────────────────────────────────────────────────────
