//! End-to-end transfer scenarios.

use std::path::PathBuf;

use firmwire_core::crypto::{self, VerificationError, PUBLIC_KEY_LEN, SIGNATURE_LEN};
use firmwire_core::envelope::EnvelopeError;
use firmwire_core::wire::ENVELOPE_HEADER_SIZE;
use firmwire_services::{
    AllocationFailure, AssemblyError, Delivery, Ignored, Outcome, Phase, TransferError,
};

use crate::*;

const FIRMWARE: &[u8; 10] = b"FW-0000001";

/// 10 bytes of firmware, 64-byte signature, 65-byte key, two fragments.
#[test]
fn test_two_fragment_transfer_is_saved() {
    let message = sealed(FIRMWARE);
    assert_eq!(message.len(), ENVELOPE_HEADER_SIZE + SIGNATURE_LEN + PUBLIC_KEY_LEN + 10);
    assert_eq!(message.len(), 151);

    let mut c = controller();
    let fragments = split(&message, &[70, 81]);
    assert_eq!(fragments[1].offset, 70);

    let first = c.handle(&fragments[0]);
    assert!(matches!(
        first,
        Outcome::Receiving {
            bytes_written: 70,
            total_len: 151
        }
    ));
    assert_eq!(c.phase(), Phase::Receiving);

    match c.handle(&fragments[1]) {
        Outcome::Accepted {
            firmware_len,
            digest,
        } => {
            assert_eq!(firmware_len, 10);
            assert_eq!(digest, crypto::sha256(FIRMWARE));
        }
        other => panic!("expected Accepted, got {other:?}"),
    }

    assert_eq!(c.phase(), Phase::Idle);
    let saved = c.sink().saved();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].0, PathBuf::from(SAVE_AS));
    assert_eq!(saved[0].1, FIRMWARE);
}

/// Same transfer with the firmware length field raised to 11.
#[test]
fn test_tampered_length_is_size_mismatch() {
    let mut message = sealed(FIRMWARE);
    message[8..12].copy_from_slice(&11u32.to_le_bytes());

    let mut c = controller();
    let fragments = split(&message, &[70, 81]);
    c.handle(&fragments[0]);

    match c.handle(&fragments[1]) {
        Outcome::Rejected(TransferError::Envelope(e)) => assert_eq!(
            e,
            EnvelopeError::SizeMismatch {
                expected: 152,
                actual: 151
            }
        ),
        other => panic!("expected SizeMismatch, got {other:?}"),
    }
    assert_eq!(c.phase(), Phase::Idle);
    assert!(c.sink().saved().is_empty());
}

/// Same transfer with one signature bit flipped.
#[test]
fn test_flipped_signature_bit_is_rejected() {
    let mut message = sealed(FIRMWARE);
    message[ENVELOPE_HEADER_SIZE + 40] ^= 0x10;

    let mut c = controller();
    let fragments = split(&message, &[70, 81]);
    c.handle(&fragments[0]);

    assert!(matches!(
        c.handle(&fragments[1]),
        Outcome::Rejected(TransferError::Verification(
            VerificationError::VerificationFailed
        ))
    ));
    assert_eq!(c.phase(), Phase::Idle);
    assert!(c.sink().saved().is_empty());
}

/// A second message starting mid-transfer must not disturb the first.
#[test]
fn test_second_first_fragment_is_ignored() {
    let message = sealed(FIRMWARE);
    let intruder = sealed(b"some other firmware image");

    let mut c = controller();
    let fragments = split(&message, &[70, 81]);
    c.handle(&fragments[0]);

    let intruding = split(&intruder, &[intruder.len()]);
    assert!(matches!(
        c.handle(&intruding[0]),
        Outcome::Ignored(Ignored::TransferActive { active_len: 151 })
    ));
    assert_eq!(c.phase(), Phase::Receiving);

    assert!(c.handle(&fragments[1]).is_accepted());
    assert_eq!(c.sink().saved().len(), 1);
    assert_eq!(c.sink().saved()[0].1, FIRMWARE);
}

/// A message declaring zero length never gets a buffer.
#[test]
fn test_zero_length_message_is_allocation_error() {
    let mut c = controller();
    let empty = Delivery {
        topic: TOPIC,
        new_message: true,
        last_fragment: true,
        total_len: 0,
        offset: 0,
        payload: &[],
        qos: firmwire_core::Qos::ExactlyOnce,
    };

    match c.handle(&empty) {
        Outcome::Rejected(e) => {
            assert!(e.is_systemic());
            assert!(matches!(
                e,
                TransferError::Assembly(AssemblyError::Allocation {
                    requested: 0,
                    cause: AllocationFailure::ZeroLength
                })
            ));
        }
        other => panic!("expected AllocationError, got {other:?}"),
    }
    assert_eq!(c.phase(), Phase::Idle);
    assert!(c.sink().saved().is_empty());

    // the controller is ready for the next message straight away
    let message = sealed(FIRMWARE);
    let fragments = split(&message, &[151]);
    assert!(c.handle(&fragments[0]).is_accepted());
}

/// A rejected transfer is followed by a clean, accepted one.
#[test]
fn test_rejection_then_acceptance() {
    let mut bad = sealed(FIRMWARE);
    bad[ENVELOPE_HEADER_SIZE + SIGNATURE_LEN + PUBLIC_KEY_LEN] ^= 0xff;
    let good = sealed(b"second try");

    let mut c = controller();
    for d in split(&bad, &[50, 50, 51]) {
        c.handle(&d);
    }
    assert!(c.sink().saved().is_empty());

    let mut last = None;
    for d in split(&good, &[12, 64, 65, 10]) {
        last = Some(c.handle(&d));
    }
    assert!(last.is_some_and(|o| o.is_accepted()));
    assert_eq!(c.sink().saved()[0].1, b"second try");
}
