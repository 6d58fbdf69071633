//! Reassembly, bounds and size gates across many fragment layouts.

use firmwire_core::envelope::{Envelope, EnvelopeError};
use firmwire_core::wire::ENVELOPE_HEADER_SIZE;
use firmwire_services::{AssemblyError, Fragment, Outcome, Phase, Transfer, TransferError};

use crate::*;

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Every delivery order of the leading fragments rebuilds the same bytes,
/// as long as the fragment holding the final byte comes last.
#[test]
fn test_any_order_rebuilds_original() {
    let original = pattern(1000);
    let cuts = [(0usize, 130usize), (130, 300), (430, 1), (431, 400)];
    let tail = (831usize, 169usize);

    for order in permutations(&cuts) {
        let mut t = Transfer::begin(original.len() as u32, LIMIT).unwrap();
        for &(offset, len) in &order {
            t.write(&Fragment {
                first_of_message: offset == 0,
                last_of_message: false,
                offset: offset as u32,
                payload: &original[offset..offset + len],
            })
            .unwrap();
            assert!(!t.is_complete());
        }
        t.write(&Fragment {
            first_of_message: false,
            last_of_message: true,
            offset: tail.0 as u32,
            payload: &original[tail.0..tail.0 + tail.1],
        })
        .unwrap();

        assert!(t.is_complete());
        assert_eq!(t.into_buffer(), original, "order {order:?}");
    }
}

/// The same property through the controller, with a real envelope.
#[test]
fn test_any_order_through_controller_is_accepted() {
    let firmware = pattern(300);
    let message = sealed(&firmware);
    let n = message.len();
    let cuts = [(0usize, 100usize), (100, 100), (200, 100)];
    let tail = (300usize, n - 300);

    for order in permutations(&cuts) {
        let mut c = controller();
        for (i, &(offset, len)) in order.iter().enumerate() {
            let outcome = c.handle(&fragment(&message, offset, len, i == 0, false));
            assert!(matches!(outcome, Outcome::Receiving { .. }), "order {order:?}");
        }
        let outcome = c.handle(&fragment(&message, tail.0, tail.1, false, true));
        assert!(outcome.is_accepted(), "order {order:?}: {outcome:?}");
        assert_eq!(c.sink().saved()[0].1, firmware);
    }
}

/// Fragment sizes from one byte up to the whole message.
#[test]
fn test_uniform_fragment_sizes_are_accepted() {
    let firmware = pattern(77);
    let message = sealed(&firmware);

    for size in [1, 2, 7, 12, 64, 65, 100, message.len()] {
        let mut sizes = vec![size; message.len() / size];
        if message.len() % size != 0 {
            sizes.push(message.len() % size);
        }

        let mut c = controller();
        let mut last = None;
        for d in split(&message, &sizes) {
            last = Some(c.handle(&d));
        }
        assert!(
            last.is_some_and(|o| o.is_accepted()),
            "fragment size {size} was not accepted"
        );
    }
}

/// No fragment that ends past the buffer is ever written.
#[test]
fn test_bounds_gate_never_writes_past_end() {
    let total = 64u32;
    let probes: [(u32, usize); 6] = [
        (0, 65),
        (63, 2),
        (64, 1),
        (100, 0),
        (u32::MAX, 1),
        (u32::MAX - 3, 8),
    ];
    let payload = vec![0xeeu8; 128];

    for (offset, len) in probes {
        let mut t = Transfer::begin(total, LIMIT).unwrap();
        let err = t
            .write(&Fragment {
                first_of_message: true,
                last_of_message: true,
                offset,
                payload: &payload[..len],
            })
            .unwrap_err();
        assert_eq!(
            err,
            AssemblyError::Bounds {
                offset,
                len,
                total_len: total
            }
        );
        assert!(!t.is_complete());
        assert!(t.into_buffer().iter().all(|&b| b == 0));
    }
}

/// Any header whose lengths disagree with the buffer fails the size gate.
#[test]
fn test_size_gate_rejects_every_wrong_length() {
    let message = sealed(b"0123456789");
    let header = |m: &[u8], at: usize| u32::from_le_bytes([m[at], m[at + 1], m[at + 2], m[at + 3]]);

    for field in [0usize, 4, 8] {
        let original = header(&message, field);
        for delta in [-2i64, -1, 1, 2, 1 << 20] {
            let value = (i64::from(original) + delta).max(0) as u32;
            if value == original {
                continue;
            }
            let mut tampered = message.clone();
            tampered[field..field + 4].copy_from_slice(&value.to_le_bytes());
            assert!(
                matches!(
                    Envelope::parse(&tampered),
                    Err(EnvelopeError::SizeMismatch { actual: 151, .. })
                ),
                "field at {field} set to {value}"
            );
        }
    }

    // truncating or extending the buffer fails too
    assert!(matches!(
        Envelope::parse(&message[..150]),
        Err(EnvelopeError::SizeMismatch { .. })
    ));
    assert!(matches!(
        Envelope::parse(&message[..ENVELOPE_HEADER_SIZE - 1]),
        Err(EnvelopeError::TruncatedHeader { .. })
    ));
}

/// An out-of-bounds fragment kills the transfer; nothing is saved.
#[test]
fn test_overrun_mid_transfer_discards_everything() {
    let message = sealed(b"overrun");
    let mut c = controller();
    c.handle(&fragment(&message, 0, 40, true, false));

    let rogue = Delivery {
        offset: message.len() as u32 - 5,
        payload: &message[..10],
        ..fragment(&message, 0, 0, false, false)
    };
    assert!(matches!(
        c.handle(&rogue),
        Outcome::Rejected(TransferError::Assembly(AssemblyError::Bounds { .. }))
    ));
    assert_eq!(c.phase(), Phase::Idle);

    let rest = message.len() - 40;
    c.handle(&fragment(&message, 40, rest, false, true));
    assert!(c.sink().saved().is_empty());
}

/// Overlapping fragments are not rejected by the assembler; the signature
/// gate catches the corruption they cause.
#[test]
fn test_overlap_is_caught_by_verification() {
    let message = sealed(b"overlapping firmware");
    let mut c = controller();
    let n = message.len();

    c.handle(&fragment(&message, 0, n - 10, true, false));
    // rewrite part of the signature with firmware bytes
    let stray = Delivery {
        offset: (ENVELOPE_HEADER_SIZE + 4) as u32,
        payload: &message[n - 10..],
        ..fragment(&message, 0, 0, false, false)
    };
    c.handle(&stray);
    let outcome = c.handle(&fragment(&message, n - 10, 10, false, true));
    assert!(matches!(outcome, Outcome::Rejected(TransferError::Verification(_))));
    assert!(c.sink().saved().is_empty());
}
