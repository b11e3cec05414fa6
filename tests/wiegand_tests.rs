//! Unit tests for Wiegand frame assembly and classification.

use access_node::wiegand::{Frame, FrameAssembler, Key, RawFrame, INTER_BIT_TIMEOUT_MS};

/// Feed the bits of `value` (MSB first) into the assembler, one edge per ms.
fn feed_bits(assembler: &mut FrameAssembler, value: u64, count: u32, start_ms: u64) -> u64 {
    let mut t = start_ms;
    for i in (0..count).rev() {
        let bit = ((value >> i) & 1) as u8;
        assembler.record_edge(bit, t);
        t += 1;
    }
    t - 1
}

/// Assemble a 26-bit frame for the given facility and card number.
/// Layout: leading parity, 8 facility bits, 16 card bits, trailing parity.
fn card_frame(facility: u32, card: u32) -> u64 {
    let data = ((facility & 0xFF) << 16) | (card & 0xFFFF);
    let upper = data >> 12;
    let lower = data & 0xFFF;
    let even_parity = (upper.count_ones() % 2) as u64;
    let odd_parity = if lower.count_ones() % 2 == 0 { 1u64 } else { 0 };
    (even_parity << 25) | ((data as u64) << 1) | odd_parity
}

// ============================================================================
// Frame completion
// ============================================================================

#[test]
fn no_frame_while_bits_still_arriving() {
    let mut asm = FrameAssembler::new();
    let last = feed_bits(&mut asm, 0b101, 3, 1000);
    assert!(!asm.frame_complete(last + INTER_BIT_TIMEOUT_MS));
    assert!(asm.take_frame(last + INTER_BIT_TIMEOUT_MS).is_none());
}

#[test]
fn frame_completes_after_inter_bit_silence() {
    let mut asm = FrameAssembler::new();
    let last = feed_bits(&mut asm, 0b101, 3, 1000);
    let now = last + INTER_BIT_TIMEOUT_MS + 1;
    assert!(asm.frame_complete(now));
    let frame = asm.take_frame(now).expect("frame should be complete");
    assert_eq!(frame.bits, 0b101);
    assert_eq!(frame.count, 3);
}

#[test]
fn empty_accumulator_never_completes() {
    let asm = FrameAssembler::new();
    assert!(!asm.frame_complete(1_000_000));
}

#[test]
fn take_frame_resets_accumulator() {
    let mut asm = FrameAssembler::new();
    let last = feed_bits(&mut asm, 0xF, 4, 0);
    let now = last + INTER_BIT_TIMEOUT_MS + 1;
    assert!(asm.take_frame(now).is_some());
    assert_eq!(asm.bit_count(), 0);
    assert!(asm.take_frame(now + 1000).is_none());

    // The next frame starts clean
    let last = feed_bits(&mut asm, 0b1, 1, now + 2000);
    let frame = asm.take_frame(last + INTER_BIT_TIMEOUT_MS + 1).unwrap();
    assert_eq!(frame.count, 1);
    assert_eq!(frame.bits, 1);
}

#[test]
fn runaway_noise_is_capped_and_discarded() {
    let mut asm = FrameAssembler::new();
    let mut t = 0;
    for _ in 0..100 {
        asm.record_edge(1, t);
        t += 1;
    }
    let frame = asm.take_frame(t + INTER_BIT_TIMEOUT_MS + 1).unwrap();
    assert_eq!(frame.count, 64);
    assert!(frame.classify().is_none());
}

// ============================================================================
// Card classification
// ============================================================================

#[test]
fn classify_26_bit_card() {
    // Facility 30, card 33993
    let raw = RawFrame {
        bits: card_frame(30, 33993),
        count: 26,
    };
    let frame = raw.classify().expect("26-bit frame is a card");
    assert_eq!(
        frame,
        Frame::Card {
            facility: 30,
            number: 33993
        }
    );
    assert_eq!(frame.card_string().unwrap(), "30 33993");
}

#[test]
fn classify_ignores_parity_bits() {
    // Deliberately corrupt both parity bits; the frame still decodes.
    let good = card_frame(100, 12345);
    let corrupted = good ^ (1 << 25) ^ 1;
    let raw = RawFrame {
        bits: corrupted,
        count: 26,
    };
    assert_eq!(
        raw.classify().unwrap(),
        Frame::Card {
            facility: 100,
            number: 12345
        }
    );
}

#[test]
fn classify_facility_zero() {
    let raw = RawFrame {
        bits: card_frame(0, 1),
        count: 26,
    };
    assert_eq!(
        raw.classify().unwrap().card_string().unwrap(),
        "0 1"
    );
}

#[test]
fn classify_max_facility_and_card() {
    let raw = RawFrame {
        bits: card_frame(255, 65535),
        count: 26,
    };
    assert_eq!(
        raw.classify().unwrap(),
        Frame::Card {
            facility: 255,
            number: 65535
        }
    );
}

// ============================================================================
// Keypad classification
// ============================================================================

#[test]
fn classify_4_bit_digits() {
    for digit in 0..=9u64 {
        let raw = RawFrame {
            bits: digit,
            count: 4,
        };
        assert_eq!(
            raw.classify().unwrap(),
            Frame::Key(Key::Digit(digit as u8)),
            "digit {}",
            digit
        );
    }
}

#[test]
fn classify_star_and_hash() {
    assert_eq!(
        RawFrame { bits: 10, count: 4 }.classify().unwrap(),
        Frame::Key(Key::Star)
    );
    assert_eq!(
        RawFrame { bits: 11, count: 4 }.classify().unwrap(),
        Frame::Key(Key::Hash)
    );
}

#[test]
fn classify_8_bit_key_uses_low_nibble() {
    // Complemented-nibble encoding: 0x95 carries the digit 5.
    let raw = RawFrame {
        bits: 0x95,
        count: 8,
    };
    assert_eq!(raw.classify().unwrap(), Frame::Key(Key::Digit(5)));
}

#[test]
fn classify_invalid_key_code() {
    let raw = RawFrame {
        bits: 0xE,
        count: 4,
    };
    assert!(raw.classify().is_none());
}

// ============================================================================
// Unknown bit counts
// ============================================================================

#[test]
fn classify_unknown_bit_counts_discards() {
    for count in [1, 3, 13, 25, 27, 34, 37] {
        let raw = RawFrame { bits: 0, count };
        assert!(raw.classify().is_none(), "{} bits should discard", count);
    }
}
