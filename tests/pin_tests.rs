//! Unit tests for keypad PIN assembly.

use access_node::pin::{PinAssembler, PIN_IDLE_TIMEOUT_MS};
use access_node::wiegand::Key;

fn type_digits(pins: &mut PinAssembler, door: u8, digits: &str, start_ms: u64) -> u64 {
    let mut t = start_ms;
    for ch in digits.chars() {
        let d = ch.to_digit(10).unwrap() as u8;
        assert!(pins.key(door, Key::Digit(d), t).is_none());
        t += 500;
    }
    t
}

// ============================================================================
// Submission
// ============================================================================

#[test]
fn four_digit_pin_submits() {
    let mut pins = PinAssembler::new();
    let t = type_digits(&mut pins, 1, "1234", 0);
    let submit = pins.key(1, Key::Hash, t).expect("submit");
    assert_eq!(submit.door, 1);
    assert_eq!(submit.pin.as_str(), "1234");
    assert!(pins.is_empty());
}

#[test]
fn eight_digit_pin_submits() {
    let mut pins = PinAssembler::new();
    let t = type_digits(&mut pins, 2, "87654321", 0);
    let submit = pins.key(2, Key::Hash, t).expect("submit");
    assert_eq!(submit.pin.as_str(), "87654321");
}

#[test]
fn short_pin_is_rejected_and_cleared() {
    let mut pins = PinAssembler::new();
    let t = type_digits(&mut pins, 1, "123", 0);
    assert!(pins.key(1, Key::Hash, t).is_none());
    assert!(pins.is_empty());
}

#[test]
fn hash_on_empty_buffer_is_rejected() {
    let mut pins = PinAssembler::new();
    assert!(pins.key(1, Key::Hash, 0).is_none());
}

// ============================================================================
// Door ownership
// ============================================================================

#[test]
fn typing_on_other_door_restarts_entry() {
    let mut pins = PinAssembler::new();
    type_digits(&mut pins, 1, "99", 0);
    // Door 2 takes over; door 1's partial entry is gone.
    let t = type_digits(&mut pins, 2, "4321", 5_000);
    let submit = pins.key(2, Key::Hash, t).expect("submit");
    assert_eq!(submit.door, 2);
    assert_eq!(submit.pin.as_str(), "4321");
}

#[test]
fn hash_from_wrong_door_clears_without_submitting() {
    let mut pins = PinAssembler::new();
    let t = type_digits(&mut pins, 1, "1234", 0);
    assert!(pins.key(2, Key::Hash, t).is_none());
    assert!(pins.is_empty());
    // The entry is unusable afterwards even from the right door.
    assert!(pins.key(1, Key::Hash, t + 100).is_none());
}

// ============================================================================
// Clearing
// ============================================================================

#[test]
fn star_discards_entry() {
    let mut pins = PinAssembler::new();
    let t = type_digits(&mut pins, 1, "1234", 0);
    assert!(pins.key(1, Key::Star, t).is_none());
    assert!(pins.is_empty());
    assert!(pins.key(1, Key::Hash, t + 100).is_none());
}

#[test]
fn ninth_digit_clears_entry() {
    let mut pins = PinAssembler::new();
    let t = type_digits(&mut pins, 1, "12345678", 0);
    assert_eq!(pins.len(), 8);
    assert!(pins.key(1, Key::Digit(9), t).is_none());
    assert!(pins.is_empty());
    assert!(pins.key(1, Key::Hash, t + 100).is_none());
}

// ============================================================================
// Idle timeout
// ============================================================================

#[test]
fn idle_timeout_discards_entry() {
    let mut pins = PinAssembler::new();
    let t = type_digits(&mut pins, 1, "1234", 0);
    pins.poll_idle(t + PIN_IDLE_TIMEOUT_MS);
    assert!(pins.is_empty());
}

#[test]
fn active_entry_survives_poll() {
    let mut pins = PinAssembler::new();
    let t = type_digits(&mut pins, 1, "1234", 0);
    pins.poll_idle(t + PIN_IDLE_TIMEOUT_MS - 5_000);
    let submit = pins.key(1, Key::Hash, t + PIN_IDLE_TIMEOUT_MS - 4_000);
    assert!(submit.is_some());
}

#[test]
fn timeout_counts_from_last_digit() {
    let mut pins = PinAssembler::new();
    type_digits(&mut pins, 1, "12", 0);
    // Another digit much later resets the countdown.
    assert!(pins.key(1, Key::Digit(3), 25_000).is_none());
    pins.poll_idle(25_000 + PIN_IDLE_TIMEOUT_MS - 1);
    assert_eq!(pins.len(), 3);
    pins.poll_idle(25_000 + PIN_IDLE_TIMEOUT_MS);
    assert!(pins.is_empty());
}
