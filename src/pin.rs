//! Keypad PIN assembly.
//!
//! One shared buffer serves both doors; whichever keypad last produced a
//! digit owns it. `#` submits, `*` clears, and a half-finished entry is
//! discarded after the idle timeout.

use crate::wiegand::Key;
use heapless::String as HString;

pub const MIN_PIN_LEN: usize = 4;
pub const MAX_PIN_LEN: usize = 8;
pub const PIN_IDLE_TIMEOUT_MS: u64 = 30_000;

/// How often the idle timeout needs polling. Finer polling buys nothing.
pub const PIN_IDLE_POLL_MS: u64 = 5_000;

/// A completed PIN entry ready for the decision engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinSubmit {
    pub door: u8,
    pub pin: HString<MAX_PIN_LEN>,
}

pub struct PinAssembler {
    buf: HString<MAX_PIN_LEN>,
    current_door: Option<u8>,
    last_digit_ms: u64,
}

impl PinAssembler {
    pub const fn new() -> Self {
        Self {
            buf: HString::new(),
            current_door: None,
            last_digit_ms: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Feed one keypad key from `door`. Returns a submission on `#` when
    /// the buffer holds a valid-length PIN entered at that door.
    pub fn key(&mut self, door: u8, key: Key, now_ms: u64) -> Option<PinSubmit> {
        match key {
            Key::Digit(d) => {
                self.digit(door, d, now_ms);
                None
            }
            Key::Hash => self.submit(door),
            Key::Star => {
                self.clear();
                None
            }
        }
    }

    fn digit(&mut self, door: u8, digit: u8, now_ms: u64) {
        if self.current_door != Some(door) {
            // Typing started on the other keypad; whatever was pending there
            // is abandoned.
            self.buf.clear();
            self.current_door = Some(door);
        }
        if self.buf.push((b'0' + digit) as char).is_err() {
            log::info!("pin: entry exceeded {} digits, cleared", MAX_PIN_LEN);
            self.clear();
            return;
        }
        self.last_digit_ms = now_ms;
    }

    fn submit(&mut self, door: u8) -> Option<PinSubmit> {
        if self.current_door != Some(door) {
            log::info!("pin: submit on door {} but entry belongs elsewhere", door);
            self.clear();
            return None;
        }
        if self.buf.len() < MIN_PIN_LEN {
            log::info!("pin: submit rejected, {} digits is too short", self.buf.len());
            self.clear();
            return None;
        }
        let pin = self.buf.clone();
        self.clear();
        Some(PinSubmit { door, pin })
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.current_door = None;
    }

    /// Discard a stale entry. Call on a coarse tick (`PIN_IDLE_POLL_MS`).
    pub fn poll_idle(&mut self, now_ms: u64) {
        if !self.buf.is_empty() && now_ms.saturating_sub(self.last_digit_ms) >= PIN_IDLE_TIMEOUT_MS {
            log::info!("pin: entry timed out, cleared");
            self.clear();
        }
    }
}

impl Default for PinAssembler {
    fn default() -> Self {
        Self::new()
    }
}
