//! Wiegand frame reassembly and classification.
//!
//! Each falling edge on D0 shifts a zero bit into the accumulator, each
//! falling edge on D1 a one bit. A frame is complete once bits stop
//! arriving for the inter-bit timeout. The assembler itself is pure; the
//! firmware reader task feeds it edges and polls for completion.
//!
//! 26-bit frames are cards, 4- and 8-bit frames are keypad keys, anything
//! else is noise and gets discarded. The 26-bit parity bits are carried but
//! not checked: readers in the field disagree on parity conventions and the
//! credential database is the authority anyway.

use crate::credential::render_card;
use alloc::string::String;

/// Silence on both data lines that ends a frame.
pub const INTER_BIT_TIMEOUT_MS: u64 = 100;

const CARD_FRAME_BITS: u32 = 26;
const MAX_FRAME_BITS: u32 = 64;

/// A completed, unclassified bit frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFrame {
    pub bits: u64,
    pub count: u32,
}

/// Keypad key decoded from a short frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Digit(u8),
    Star,
    Hash,
}

/// A classified frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Card credential with its decoded fields.
    Card { facility: u32, number: u32 },
    Key(Key),
}

impl Frame {
    /// Card string for matching and logging.
    pub fn card_string(&self) -> Option<String> {
        match self {
            Frame::Card { facility, number } => Some(render_card(*facility, *number)),
            Frame::Key(_) => None,
        }
    }
}

/// Per-door bit accumulator.
///
/// Written by the edge source, drained by the control loop. The
/// read-and-reset in `take_frame` consumes the whole accumulator at once so
/// a frame can never be split across two reads.
pub struct FrameAssembler {
    bits: u64,
    count: u32,
    last_edge_ms: u64,
}

impl FrameAssembler {
    pub const fn new() -> Self {
        Self {
            bits: 0,
            count: 0,
            last_edge_ms: 0,
        }
    }

    /// Record one falling edge. `bit` is 0 for D0, 1 for D1.
    pub fn record_edge(&mut self, bit: u8, now_ms: u64) {
        if self.count >= MAX_FRAME_BITS {
            // Runaway line noise; keep the timestamp moving so the frame
            // still terminates, classification will discard it.
            self.last_edge_ms = now_ms;
            return;
        }
        self.bits = (self.bits << 1) | (bit & 1) as u64;
        self.count += 1;
        self.last_edge_ms = now_ms;
    }

    pub fn bit_count(&self) -> u32 {
        self.count
    }

    /// Whether the inter-bit timeout has elapsed on a non-empty accumulator.
    pub fn frame_complete(&self, now_ms: u64) -> bool {
        self.count > 0 && now_ms.saturating_sub(self.last_edge_ms) > INTER_BIT_TIMEOUT_MS
    }

    /// Take the completed frame and reset, or `None` if still receiving.
    pub fn take_frame(&mut self, now_ms: u64) -> Option<RawFrame> {
        if !self.frame_complete(now_ms) {
            return None;
        }
        let frame = RawFrame {
            bits: self.bits,
            count: self.count,
        };
        self.bits = 0;
        self.count = 0;
        Some(frame)
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl RawFrame {
    /// Classify by bit count. Unknown counts are logged and dropped.
    pub fn classify(&self) -> Option<Frame> {
        match self.count {
            CARD_FRAME_BITS => Some(decode_card(self.bits)),
            4 | 8 => decode_key(self.bits),
            n => {
                log::warn!("wiegand: unknown format ({} bits), frame discarded", n);
                None
            }
        }
    }
}

/// Decode a 26-bit card frame.
///
/// Layout: parity, 8 facility bits, 16 card bits, parity. The parity bits
/// are stripped, not validated.
fn decode_card(raw: u64) -> Frame {
    let data = ((raw >> 1) & 0xFF_FFFF) as u32;
    Frame::Card {
        facility: (data >> 16) & 0xFF,
        number: data & 0xFFFF,
    }
}

/// Decode a keypad frame. The key code sits in the low 4 bits for both the
/// 4-bit and the 8-bit (complemented-nibble) variants.
fn decode_key(raw: u64) -> Option<Frame> {
    let code = (raw & 0xF) as u8;
    let key = match code {
        0..=9 => Key::Digit(code),
        10 => Key::Star,
        11 => Key::Hash,
        _ => {
            log::warn!("wiegand: invalid key code {}", code);
            return None;
        }
    };
    Some(Frame::Key(key))
}
