//! Card number normalization and matching.
//!
//! Cards are carried as decimal strings, either `"facility code"` (two
//! fields) or a bare `"code"`. Leading zeros in the facility part are not
//! significant, and a stored bare code matches any presented card whose
//! code part is equal. Comparison is numeric so `"030"` and `"30"` agree.
//!
//! The bare-code rule is one-directional on purpose: only the stored card
//! (the left argument) may act as a wildcard over facilities. A card that
//! names a facility never matches through a bare code into a different
//! facility, which keeps the match relation transitive.

use alloc::string::String;
use core::fmt::Write;

/// Render a decoded card as the canonical `"facility code"` string.
pub fn render_card(facility: u32, number: u32) -> String {
    let mut s = String::new();
    let _ = write!(s, "{} {}", facility, number);
    s
}

/// Parsed card: optional facility part plus the code part.
fn parse(s: &str) -> Option<(Option<u64>, u64)> {
    let mut parts = s.split_whitespace();
    let first = parts.next()?;
    match parts.next() {
        Some(second) => {
            if parts.next().is_some() {
                return None;
            }
            Some((Some(first.parse().ok()?), second.parse().ok()?))
        }
        None => Some((None, first.parse().ok()?)),
    }
}

/// Whether `stored` covers the `presented` card.
///
/// Codes must be numerically equal. A stored facility must equal the
/// presented one; a stored bare code accepts any facility. A presented bare
/// code only matches a stored bare code.
pub fn cards_match(stored: &str, presented: &str) -> bool {
    let (Some((fac_stored, code_stored)), Some((fac_presented, code_presented))) =
        (parse(stored), parse(presented))
    else {
        return false;
    };
    if code_stored != code_presented {
        return false;
    }
    match fac_stored {
        Some(fac) => fac_presented == Some(fac),
        None => true,
    }
}

/// PINs are 4 to 8 digits.
pub fn is_valid_pin(s: &str) -> bool {
    (4..=8).contains(&s.len()) && s.bytes().all(|b| b.is_ascii_digit())
}
