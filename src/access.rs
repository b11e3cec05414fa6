//! The decision engine: override lattice, credential resolution, actuation.
//!
//! Every attempt flows through `process`: the layered overrides are checked
//! strictly in order, then users, then temp codes. The outcome actuates the
//! door, lands in the log queue, and is returned so the firmware can drive
//! reader feedback and usage reports. All lookups hit local state only -
//! the network never sits between a badge and the relay.

use crate::credential::cards_match;
use crate::events::{CredentialKind, LogEntry};
use crate::schedule::{self, DoorMode, UserWindow};
use crate::state::CoreState;
use alloc::format;
use alloc::string::{String, ToString};

pub mod reason {
    pub const GRANTED: &str = "Access granted";
    pub const EMERGENCY_LOCK_DOOR: &str = "Emergency lockdown (door)";
    pub const EMERGENCY_LOCK_BOARD: &str = "Emergency lockdown (board)";
    pub const EMERGENCY_UNLOCK_DOOR: &str = "Emergency override active";
    pub const EMERGENCY_UNLOCK_BOARD: &str = "Emergency evacuation active";
    pub const SCHEDULE_LOCKED: &str = "Door locked by schedule";
    pub const SCHEDULE_UNLOCKED: &str = "Door unlocked by schedule";
    pub const NO_DOOR_ACCESS: &str = "No access to this door";
    pub const OUTSIDE_SCHEDULE: &str = "Outside allowed schedule";
    pub const TEMP_DISABLED: &str = "Temp code disabled";
    pub const TEMP_USED_ONE_TIME: &str = "Temp code already used on this door (one-time)";
    pub const TEMP_LIMIT_REACHED: &str = "Temp code usage limit reached on this door";
    pub const TEMP_NO_DOOR_ACCESS: &str = "Temp code not valid for this door";
    pub const UNKNOWN_CREDENTIAL: &str = "Unknown credential";
}

/// What was presented at the door.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presented<'a> {
    Card(&'a str),
    Pin(&'a str),
    /// Request-to-exit push button.
    Rex,
}

impl<'a> Presented<'a> {
    fn kind(&self) -> CredentialKind {
        match self {
            Presented::Card(_) => CredentialKind::Card,
            Presented::Pin(_) => CredentialKind::Pin,
            Presented::Rex => CredentialKind::Manual,
        }
    }

    fn credential_string(&self) -> String {
        match self {
            Presented::Card(c) => c.to_string(),
            Presented::Pin(p) => p.to_string(),
            Presented::Rex => String::from("REX"),
        }
    }
}

/// Decision outcome handed back to the firmware layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub granted: bool,
    pub principal: String,
    pub reason: &'static str,
    pub credential_type: CredentialKind,
    /// Temp-code grant to report upstream: `(code, per-door uses)`.
    pub report_usage: Option<(String, u32)>,
}

impl Decision {
    fn deny(reason: &'static str, principal: &str, kind: CredentialKind) -> Self {
        Self {
            granted: false,
            principal: String::from(principal),
            reason,
            credential_type: kind,
            report_usage: None,
        }
    }

    fn grant(reason: &'static str, principal: String, kind: CredentialKind) -> Self {
        Self {
            granted: true,
            principal,
            reason,
            credential_type: kind,
            report_usage: None,
        }
    }
}

/// Run one access attempt end to end: decide, actuate, log.
pub fn process(state: &mut CoreState, door_number: u8, cred: Presented, now_ms: u64) -> Decision {
    let decision = decide(state, door_number, cred, now_ms);

    if decision.granted {
        let board = state.board_emergency.state;
        if let Some(door) = state.door_mut(door_number) {
            door.momentary_unlock(now_ms, board);
        }
        log::info!(
            "access: door {} GRANTED to {} ({})",
            door_number,
            decision.principal,
            decision.reason
        );
    } else {
        log::warn!(
            "access: door {} DENIED ({})",
            door_number,
            decision.reason
        );
    }

    let entry = LogEntry {
        timestamp: state.timestamp(now_ms),
        door: door_number,
        principal: decision.principal.clone(),
        credential: cred.credential_string(),
        credential_type: decision.credential_type,
        granted: decision.granted,
        reason: String::from(decision.reason),
    };
    state.log_queue.push(entry);

    decision
}

/// The override lattice, applied strictly in order. First terminal verdict
/// wins.
pub fn decide(state: &mut CoreState, door_number: u8, cred: Presented, now_ms: u64) -> Decision {
    use crate::door::Override;

    let kind = cred.kind();
    let Some(door) = state.door(door_number) else {
        return Decision::deny(reason::UNKNOWN_CREDENTIAL, "Unknown", kind);
    };

    // REX bypasses schedules and credential lookup but never a lockdown.
    if cred == Presented::Rex {
        if door.emergency_override == Override::Lock {
            return Decision::deny(reason::EMERGENCY_LOCK_DOOR, "REX", kind);
        }
        if state.board_emergency.state == Override::Lock {
            return Decision::deny(reason::EMERGENCY_LOCK_BOARD, "REX", kind);
        }
        return Decision::grant(reason::GRANTED, String::from("REX"), kind);
    }

    if door.emergency_override == Override::Lock {
        return Decision::deny(reason::EMERGENCY_LOCK_DOOR, "Unknown", kind);
    }
    if door.emergency_override == Override::Unlock {
        return Decision::grant(
            reason::EMERGENCY_UNLOCK_DOOR,
            String::from("N/A (Emergency Override)"),
            kind,
        );
    }
    if state.board_emergency.state == Override::Lock {
        return Decision::deny(reason::EMERGENCY_LOCK_BOARD, "Unknown", kind);
    }
    if state.board_emergency.state == Override::Unlock {
        return Decision::grant(
            reason::EMERGENCY_UNLOCK_BOARD,
            String::from("N/A (Emergency Evacuation)"),
            kind,
        );
    }

    match door.schedule_mode {
        DoorMode::Locked => {
            return Decision::deny(reason::SCHEDULE_LOCKED, "Unknown", kind);
        }
        DoorMode::Unlock => {
            // Door is already held open; identify who badged for the log but
            // never let identification block the grant.
            let principal = identify(state, cred);
            return Decision::grant(reason::SCHEDULE_UNLOCKED, principal, kind);
        }
        DoorMode::Controlled => {}
    }

    resolve(state, door_number, cred, now_ms)
}

/// Normal resolution: users first, then temp codes for PINs.
fn resolve(state: &mut CoreState, door_number: u8, cred: Presented, now_ms: u64) -> Decision {
    let kind = cred.kind();
    let local = state.wall_clock.local(now_ms);

    // First matching active user wins; later matches are never consulted.
    let user_hit = state.dbs.users.iter().find(|u| {
        u.active
            && match cred {
                Presented::Card(c) => u.cards.iter().any(|stored| cards_match(stored, c)),
                Presented::Pin(p) => u.pins.iter().any(|stored| stored == p),
                Presented::Rex => false,
            }
    });

    if let Some(user) = user_hit {
        if !user.doors.contains(&door_number) {
            return Decision::deny(reason::NO_DOOR_ACCESS, &user.name, kind);
        }
        let window = schedule::user_window(state.user_intervals(&user.name), local);
        if window == UserWindow::Outside {
            return Decision::deny(reason::OUTSIDE_SCHEDULE, &user.name, kind);
        }
        return Decision::grant(reason::GRANTED, user.name.clone(), kind);
    }

    if let Presented::Pin(pin) = cred {
        if let Some(code) = state.dbs.temp_codes.iter().find(|t| t.code == pin) {
            let label = format!("🎫 {}", code.name);
            if !code.active {
                return Decision::deny(reason::TEMP_DISABLED, &label, CredentialKind::TempCode);
            }
            if code.exhausted_on(&state.ledger, door_number) {
                let why = match code.policy {
                    crate::tempcode::UsagePolicy::OneTime => reason::TEMP_USED_ONE_TIME,
                    _ => reason::TEMP_LIMIT_REACHED,
                };
                return Decision::deny(why, &label, CredentialKind::TempCode);
            }
            if !code.doors.contains(&door_number) {
                return Decision::deny(
                    reason::TEMP_NO_DOOR_ACCESS,
                    &label,
                    CredentialKind::TempCode,
                );
            }
            let code_string = code.code.clone();
            let uses = state.ledger.increment(&code_string, door_number);
            let mut d = Decision::grant(reason::GRANTED, label, CredentialKind::TempCode);
            d.report_usage = Some((code_string, uses));
            return d;
        }
    }

    Decision::deny(reason::UNKNOWN_CREDENTIAL, "Unknown", kind)
}

/// Best-effort principal label for grants that bypass resolution.
fn identify(state: &CoreState, cred: Presented) -> String {
    match cred {
        Presented::Card(c) => state
            .dbs
            .users
            .iter()
            .find(|u| u.cards.iter().any(|stored| cards_match(stored, c)))
            .map(|u| u.name.clone()),
        Presented::Pin(p) => state
            .dbs
            .users
            .iter()
            .find(|u| u.pins.iter().any(|stored| stored == p))
            .map(|u| u.name.clone())
            .or_else(|| {
                state
                    .dbs
                    .temp_codes
                    .iter()
                    .find(|t| t.code == p)
                    .map(|t| format!("🎫 {}", t.name))
            }),
        Presented::Rex => Some(String::from("REX")),
    }
    .unwrap_or_else(|| String::from("Unknown"))
}
