//! Per-door lock state machine and board-wide emergency state.
//!
//! The relay output is the OR of three sources: an emergency unlock (door
//! or board), a scheduled held-open window, and a momentary unlock timer.
//! A lock override at either level wins over all of them. Transitions keep
//! the stored state consistent with that rule; `relay_invariant_holds` spells
//! it out for the tests.

use crate::schedule::DoorMode;
use alloc::string::String;

/// Sentinel deadline for a held-open relay.
pub const HELD_OPEN: u64 = u64::MAX;

/// Emergency override level, per door or board-wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Override {
    #[default]
    None,
    Lock,
    Unlock,
}

impl Override {
    pub fn as_str(&self) -> &'static str {
        match self {
            Override::None => "",
            Override::Lock => "lock",
            Override::Unlock => "unlock",
        }
    }
}

/// Board-wide emergency. `auto_reset_at` of 0 means no auto-reset.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoardEmergency {
    pub state: Override,
    pub auto_reset_at: u64,
}

/// One door's actuation state.
#[derive(Debug, Clone)]
pub struct Door {
    pub number: u8,
    pub name: String,
    pub momentary_unlock_ms: u64,
    pub relay_on: bool,
    /// Momentary deadline in monotonic ms; 0 = none, `HELD_OPEN` = schedule hold.
    pub locked_until: u64,
    pub scheduled_hold: bool,
    pub emergency_override: Override,
    pub schedule_mode: DoorMode,
}

impl Door {
    pub fn new(number: u8, name: String, momentary_unlock_ms: u64) -> Self {
        Self {
            number,
            name,
            momentary_unlock_ms,
            relay_on: false,
            locked_until: 0,
            scheduled_hold: false,
            emergency_override: Override::None,
            schedule_mode: DoorMode::Controlled,
        }
    }

    /// Any lock override in force, door-level or board-level.
    pub fn locked_out(&self, board: Override) -> bool {
        self.emergency_override == Override::Lock || board == Override::Lock
    }

    /// Any unlock override in force.
    fn forced_open(&self, board: Override) -> bool {
        self.emergency_override == Override::Unlock || board == Override::Unlock
    }

    fn momentary_active(&self, now_ms: u64) -> bool {
        self.locked_until != 0 && self.locked_until != HELD_OPEN && now_ms < self.locked_until
    }

    /// Start (or refresh) a momentary unlock after a grant.
    ///
    /// During a scheduled hold this is a no-op: the door is already open and
    /// the hold must not degrade into a timed window. A refresh only ever
    /// moves the deadline forward.
    pub fn momentary_unlock(&mut self, now_ms: u64, board: Override) {
        if self.scheduled_hold || self.locked_until == HELD_OPEN {
            return;
        }
        let deadline = now_ms + self.momentary_unlock_ms;
        self.locked_until = self.locked_until.max(deadline);
        if !self.locked_out(board) {
            self.relay_on = true;
        }
    }

    /// Expire a finished momentary window. Holds and overrides freeze the
    /// timer's effect without clearing its deadline.
    pub fn tick(&mut self, now_ms: u64, board: Override) {
        if self.relay_on
            && self.locked_until != HELD_OPEN
            && now_ms >= self.locked_until
            && !self.scheduled_hold
            && self.emergency_override == Override::None
            && board == Override::None
        {
            self.relay_on = false;
            self.locked_until = 0;
        }
        // Let a deadline that expired while frozen fall away quietly.
        if self.locked_until != HELD_OPEN && self.locked_until != 0 && now_ms >= self.locked_until {
            self.locked_until = 0;
        }
    }

    /// Apply the schedule's current verdict for this door.
    pub fn apply_schedule_mode(&mut self, mode: DoorMode, now_ms: u64, board: Override) {
        let was = self.schedule_mode;
        self.schedule_mode = mode;

        if self.locked_out(board) {
            // Mode is tracked but actuation waits for the emergency to clear.
            return;
        }

        match (self.scheduled_hold, mode) {
            (false, DoorMode::Unlock) => {
                self.scheduled_hold = true;
                self.locked_until = HELD_OPEN;
                self.relay_on = true;
                log::info!("door {}: schedule hold-open begins", self.number);
            }
            (true, DoorMode::Unlock) => {}
            (true, _) => {
                self.scheduled_hold = false;
                self.locked_until = 0;
                self.relay_on = self.forced_open(board) || self.momentary_active(now_ms);
                log::info!("door {}: schedule hold-open ends", self.number);
            }
            (false, _) => {}
        }
        if was != mode {
            log::debug!("door {}: schedule mode {}", self.number, mode.as_str());
        }
    }

    /// Set or clear this door's emergency override. Clearing recomputes the
    /// relay from the surviving sources; the caller re-applies the schedule.
    pub fn set_override(&mut self, ov: Override, now_ms: u64, board: Override) {
        self.emergency_override = ov;
        self.apply_emergency(now_ms, board);
    }

    /// Re-derive the relay after any emergency change (door or board).
    pub fn apply_emergency(&mut self, now_ms: u64, board: Override) {
        if self.locked_out(board) {
            self.relay_on = false;
            self.scheduled_hold = false;
            if self.locked_until == HELD_OPEN {
                self.locked_until = 0;
            }
        } else if self.forced_open(board) {
            self.relay_on = true;
        } else {
            self.relay_on = self.scheduled_hold || self.momentary_active(now_ms);
        }
    }

    /// The §-invariant, verbatim: relay high only with a legitimate source
    /// and never under a lock override.
    pub fn relay_invariant_holds(&self, now_ms: u64, board: Override) -> bool {
        if self.locked_out(board) {
            return !self.relay_on;
        }
        if self.relay_on {
            self.forced_open(board) || self.scheduled_hold || self.momentary_active(now_ms)
        } else {
            true
        }
    }
}
