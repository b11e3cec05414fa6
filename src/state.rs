//! Node-wide state: databases, doors, ledger, log queue, wall clock.
//!
//! Everything the decision path touches hangs off one `CoreState`. The
//! firmware wraps it in a single async mutex; each lock-holder runs to
//! completion, so category writes stay all-or-nothing without extra
//! coordination.

use crate::clock::WallClock;
use crate::door::{BoardEmergency, Door, Override};
use crate::events::LogQueue;
use crate::schedule::{self, Interval};
use crate::tempcode::{TempCode, UsageLedger};
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

pub const DOOR_COUNT: usize = 2;

/// A principal as delivered by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub name: String,
    pub active: bool,
    pub cards: Vec<String>,
    pub pins: Vec<String>,
    pub doors: Vec<u8>,
}

/// Sync-delivered databases. Each field is replaced whole by its snapshot
/// category; nothing mutates them between syncs.
#[derive(Default)]
pub struct Databases {
    pub users: Vec<User>,
    pub temp_codes: Vec<TempCode>,
    pub door_schedules: [Vec<Interval>; DOOR_COUNT],
    pub user_schedules: BTreeMap<String, Vec<Interval>>,
}

pub struct CoreState {
    pub board_name: String,
    pub wall_clock: WallClock,
    pub dbs: Databases,
    pub doors: [Door; DOOR_COUNT],
    pub board_emergency: BoardEmergency,
    pub ledger: UsageLedger,
    pub log_queue: LogQueue,
    pub controller_online: bool,
}

impl CoreState {
    pub fn new(
        board_name: String,
        tz_offset_min: i32,
        door_names: [String; DOOR_COUNT],
        unlock_ms: [u64; DOOR_COUNT],
    ) -> Self {
        let [name1, name2] = door_names;
        Self {
            board_name,
            wall_clock: WallClock::new(tz_offset_min),
            dbs: Databases::default(),
            doors: [
                Door::new(1, name1, unlock_ms[0]),
                Door::new(2, name2, unlock_ms[1]),
            ],
            board_emergency: BoardEmergency::default(),
            ledger: UsageLedger::new(),
            log_queue: LogQueue::new(),
            controller_online: false,
        }
    }

    pub fn door(&self, number: u8) -> Option<&Door> {
        self.doors.iter().find(|d| d.number == number)
    }

    pub fn door_mut(&mut self, number: u8) -> Option<&mut Door> {
        self.doors.iter_mut().find(|d| d.number == number)
    }

    /// Intervals configured for a user, empty meaning 24/7.
    pub fn user_intervals(&self, name: &str) -> &[Interval] {
        self.dbs
            .user_schedules
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Re-derive every door's schedule mode from the wall clock. Idempotent;
    /// runs periodically and after sync, emergency changes, and time fixes.
    pub fn reevaluate_schedules(&mut self, now_ms: u64) {
        let local = self.wall_clock.local(now_ms);
        let board = self.board_emergency.state;
        for (idx, door) in self.doors.iter_mut().enumerate() {
            let mode = schedule::door_mode(&self.dbs.door_schedules[idx], local);
            door.apply_schedule_mode(mode, now_ms, board);
        }
    }

    /// Board-wide emergency lock.
    pub fn emergency_lock(&mut self, now_ms: u64) {
        log::warn!("emergency: board lockdown");
        self.board_emergency = BoardEmergency {
            state: Override::Lock,
            auto_reset_at: 0,
        };
        self.apply_board_emergency(now_ms);
    }

    /// Board-wide emergency unlock, optionally reverting after `duration_s`.
    pub fn emergency_unlock(&mut self, duration_s: u64, now_ms: u64) {
        log::warn!("emergency: board evacuation unlock ({}s)", duration_s);
        self.board_emergency = BoardEmergency {
            state: Override::Unlock,
            auto_reset_at: if duration_s == 0 {
                0
            } else {
                now_ms + duration_s * 1000
            },
        };
        self.apply_board_emergency(now_ms);
    }

    /// Clear the board emergency and fall back to schedules.
    pub fn emergency_reset(&mut self, now_ms: u64) {
        log::warn!("emergency: board reset to normal");
        self.board_emergency = BoardEmergency::default();
        self.apply_board_emergency(now_ms);
        self.reevaluate_schedules(now_ms);
    }

    fn apply_board_emergency(&mut self, now_ms: u64) {
        let board = self.board_emergency.state;
        for door in self.doors.iter_mut() {
            door.apply_emergency(now_ms, board);
        }
    }

    /// Door-level override from the controller ("lock", "unlock" or clear).
    pub fn set_door_override(&mut self, number: u8, ov: Override, now_ms: u64) -> bool {
        let board = self.board_emergency.state;
        let Some(door) = self.doors.iter_mut().find(|d| d.number == number) else {
            return false;
        };
        log::warn!("door {}: override set to {:?}", number, ov);
        door.set_override(ov, now_ms, board);
        if ov == Override::None {
            self.reevaluate_schedules(now_ms);
        }
        true
    }

    /// Periodic work: momentary expiry and emergency auto-reset.
    pub fn tick(&mut self, now_ms: u64) {
        if self.board_emergency.state == Override::Unlock
            && self.board_emergency.auto_reset_at != 0
            && now_ms >= self.board_emergency.auto_reset_at
        {
            log::info!("emergency: auto-reset after timed unlock");
            self.emergency_reset(now_ms);
        }
        let board = self.board_emergency.state;
        for door in self.doors.iter_mut() {
            door.tick(now_ms, board);
        }
    }

    pub fn timestamp(&self, now_ms: u64) -> String {
        self.wall_clock.timestamp(now_ms)
    }

    /// Flip the controller link state, logging transitions only.
    pub fn set_controller_online(&mut self, online: bool) {
        if self.controller_online != online {
            if online {
                log::info!("controller: online");
            } else {
                log::warn!("controller: offline");
            }
            self.controller_online = online;
        }
    }
}
