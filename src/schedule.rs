//! Schedule intervals and priority-based evaluation.
//!
//! Doors and users share the same interval shape. A door's winning interval
//! sets its mode for the current minute; a user's winning interval merely
//! means "inside access hours". Intervals are half-open: the end minute is
//! already outside.

use crate::clock::LocalTime;
use serde::{Deserialize, Serialize};

/// Door operating mode selected by schedule (or forced by default).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoorMode {
    Unlock,
    #[default]
    Controlled,
    Locked,
}

impl DoorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DoorMode::Unlock => "unlock",
            DoorMode::Controlled => "controlled",
            DoorMode::Locked => "locked",
        }
    }
}

/// One weekly recurring interval. `day` 0 = Monday.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval {
    pub day: u8,
    pub start_min: u16,
    pub end_min: u16,
    pub priority: i32,
    pub mode: DoorMode,
}

impl Interval {
    fn contains(&self, day_index: u8, minute: u16) -> bool {
        self.day == day_index && minute >= self.start_min && minute < self.end_min
    }
}

/// Highest-priority interval covering the given instant. Ties go to the
/// first interval in snapshot order, which keeps evaluation stable for a
/// given database.
fn best_match(intervals: &[Interval], day_index: u8, minute: u16) -> Option<&Interval> {
    let mut winner: Option<&Interval> = None;
    for iv in intervals.iter().filter(|iv| iv.contains(day_index, minute)) {
        match winner {
            Some(w) if iv.priority <= w.priority => {}
            _ => winner = Some(iv),
        }
    }
    winner
}

/// Current mode for a door. Without wall time the door stays `Controlled`,
/// which routes every attempt through normal credential resolution.
pub fn door_mode(intervals: &[Interval], local: Option<LocalTime>) -> DoorMode {
    let Some(t) = local else {
        return DoorMode::Controlled;
    };
    best_match(intervals, t.day_index, t.minute_of_day)
        .map(|iv| iv.mode)
        .unwrap_or(DoorMode::Controlled)
}

/// User schedule verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserWindow {
    /// No intervals configured: access around the clock.
    Always,
    /// Inside a configured interval.
    Within,
    /// Intervals configured, none current.
    Outside,
}

/// Evaluate a user's access hours. Without wall time users are admitted;
/// door schedules already fail safe in the other direction.
pub fn user_window(intervals: &[Interval], local: Option<LocalTime>) -> UserWindow {
    if intervals.is_empty() {
        return UserWindow::Always;
    }
    let Some(t) = local else {
        return UserWindow::Within;
    };
    if best_match(intervals, t.day_index, t.minute_of_day).is_some() {
        UserWindow::Within
    } else {
        UserWindow::Outside
    }
}
