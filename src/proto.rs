//! Controller wire schema: snapshot ingest and outbound message bodies.
//!
//! The snapshot arrives as one JSON document with optional categories.
//! Decoding and validation happen up front into owned core types; only a
//! fully valid payload ever touches the databases, so a parse error leaves
//! the previous snapshot intact. Unknown JSON fields are ignored.

use crate::events::LogEntry;
use crate::schedule::{DoorMode, Interval};
use crate::state::{CoreState, User, DOOR_COUNT};
use crate::tempcode::{TempCode, UsagePolicy};
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Snapshot ingest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotError {
    Json,
    BadTime,
    BadDay,
    BadUsageType,
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotError::Json => write!(f, "invalid JSON"),
            SnapshotError::BadTime => write!(f, "invalid HH:MM time"),
            SnapshotError::BadDay => write!(f, "day of week out of range"),
            SnapshotError::BadUsageType => write!(f, "unknown usage_type"),
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
struct RawUser {
    name: String,
    #[serde(default = "default_true")]
    active: bool,
    #[serde(default)]
    cards: Vec<String>,
    #[serde(default)]
    pins: Vec<String>,
    #[serde(default)]
    doors: Vec<u8>,
}

#[derive(Deserialize)]
struct RawInterval {
    day: u8,
    start: String,
    end: String,
    #[serde(default)]
    priority: Option<i32>,
    #[serde(rename = "type", default)]
    mode: Option<DoorMode>,
}

#[derive(Deserialize)]
struct RawTempCode {
    code: String,
    name: String,
    #[serde(default = "default_true")]
    active: bool,
    usage_type: String,
    #[serde(default)]
    max_uses: u32,
    #[serde(default)]
    doors: Vec<u8>,
    #[serde(default)]
    current_uses: u32,
}

#[derive(Deserialize)]
struct RawDurations {
    #[serde(default)]
    door1: Option<u64>,
    #[serde(default)]
    door2: Option<u64>,
}

#[derive(Deserialize)]
struct RawSnapshot {
    #[serde(default)]
    users: Option<Vec<RawUser>>,
    #[serde(default)]
    door_schedules: Option<BTreeMap<String, Vec<RawInterval>>>,
    #[serde(default)]
    user_schedules: Option<BTreeMap<String, Vec<RawInterval>>>,
    #[serde(default)]
    temp_codes: Option<Vec<RawTempCode>>,
    #[serde(default)]
    door_names: Option<BTreeMap<String, String>>,
    #[serde(default)]
    unlock_durations: Option<RawDurations>,
}

/// A validated snapshot, ready to apply without further failure.
#[derive(Default, Debug)]
pub struct Snapshot {
    pub users: Option<Vec<User>>,
    pub door_schedules: Option<[Vec<Interval>; DOOR_COUNT]>,
    pub user_schedules: Option<BTreeMap<String, Vec<Interval>>>,
    /// New temp-code table plus the codes whose local counters reset.
    pub temp_codes: Option<(Vec<TempCode>, Vec<String>)>,
    pub door_names: Option<BTreeMap<u8, String>>,
    pub unlock_durations: Option<[Option<u64>; DOOR_COUNT]>,
}

/// `"HH:MM"` to minutes since midnight. `24:00` is a valid exclusive end.
fn parse_hhmm(s: &str) -> Result<u16, SnapshotError> {
    let (h, m) = s.split_once(':').ok_or(SnapshotError::BadTime)?;
    let h: u16 = h.parse().map_err(|_| SnapshotError::BadTime)?;
    let m: u16 = m.parse().map_err(|_| SnapshotError::BadTime)?;
    if h > 24 || m > 59 || (h == 24 && m != 0) {
        return Err(SnapshotError::BadTime);
    }
    Ok(h * 60 + m)
}

fn convert_interval(raw: RawInterval) -> Result<Interval, SnapshotError> {
    if raw.day > 6 {
        return Err(SnapshotError::BadDay);
    }
    Ok(Interval {
        day: raw.day,
        start_min: parse_hhmm(&raw.start)?,
        end_min: parse_hhmm(&raw.end)?,
        priority: raw.priority.unwrap_or(0),
        mode: raw.mode.unwrap_or(DoorMode::Controlled),
    })
}

fn convert_intervals(raw: Vec<RawInterval>) -> Result<Vec<Interval>, SnapshotError> {
    raw.into_iter().map(convert_interval).collect()
}

fn convert_temp_code(raw: RawTempCode) -> Result<(TempCode, bool), SnapshotError> {
    let policy = match raw.usage_type.as_str() {
        "one_time" => UsagePolicy::OneTime,
        "limited" => UsagePolicy::Limited(raw.max_uses),
        "unlimited" => UsagePolicy::Unlimited,
        _ => return Err(SnapshotError::BadUsageType),
    };
    // The controller zeroes its total to order a local counter reset.
    let reset = raw.current_uses == 0 && raw.active;
    Ok((
        TempCode {
            code: raw.code,
            name: raw.name,
            active: raw.active,
            policy,
            doors: raw.doors,
        },
        reset,
    ))
}

/// Decode and validate a snapshot payload.
pub fn parse_snapshot(bytes: &[u8]) -> Result<Snapshot, SnapshotError> {
    let raw: RawSnapshot = serde_json::from_slice(bytes).map_err(|_| SnapshotError::Json)?;
    let mut snap = Snapshot::default();

    if let Some(users) = raw.users {
        snap.users = Some(
            users
                .into_iter()
                .map(|u| User {
                    name: u.name,
                    active: u.active,
                    cards: u.cards,
                    pins: u.pins,
                    doors: u.doors,
                })
                .collect(),
        );
    }

    if let Some(doors) = raw.door_schedules {
        let mut per_door: [Vec<Interval>; DOOR_COUNT] = Default::default();
        for (key, intervals) in doors {
            match key.parse::<usize>() {
                Ok(n) if (1..=DOOR_COUNT).contains(&n) => {
                    per_door[n - 1] = convert_intervals(intervals)?;
                }
                _ => log::warn!("sync: ignoring schedule for unknown door {:?}", key),
            }
        }
        snap.door_schedules = Some(per_door);
    }

    if let Some(users) = raw.user_schedules {
        let mut map = BTreeMap::new();
        for (name, intervals) in users {
            map.insert(name, convert_intervals(intervals)?);
        }
        snap.user_schedules = Some(map);
    }

    if let Some(codes) = raw.temp_codes {
        let mut table = Vec::with_capacity(codes.len());
        let mut resets = Vec::new();
        for raw_code in codes {
            let (code, reset) = convert_temp_code(raw_code)?;
            if reset {
                resets.push(code.code.clone());
            }
            table.push(code);
        }
        snap.temp_codes = Some((table, resets));
    }

    if let Some(names) = raw.door_names {
        let mut map = BTreeMap::new();
        for (key, name) in names {
            match key.parse::<u8>() {
                Ok(n) if (1..=DOOR_COUNT as u8).contains(&n) => {
                    map.insert(n, name);
                }
                _ => log::warn!("sync: ignoring name for unknown door {:?}", key),
            }
        }
        snap.door_names = Some(map);
    }

    if let Some(durations) = raw.unlock_durations {
        snap.unlock_durations = Some([durations.door1, durations.door2]);
    }

    Ok(snap)
}

/// Which persisted settings a snapshot changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    pub door_names_changed: bool,
    pub unlock_durations_changed: bool,
}

/// Replace each present category and re-derive door schedules.
pub fn apply_snapshot(state: &mut CoreState, snap: Snapshot, now_ms: u64) -> Applied {
    let mut applied = Applied::default();

    if let Some(users) = snap.users {
        log::info!("sync: replacing {} users", users.len());
        state.dbs.users = users;
    }
    if let Some(schedules) = snap.door_schedules {
        state.dbs.door_schedules = schedules;
    }
    if let Some(schedules) = snap.user_schedules {
        state.dbs.user_schedules = schedules;
    }
    if let Some((codes, resets)) = snap.temp_codes {
        for code in &resets {
            log::info!("sync: resetting local uses for temp code {}", code);
            state.ledger.reset(code);
        }
        state.dbs.temp_codes = codes;
    }
    if let Some(names) = snap.door_names {
        for (number, name) in names {
            if let Some(door) = state.door_mut(number) {
                if door.name != name {
                    door.name = name;
                    applied.door_names_changed = true;
                }
            }
        }
    }
    if let Some(durations) = snap.unlock_durations {
        for (idx, duration) in durations.iter().enumerate() {
            if let Some(ms) = duration {
                if state.doors[idx].momentary_unlock_ms != *ms {
                    state.doors[idx].momentary_unlock_ms = *ms;
                    applied.unlock_durations_changed = true;
                }
            }
        }
    }

    state.reevaluate_schedules(now_ms);
    applied
}

// ---------------------------------------------------------------------------
// Outbound bodies
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct Announce<'a> {
    pub board_ip: &'a str,
    pub mac_address: &'a str,
    pub board_name: &'a str,
    pub door1_name: &'a str,
    pub door2_name: &'a str,
}

#[derive(Serialize)]
pub struct Heartbeat<'a> {
    pub ip_address: &'a str,
    pub board_name: &'a str,
}

#[derive(Serialize)]
struct LogPost<'a> {
    timestamp: &'a str,
    door_number: u8,
    user: &'a str,
    credential: &'a str,
    credential_type: &'a str,
    granted: bool,
    reason: &'a str,
}

#[derive(Serialize)]
pub struct UsagePost<'a> {
    pub code: &'a str,
    /// Per-door count; the field name is what the controller has always
    /// accepted.
    pub current_uses: u32,
}

pub fn announce_body(a: &Announce<'_>) -> Result<String, serde_json::Error> {
    serde_json::to_string(a)
}

pub fn heartbeat_body(h: &Heartbeat<'_>) -> Result<String, serde_json::Error> {
    serde_json::to_string(h)
}

pub fn log_entry_body(entry: &LogEntry) -> Result<String, serde_json::Error> {
    serde_json::to_string(&LogPost {
        timestamp: &entry.timestamp,
        door_number: entry.door,
        user: &entry.principal,
        credential: &entry.credential,
        credential_type: entry.credential_type.as_str(),
        granted: entry.granted,
        reason: &entry.reason,
    })
}

pub fn usage_body(u: &UsagePost<'_>) -> Result<String, serde_json::Error> {
    serde_json::to_string(u)
}

// ---------------------------------------------------------------------------
// Inbound command bodies
// ---------------------------------------------------------------------------

#[derive(Deserialize, Default)]
pub struct EmergencyUnlockReq {
    #[serde(default)]
    pub duration: Option<u64>,
}

#[derive(Deserialize)]
pub struct DoorOverrideReq {
    pub door_number: u8,
    #[serde(rename = "override")]
    pub mode: String,
}

#[derive(Deserialize)]
pub struct SetControllerReq {
    pub controller_ip: String,
    pub controller_port: u16,
}

pub fn parse_body<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, SnapshotError> {
    serde_json::from_slice(bytes).map_err(|_| SnapshotError::Json)
}

pub const SUCCESS_BODY: &str = r#"{"success":true}"#;
pub const FAILURE_BODY: &str = r#"{"success":false}"#;

// ---------------------------------------------------------------------------
// HTTP plumbing shared by the server and the client
// ---------------------------------------------------------------------------

/// Parse the status code out of an HTTP response.
pub fn parse_status_code(response: &str) -> u16 {
    response
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse().ok())
        .unwrap_or(0)
}

/// Locate the end of the header block.
pub fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Extract Content-Length from a header block (case-insensitive).
pub fn parse_content_length(headers: &str) -> Option<usize> {
    for line in headers.lines() {
        if line.len() >= 15 && line[..15].eq_ignore_ascii_case("content-length:") {
            return line[15..].trim().parse().ok();
        }
    }
    None
}
