//! Integration tests for the decision engine: override lattice, user and
//! temp-code resolution, logging side effects.

use access_node::access::{self, reason, Presented};
use access_node::credential::cards_match;
use access_node::door::Override;
use access_node::events::CredentialKind;
use access_node::schedule::{DoorMode, Interval};
use access_node::state::{CoreState, User};
use access_node::tempcode::{TempCode, UsagePolicy};

/// 2024-01-01 00:00:00 UTC, a Monday.
const MONDAY_UNIX_MS: u64 = 1_704_067_200_000;

fn node() -> CoreState {
    CoreState::new(
        "Test Node".into(),
        0,
        ["Front".into(), "Back".into()],
        [3000, 3000],
    )
}

/// Anchor wall time so that monotonic 0 is Monday `hour:minute` local.
fn set_time(state: &mut CoreState, day_offset: u64, hour: u64, minute: u64) {
    let unix = MONDAY_UNIX_MS + day_offset * 86_400_000 + hour * 3_600_000 + minute * 60_000;
    state.wall_clock.set_unix_ms(unix, 0);
}

fn alice() -> User {
    User {
        name: "Alice".into(),
        active: true,
        cards: vec!["30 33993".into()],
        pins: vec![],
        doors: vec![1],
    }
}

fn guest_code() -> TempCode {
    TempCode {
        code: "9988".into(),
        name: "Guest".into(),
        active: true,
        policy: UsagePolicy::OneTime,
        doors: vec![1, 2],
    }
}

// ============================================================================
// Normal resolution
// ============================================================================

#[test]
fn known_card_grants_and_unlocks() {
    let mut state = node();
    state.dbs.users.push(alice());

    let d = access::process(&mut state, 1, Presented::Card("30 33993"), 1000);
    assert!(d.granted);
    assert_eq!(d.principal, "Alice");
    assert_eq!(d.reason, reason::GRANTED);
    assert_eq!(d.credential_type, CredentialKind::Card);

    // Relay asserts for the momentary window, then drops.
    assert!(state.doors[0].relay_on);
    state.tick(1000 + 2999);
    assert!(state.doors[0].relay_on);
    state.tick(1000 + 3000);
    assert!(!state.doors[0].relay_on);

    // The decision was logged.
    let (_, entry) = state.log_queue.peek().expect("logged");
    assert!(entry.granted);
    assert_eq!(entry.principal, "Alice");
    assert_eq!(entry.door, 1);
    assert_eq!(entry.credential, "30 33993");
}

#[test]
fn leading_zero_facility_matches() {
    let mut state = node();
    let mut user = alice();
    user.cards = vec!["030 33993".into()];
    state.dbs.users.push(user);

    let d = access::process(&mut state, 1, Presented::Card("30 33993"), 0);
    assert!(d.granted);
    assert_eq!(d.principal, "Alice");
}

#[test]
fn bare_stored_code_matches_presented_card() {
    let mut state = node();
    let mut user = alice();
    user.cards = vec!["33993".into()];
    state.dbs.users.push(user);

    assert!(access::process(&mut state, 1, Presented::Card("30 33993"), 0).granted);
}

#[test]
fn unknown_credential_is_denied() {
    let mut state = node();
    state.dbs.users.push(alice());

    let d = access::process(&mut state, 1, Presented::Card("99 11111"), 0);
    assert!(!d.granted);
    assert_eq!(d.reason, reason::UNKNOWN_CREDENTIAL);
    assert_eq!(d.principal, "Unknown");
    assert!(!state.doors[0].relay_on);
}

#[test]
fn inactive_user_is_invisible() {
    let mut state = node();
    let mut user = alice();
    user.active = false;
    state.dbs.users.push(user);

    let d = access::process(&mut state, 1, Presented::Card("30 33993"), 0);
    assert_eq!(d.reason, reason::UNKNOWN_CREDENTIAL);
}

#[test]
fn door_membership_is_enforced() {
    let mut state = node();
    state.dbs.users.push(alice());

    let d = access::process(&mut state, 2, Presented::Card("30 33993"), 0);
    assert!(!d.granted);
    assert_eq!(d.reason, reason::NO_DOOR_ACCESS);
    assert_eq!(d.principal, "Alice");
}

#[test]
fn first_matching_user_wins() {
    let mut state = node();
    state.dbs.users.push(alice());
    let mut second = alice();
    second.name = "Alice Clone".into();
    second.doors = vec![1, 2];
    state.dbs.users.push(second);

    // Door 2 would be allowed for the clone, but resolution stops at Alice.
    let d = access::process(&mut state, 2, Presented::Card("30 33993"), 0);
    assert_eq!(d.reason, reason::NO_DOOR_ACCESS);
    assert_eq!(d.principal, "Alice");
}

#[test]
fn user_pin_grants() {
    let mut state = node();
    let mut user = alice();
    user.pins = vec!["4321".into()];
    state.dbs.users.push(user);

    let d = access::process(&mut state, 1, Presented::Pin("4321"), 0);
    assert!(d.granted);
    assert_eq!(d.credential_type, CredentialKind::Pin);
}

// ============================================================================
// User schedules
// ============================================================================

#[test]
fn user_schedule_edge_at_end_minute() {
    let mut state = node();
    let mut bob = alice();
    bob.name = "Bob".into();
    state.dbs.users.push(bob);
    state.dbs.user_schedules.insert(
        "Bob".into(),
        vec![Interval {
            day: 0,
            start_min: 9 * 60,
            end_min: 17 * 60,
            priority: 0,
            mode: DoorMode::Controlled,
        }],
    );

    // Monday 17:00: outside (end is exclusive)
    set_time(&mut state, 0, 17, 0);
    let d = access::process(&mut state, 1, Presented::Card("30 33993"), 0);
    assert!(!d.granted);
    assert_eq!(d.reason, reason::OUTSIDE_SCHEDULE);

    // Monday 16:59: inside
    let mut state = node();
    let mut bob = alice();
    bob.name = "Bob".into();
    state.dbs.users.push(bob);
    state.dbs.user_schedules.insert(
        "Bob".into(),
        vec![Interval {
            day: 0,
            start_min: 9 * 60,
            end_min: 17 * 60,
            priority: 0,
            mode: DoorMode::Controlled,
        }],
    );
    set_time(&mut state, 0, 16, 59);
    assert!(access::process(&mut state, 1, Presented::Card("30 33993"), 0).granted);
}

#[test]
fn user_without_wall_time_is_admitted() {
    let mut state = node();
    state.dbs.users.push(alice());
    state.dbs.user_schedules.insert(
        "Alice".into(),
        vec![Interval {
            day: 0,
            start_min: 0,
            end_min: 60,
            priority: 0,
            mode: DoorMode::Controlled,
        }],
    );

    // No SNTP fix yet: schedules cannot be evaluated, users pass.
    assert!(access::process(&mut state, 1, Presented::Card("30 33993"), 0).granted);
}

// ============================================================================
// Temp codes
// ============================================================================

#[test]
fn one_time_code_is_per_door() {
    let mut state = node();
    state.dbs.temp_codes.push(guest_code());

    // First use at door 1 grants
    let d = access::process(&mut state, 1, Presented::Pin("9988"), 0);
    assert!(d.granted);
    assert_eq!(d.principal, "🎫 Guest");
    assert_eq!(d.credential_type, CredentialKind::TempCode);
    assert_eq!(d.report_usage, Some(("9988".into(), 1)));

    // Second use at door 1 is spent
    let d = access::process(&mut state, 1, Presented::Pin("9988"), 1000);
    assert!(!d.granted);
    assert_eq!(d.reason, reason::TEMP_USED_ONE_TIME);

    // Door 2 still has its own allowance
    let d = access::process(&mut state, 2, Presented::Pin("9988"), 2000);
    assert!(d.granted);
}

#[test]
fn controller_reset_restores_one_time_code() {
    let mut state = node();
    state.dbs.temp_codes.push(guest_code());

    assert!(access::process(&mut state, 1, Presented::Pin("9988"), 0).granted);
    assert!(!access::process(&mut state, 1, Presented::Pin("9988"), 1).granted);

    // The controller zeroed the server-side total: local counters reset.
    state.ledger.reset("9988");
    assert!(access::process(&mut state, 1, Presented::Pin("9988"), 2).granted);
}

#[test]
fn limited_code_allows_max_uses_per_door() {
    let mut state = node();
    let mut code = guest_code();
    code.policy = UsagePolicy::Limited(2);
    state.dbs.temp_codes.push(code);

    assert!(access::process(&mut state, 1, Presented::Pin("9988"), 0).granted);
    assert!(access::process(&mut state, 1, Presented::Pin("9988"), 1).granted);
    let d = access::process(&mut state, 1, Presented::Pin("9988"), 2);
    assert!(!d.granted);
    assert_eq!(d.reason, reason::TEMP_LIMIT_REACHED);
    // Unaffected door keeps its own budget
    assert!(access::process(&mut state, 2, Presented::Pin("9988"), 3).granted);
}

#[test]
fn unlimited_code_never_exhausts() {
    let mut state = node();
    let mut code = guest_code();
    code.policy = UsagePolicy::Unlimited;
    state.dbs.temp_codes.push(code);

    for t in 0..10 {
        assert!(access::process(&mut state, 1, Presented::Pin("9988"), t).granted);
    }
}

#[test]
fn inactive_temp_code_is_denied() {
    let mut state = node();
    let mut code = guest_code();
    code.active = false;
    state.dbs.temp_codes.push(code);

    let d = access::process(&mut state, 1, Presented::Pin("9988"), 0);
    assert!(!d.granted);
    assert_eq!(d.reason, reason::TEMP_DISABLED);
    assert_eq!(state.ledger.uses("9988", 1), 0);
}

#[test]
fn temp_code_door_set_is_enforced() {
    let mut state = node();
    let mut code = guest_code();
    code.doors = vec![2];
    state.dbs.temp_codes.push(code);

    let d = access::process(&mut state, 1, Presented::Pin("9988"), 0);
    assert!(!d.granted);
    assert_eq!(d.reason, reason::TEMP_NO_DOOR_ACCESS);
}

#[test]
fn user_pin_shadows_temp_code() {
    let mut state = node();
    let mut user = alice();
    user.pins = vec!["9988".into()];
    state.dbs.users.push(user);
    state.dbs.temp_codes.push(guest_code());

    let d = access::process(&mut state, 1, Presented::Pin("9988"), 0);
    assert!(d.granted);
    assert_eq!(d.principal, "Alice");
    assert_eq!(d.report_usage, None);
    assert_eq!(state.ledger.uses("9988", 1), 0);
}

// ============================================================================
// Override lattice
// ============================================================================

#[test]
fn door_lock_override_denies_known_card() {
    let mut state = node();
    state.dbs.users.push(alice());
    state.set_door_override(1, Override::Lock, 0);

    let d = access::process(&mut state, 1, Presented::Card("30 33993"), 1);
    assert!(!d.granted);
    assert_eq!(d.reason, reason::EMERGENCY_LOCK_DOOR);
    assert!(!state.doors[0].relay_on);
}

#[test]
fn door_unlock_override_grants_unknown_card() {
    let mut state = node();
    state.set_door_override(1, Override::Unlock, 0);

    let d = access::process(&mut state, 1, Presented::Card("1 2"), 1);
    assert!(d.granted);
    assert_eq!(d.principal, "N/A (Emergency Override)");
}

#[test]
fn board_lock_beats_board_unlock_ordering() {
    let mut state = node();
    state.dbs.users.push(alice());
    state.emergency_lock(0);

    let d = access::process(&mut state, 1, Presented::Card("30 33993"), 1);
    assert!(!d.granted);
    assert_eq!(d.reason, reason::EMERGENCY_LOCK_BOARD);
}

#[test]
fn board_unlock_grants_with_evacuation_principal() {
    let mut state = node();
    state.emergency_unlock(0, 0);

    let d = access::process(&mut state, 2, Presented::Pin("0000"), 1);
    assert!(d.granted);
    assert_eq!(d.principal, "N/A (Emergency Evacuation)");
}

#[test]
fn door_override_outranks_board_emergency() {
    let mut state = node();
    state.emergency_unlock(0, 0);
    state.set_door_override(1, Override::Lock, 0);

    // Door-level lock is rule one; the board evacuation never gets a say.
    let d = access::process(&mut state, 1, Presented::Card("1 2"), 1);
    assert!(!d.granted);
    assert_eq!(d.reason, reason::EMERGENCY_LOCK_DOOR);
}

#[test]
fn schedule_locked_denies_known_card() {
    let mut state = node();
    state.dbs.users.push(alice());
    state.doors[0].schedule_mode = DoorMode::Locked;

    let d = access::process(&mut state, 1, Presented::Card("30 33993"), 0);
    assert!(!d.granted);
    assert_eq!(d.reason, reason::SCHEDULE_LOCKED);
}

#[test]
fn schedule_unlock_grants_and_identifies() {
    let mut state = node();
    state.dbs.users.push(alice());
    state.doors[0].schedule_mode = DoorMode::Unlock;

    let d = access::process(&mut state, 1, Presented::Card("30 33993"), 0);
    assert!(d.granted);
    assert_eq!(d.principal, "Alice");
    assert_eq!(d.reason, reason::SCHEDULE_UNLOCKED);

    // Unknown cards are granted too; identification is best effort.
    let d = access::process(&mut state, 1, Presented::Card("9 9"), 1);
    assert!(d.granted);
    assert_eq!(d.principal, "Unknown");
}

#[test]
fn schedule_unlock_identification_does_not_consume_temp_use() {
    let mut state = node();
    state.dbs.temp_codes.push(guest_code());
    state.doors[0].schedule_mode = DoorMode::Unlock;

    let d = access::process(&mut state, 1, Presented::Pin("9988"), 0);
    assert!(d.granted);
    assert_eq!(d.principal, "🎫 Guest");
    assert_eq!(d.report_usage, None);
    assert_eq!(state.ledger.uses("9988", 1), 0);
}

// ============================================================================
// REX
// ============================================================================

#[test]
fn rex_grants_as_manual() {
    let mut state = node();
    let d = access::process(&mut state, 1, Presented::Rex, 0);
    assert!(d.granted);
    assert_eq!(d.principal, "REX");
    assert_eq!(d.credential_type, CredentialKind::Manual);
    assert!(state.doors[0].relay_on);
}

#[test]
fn rex_is_subject_to_lockdown() {
    let mut state = node();
    state.emergency_lock(0);
    let d = access::process(&mut state, 1, Presented::Rex, 1);
    assert!(!d.granted);
    assert_eq!(d.reason, reason::EMERGENCY_LOCK_BOARD);
    assert!(!state.doors[0].relay_on);
}

#[test]
fn rex_bypasses_schedule_lock() {
    let mut state = node();
    state.doors[0].schedule_mode = DoorMode::Locked;
    assert!(access::process(&mut state, 1, Presented::Rex, 0).granted);
}

// ============================================================================
// Card matching properties
// ============================================================================

#[test]
fn card_match_is_an_equivalence_on_facility_forms() {
    let forms = ["030 33993", "30 33993", "0030 33993"];
    for a in forms {
        for b in forms {
            assert!(cards_match(a, b), "{} ~ {}", a, b);
            assert!(cards_match(b, a), "{} ~ {}", b, a);
        }
    }
    // Transitivity across the chain
    assert!(cards_match(forms[0], forms[1]) && cards_match(forms[1], forms[2]));
    assert!(cards_match(forms[0], forms[2]));
}

#[test]
fn card_match_is_transitive_even_through_bare_codes() {
    // A bare code sits between two distinct facilities. If it could link
    // in both directions, "1 100" ~ "100" ~ "2 100" would force the absurd
    // "1 100" ~ "2 100". Check the implication over every triple.
    let forms = ["1 100", "01 100", "2 100", "100", "0100"];
    for a in forms {
        for b in forms {
            for c in forms {
                if cards_match(a, b) && cards_match(b, c) {
                    assert!(cards_match(a, c), "{} ~ {} ~ {} but not {} ~ {}", a, b, c, a, c);
                }
            }
        }
    }
    // The bridge itself must stay severed.
    assert!(!cards_match("1 100", "2 100"));
    // The wildcard only works from the stored side.
    assert!(cards_match("100", "1 100"));
    assert!(cards_match("100", "2 100"));
    assert!(!cards_match("1 100", "100"));
}

#[test]
fn card_match_distinguishes_facilities_and_codes() {
    assert!(!cards_match("30 33993", "31 33993"));
    assert!(!cards_match("30 33993", "30 33994"));
    assert!(!cards_match("33993", "33994"));
}

#[test]
fn card_match_rejects_garbage() {
    assert!(!cards_match("abc", "abc"));
    assert!(!cards_match("1 2 3", "1 2"));
    assert!(!cards_match("", "30 33993"));
}
