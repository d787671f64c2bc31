//! BDD tests for deadlock detection and recovery.

// Integration tests allow unwrap/panic for assertions
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use rand::SeedableRng;
use rand::rngs::StdRng;
use resmgr_core::{ResourceId, SlotId};
use resmgr_master::protocol::{on_release, on_request};
use resmgr_master::{
    ProcessTable, RequestOutcome, ResourceInfo, SimState, SlotState, detect_and_recover,
    find_victim,
};

const R1: ResourceId = ResourceId::new(0);
const R2: ResourceId = ResourceId::new(1);

fn exclusive_state(slots: usize, resources: usize) -> SimState {
    let table = ProcessTable::new(slots, vec![ResourceInfo::new(false, 1); resources]);
    SimState::new(table, StdRng::seed_from_u64(17))
}

/// A holds R1 and waits on R2; B holds R2 and waits on R1.
fn crossed_pair() -> (SimState, SlotId, SlotId) {
    let mut state = exclusive_state(2, 2);
    let a = state.table.claim_slot().unwrap();
    let b = state.table.claim_slot().unwrap();
    on_request(&mut state, a, R1).unwrap();
    on_request(&mut state, b, R2).unwrap();
    assert_eq!(on_request(&mut state, a, R2).unwrap(), RequestOutcome::Blocked);
    assert_eq!(on_request(&mut state, b, R1).unwrap(), RequestOutcome::Blocked);
    (state, a, b)
}

#[tokio::test]
async fn given_crossed_requests_when_detection_runs_then_exactly_one_killed() {
    // Given: two workers each holding what the other waits for
    let (mut state, a, b) = crossed_pair();
    assert!(find_victim(&state.table).is_some());

    // When: detection runs
    let report = detect_and_recover(&mut state).await.expect("detection");

    // Then: exactly one of them is killed
    assert_eq!(report.victims.len(), 1);
    let victim = report.victims[0];
    let survivor = if victim == a { b } else { a };
    assert!(victim == a || victim == b);
    assert_eq!(state.stats.deadlock_kills, 1);
    assert_eq!(state.stats.detection_runs, 1);
    assert_eq!(state.table.state(victim).unwrap(), SlotState::NotStarted);

    // Then: the survivor was woken and now holds both resources
    assert_eq!(state.table.state(survivor).unwrap(), SlotState::Active);
    assert_eq!(state.table.allocated(survivor, R1), 1);
    assert_eq!(state.table.allocated(survivor, R2), 1);

    // Then: once the survivor releases, everything is free again
    on_release(&mut state, survivor, R1).unwrap();
    on_release(&mut state, survivor, R2).unwrap();
    assert_eq!(state.table.total_allocated(R1), 0);
    assert_eq!(state.table.total_allocated(R2), 0);
}

#[tokio::test]
async fn given_recovered_table_when_detection_runs_again_then_no_deadlock() {
    // Given: a deadlock that has already been resolved
    let (mut state, _, _) = crossed_pair();
    detect_and_recover(&mut state).await.unwrap();

    // When: detection runs a second time
    let report = detect_and_recover(&mut state).await.unwrap();

    // Then: nothing is killed
    assert!(!report.deadlock_found());
    assert_eq!(state.stats.deadlock_kills, 1);
    assert_eq!(state.stats.detection_runs, 2);
}

#[tokio::test]
async fn given_no_blocked_workers_when_detection_runs_then_only_clock_moves() {
    // Given: active workers, none blocked
    let mut state = exclusive_state(3, 2);
    let a = state.table.claim_slot().unwrap();
    state.table.claim_slot().unwrap();
    on_request(&mut state, a, R1).unwrap();
    let snapshot = state.table.snapshot().to_string();

    for _ in 0..3 {
        // When: detection runs
        let before = state.now();
        let report = detect_and_recover(&mut state).await.unwrap();

        // Then: no deadlock, no table change, clock advanced
        assert!(!report.deadlock_found());
        assert!(state.now() > before);
        assert_eq!(state.table.snapshot().to_string(), snapshot);
    }
    assert_eq!(state.stats.deadlock_kills, 0);
}

#[tokio::test]
async fn given_two_independent_cycles_when_detection_runs_then_both_broken() {
    // Given: P0<->P1 over R0/R1 and P2<->P3 over R2/R3
    let mut state = exclusive_state(4, 4);
    let slots: Vec<SlotId> = (0..4).map(|_| state.table.claim_slot().unwrap()).collect();
    for (slot, res) in slots.iter().zip(0..4) {
        on_request(&mut state, *slot, ResourceId::new(res)).unwrap();
    }
    on_request(&mut state, slots[0], ResourceId::new(1)).unwrap();
    on_request(&mut state, slots[1], ResourceId::new(0)).unwrap();
    on_request(&mut state, slots[2], ResourceId::new(3)).unwrap();
    on_request(&mut state, slots[3], ResourceId::new(2)).unwrap();

    // When: detection runs once
    let report = detect_and_recover(&mut state).await.unwrap();

    // Then: one victim per cycle and no blocked slot remains
    assert_eq!(report.victims.len(), 2);
    assert_eq!(state.table.first_blocked(), None);
    assert!(find_victim(&state.table).is_none());
    assert!(state.table.invariant_violation().is_none());
}

#[tokio::test]
async fn given_wait_on_active_holder_when_detection_runs_then_not_deadlock() {
    // Given: B waits on R1 held by an active A
    let mut state = exclusive_state(2, 1);
    let a = state.table.claim_slot().unwrap();
    let b = state.table.claim_slot().unwrap();
    on_request(&mut state, a, R1).unwrap();
    on_request(&mut state, b, R1).unwrap();

    // When: detection runs
    let report = detect_and_recover(&mut state).await.unwrap();

    // Then: the wait is left alone
    assert!(!report.deadlock_found());
    assert_eq!(state.table.state(b).unwrap(), SlotState::Blocked(R1));
}
