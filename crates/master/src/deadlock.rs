//! Deadlock detection and recovery.
//!
//! The wait-for graph is never materialised: a blocked slot points at
//! every other holder of the resource it waits on. Detection walks that
//! relation breadth-first; recovery kills the victim and starts over until
//! a walk comes back clean.

use resmgr_core::{SlotId, WaitQueue};
use tracing::{info, warn};

use crate::error::Result;
use crate::lifecycle::{self, ExitReason};
use crate::state::{SimState, costs};
use crate::table::{ProcessTable, SlotState};

/// Outcome of one scheduled detection run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DetectionReport {
    /// Victims killed, in kill order. Empty means no deadlock was found.
    pub victims: Vec<SlotId>,
}

impl DetectionReport {
    #[must_use]
    pub fn deadlock_found(&self) -> bool {
        !self.victims.is_empty()
    }
}

/// Breadth-first walk from `root`. A slot is marked visited when it is
/// popped; meeting a visited holder closes a cycle and names the victim.
fn walk_from(table: &ProcessTable, root: SlotId) -> Option<SlotId> {
    let mut visited = vec![false; table.slot_count()];
    let mut frontier = WaitQueue::new();
    frontier.enqueue(root);

    while let Some(current) = frontier.dequeue() {
        let Some(awaited) = table.blocked_on(current) else {
            continue;
        };
        if let Some(mark) = visited.get_mut(current.index()) {
            *mark = true;
        }

        for holder in table.holders(awaited) {
            if holder == current {
                continue;
            }
            if visited.get(holder.index()).copied().unwrap_or(false) {
                return Some(holder);
            }
            if matches!(table.state(holder), Ok(SlotState::Blocked(_))) {
                frontier.enqueue(holder);
            }
        }
    }
    None
}

/// Find a deadlock victim, or `None` if the table is deadlock-free.
///
/// The walk starts at the lowest blocked slot; if that comes back clean,
/// each further blocked slot is tried as root so that a cycle the first
/// root cannot reach is still found.
#[must_use]
pub fn find_victim(table: &ProcessTable) -> Option<SlotId> {
    table
        .slots_in(|state| matches!(state, SlotState::Blocked(_)))
        .find_map(|root| walk_from(table, root))
}

/// Run detection, killing victims until the table is deadlock-free.
///
/// # Errors
///
/// Propagates failures from terminating a victim.
pub async fn detect_and_recover(state: &mut SimState) -> Result<DetectionReport> {
    state.stats.detection_runs = state.stats.detection_runs.saturating_add(1);
    let mut report = DetectionReport::default();

    loop {
        let at = state.charge(costs::DETECTION);
        info!(at = %at, "running deadlock detection");

        if state.table.first_blocked().is_none() {
            info!("system not in deadlock");
            return Ok(report);
        }

        let Some(victim) = find_victim(&state.table) else {
            state.charge(costs::DETECTION);
            info!("system not in deadlock");
            return Ok(report);
        };

        warn!(slot = %victim, "process is part of a deadlock");
        state.charge(costs::DETECTION);
        lifecycle::terminate(state, victim, ExitReason::Killed).await?;
        report.victims.push(victim);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use resmgr_core::ResourceId;

    use super::*;
    use crate::table::ResourceInfo;

    fn table(slots: usize, resources: usize) -> ProcessTable {
        ProcessTable::new(slots, vec![ResourceInfo::new(false, 1); resources])
    }

    fn hold(table: &mut ProcessTable, slot: usize, res: usize) {
        table.grant(SlotId::new(slot), ResourceId::new(res)).unwrap();
    }

    fn wait(table: &mut ProcessTable, slot: usize, res: usize) {
        table
            .set_state(SlotId::new(slot), SlotState::Blocked(ResourceId::new(res)))
            .unwrap();
    }

    fn activate(table: &mut ProcessTable, count: usize) {
        for _ in 0..count {
            table.claim_slot().unwrap();
        }
    }

    #[test]
    fn test_no_blocked_slots_means_no_victim() {
        let mut table = table(3, 2);
        activate(&mut table, 3);
        hold(&mut table, 0, 0);
        assert_eq!(find_victim(&table), None);
    }

    #[test]
    fn test_two_slot_cycle() {
        let mut table = table(2, 2);
        activate(&mut table, 2);
        hold(&mut table, 0, 0);
        hold(&mut table, 1, 1);
        wait(&mut table, 0, 1);
        wait(&mut table, 1, 0);

        let victim = find_victim(&table).unwrap();
        assert!(victim == SlotId::new(0) || victim == SlotId::new(1));
    }

    #[test]
    fn test_chain_to_active_holder_is_not_deadlock() {
        let mut table = table(3, 2);
        activate(&mut table, 3);
        hold(&mut table, 1, 0);
        hold(&mut table, 2, 1);
        wait(&mut table, 0, 0);
        wait(&mut table, 1, 1);

        assert_eq!(find_victim(&table), None);
    }

    #[test]
    fn test_three_slot_cycle() {
        let mut table = table(3, 3);
        activate(&mut table, 3);
        hold(&mut table, 0, 0);
        hold(&mut table, 1, 1);
        hold(&mut table, 2, 2);
        wait(&mut table, 0, 1);
        wait(&mut table, 1, 2);
        wait(&mut table, 2, 0);

        assert!(find_victim(&table).is_some());
    }

    #[test]
    fn test_cycle_unreachable_from_first_blocked_slot() {
        let mut table = table(4, 3);
        activate(&mut table, 4);
        // P0 waits on an active holder; P2 and P3 wait on each other
        hold(&mut table, 1, 0);
        wait(&mut table, 0, 0);
        hold(&mut table, 2, 1);
        hold(&mut table, 3, 2);
        wait(&mut table, 2, 2);
        wait(&mut table, 3, 1);

        let victim = find_victim(&table).unwrap();
        assert!(victim == SlotId::new(2) || victim == SlotId::new(3));
    }
}
