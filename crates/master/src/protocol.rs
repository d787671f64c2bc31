//! Allocation and blocking protocol.
//!
//! Decides, for every request, release and termination, whether to grant,
//! block or wake, and charges the virtual-time cost of each step.

use rand::Rng;
use resmgr_core::{ResourceId, SlotId, ToWorker};
use tracing::{debug, info};

use crate::actors::WorkerLink;
use crate::error::{MasterError, Result};
use crate::state::{SNAPSHOT_EVERY, SimState, costs};
use crate::table::SlotState;

/// Result of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Granted,
    Blocked,
}

/// Handle `REQUEST(res)` from `slot`.
///
/// Blocks when another slot holds a non-shareable `res` or the limit is
/// reached; a slot's own holdings never block it.
///
/// # Errors
///
/// Returns an error for unknown ids or a closed worker mailbox.
pub fn on_request(state: &mut SimState, slot: SlotId, res: ResourceId) -> Result<RequestOutcome> {
    state.table.resource(res)?;
    if state.table.can_grant(slot, res) {
        grant(state, slot, res)?;
        Ok(RequestOutcome::Granted)
    } else {
        block(state, slot, res)?;
        Ok(RequestOutcome::Blocked)
    }
}

fn block(state: &mut SimState, slot: SlotId, res: ResourceId) -> Result<()> {
    state.table.set_state(slot, SlotState::Blocked(res))?;
    let at = state.charge(costs::BLOCK);
    info!(slot = %slot, resource = %res, at = %at, "blocking process");
    Ok(())
}

/// Give one unit of `res` to `slot` and notify its worker.
///
/// # Errors
///
/// Returns [`MasterError::GrantViolation`] if the invariants forbid the
/// grant, or [`MasterError::ChannelClosed`] if the worker is gone.
pub fn grant(state: &mut SimState, slot: SlotId, res: ResourceId) -> Result<()> {
    state.table.grant(slot, res)?;
    if let Some(link) = state.table.link(slot) {
        link.actor
            .send_message(ToWorker::Allocate(res))
            .map_err(|e| MasterError::channel_closed(slot, e.to_string()))?;
    }
    let at = state.charge(costs::GRANT);
    state.stats.grants = state.stats.grants.saturating_add(1);
    info!(slot = %slot, resource = %res, at = %at, "granting request");

    if state.stats.grants % SNAPSHOT_EVERY == 0 {
        debug!(grants = state.stats.grants, "allocation table\n{}", state.table.snapshot());
    }
    Ok(())
}

/// Handle `RELEASE(res)` from `slot`, then wake waiters on `res`.
///
/// # Errors
///
/// Returns [`MasterError::ProtocolViolation`] if `slot` holds no unit of `res`.
pub fn on_release(state: &mut SimState, slot: SlotId, res: ResourceId) -> Result<usize> {
    state.table.release(slot, res)?;
    debug!(slot = %slot, resource = %res, "release acknowledged");
    wake_up(state, res)
}

/// Wake slots blocked on `res`, scanning every slot once in circular order
/// from a random offset. A non-shareable resource wakes at most one slot;
/// a shareable one wakes waiters while capacity remains.
///
/// Returns how many slots were woken.
///
/// # Errors
///
/// Propagates grant failures.
pub fn wake_up(state: &mut SimState, res: ResourceId) -> Result<usize> {
    let slot_count = state.table.slot_count();
    if slot_count == 0 {
        return Ok(0);
    }
    let shareable = state.table.resource(res)?.shareable;
    let offset = state.rng.gen_range(0..slot_count);

    let mut woken = 0_usize;
    for step in 0..slot_count {
        let slot = SlotId::new(offset.wrapping_add(step) % slot_count);
        if state.table.blocked_on(slot) != Some(res) || !state.table.can_grant(slot, res) {
            continue;
        }

        state.table.set_state(slot, SlotState::Active)?;
        let at = state.charge(costs::WAKE);
        info!(slot = %slot, resource = %res, at = %at, "unblocking process");
        grant(state, slot, res)?;
        woken = woken.saturating_add(1);

        if !shareable {
            break;
        }
    }
    Ok(woken)
}

/// Handle `IDLE`. Nothing changes; the per-turn cost is charged by the loop.
pub fn on_idle(slot: SlotId) {
    debug!(slot = %slot, "idle");
}

/// Reclaim everything `slot` holds, wake waiters on each released resource
/// and free the slot. The worker link, if any, is handed back for teardown.
///
/// # Errors
///
/// Propagates table and grant failures.
pub fn on_terminate(state: &mut SimState, slot: SlotId) -> Result<Option<WorkerLink>> {
    let link = state.table.free_slot(slot)?;
    let released = state.table.release_all(slot)?;
    for (res, units) in released {
        debug!(slot = %slot, resource = %res, units, "reclaimed");
        wake_up(state, res)?;
    }
    Ok(link)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::table::{ProcessTable, ResourceInfo};

    const EXCLUSIVE: ResourceId = ResourceId::new(0);
    const SHARED: ResourceId = ResourceId::new(1);

    fn state(slots: usize) -> SimState {
        let table = ProcessTable::new(
            slots,
            vec![ResourceInfo::new(false, 1), ResourceInfo::new(true, 3)],
        );
        SimState::new(table, StdRng::seed_from_u64(5))
    }

    fn claim(state: &mut SimState, count: usize) -> Vec<SlotId> {
        (0..count).map(|_| state.table.claim_slot().unwrap()).collect()
    }

    #[test]
    fn test_request_on_free_resource_grants() {
        let mut state = state(2);
        let a = claim(&mut state, 1)[0];

        let outcome = on_request(&mut state, a, EXCLUSIVE).unwrap();

        assert_eq!(outcome, RequestOutcome::Granted);
        assert_eq!(state.table.allocated(a, EXCLUSIVE), 1);
        assert_eq!(state.stats.grants, 1);
    }

    #[test]
    fn test_request_on_held_exclusive_blocks() {
        let mut state = state(2);
        let slots = claim(&mut state, 2);
        on_request(&mut state, slots[0], EXCLUSIVE).unwrap();

        let outcome = on_request(&mut state, slots[1], EXCLUSIVE).unwrap();

        assert_eq!(outcome, RequestOutcome::Blocked);
        assert_eq!(state.table.state(slots[1]).unwrap(), SlotState::Blocked(EXCLUSIVE));
        assert_eq!(state.table.allocated(slots[1], EXCLUSIVE), 0);
    }

    #[test]
    fn test_release_wakes_single_exclusive_waiter() {
        let mut state = state(3);
        let slots = claim(&mut state, 3);
        on_request(&mut state, slots[0], EXCLUSIVE).unwrap();
        on_request(&mut state, slots[1], EXCLUSIVE).unwrap();
        on_request(&mut state, slots[2], EXCLUSIVE).unwrap();

        let woken = on_release(&mut state, slots[0], EXCLUSIVE).unwrap();

        assert_eq!(woken, 1);
        assert_eq!(state.table.total_allocated(EXCLUSIVE), 1);
        let still_blocked = state
            .table
            .slots_in(|s| matches!(s, SlotState::Blocked(_)))
            .count();
        assert_eq!(still_blocked, 1);
        assert!(state.table.invariant_violation().is_none());
    }

    #[test]
    fn test_wake_up_never_exceeds_shareable_limit() {
        let mut state = state(6);
        let slots = claim(&mut state, 6);
        for slot in &slots[..3] {
            on_request(&mut state, *slot, SHARED).unwrap();
        }
        for slot in &slots[3..] {
            assert_eq!(on_request(&mut state, *slot, SHARED).unwrap(), RequestOutcome::Blocked);
        }

        let woken = on_release(&mut state, slots[0], SHARED).unwrap();

        assert_eq!(woken, 1);
        assert_eq!(state.table.total_allocated(SHARED), 3);
        assert!(state.table.invariant_violation().is_none());
    }

    #[test]
    fn test_terminate_reclaims_and_wakes() {
        let mut state = state(2);
        let slots = claim(&mut state, 2);
        on_request(&mut state, slots[0], EXCLUSIVE).unwrap();
        on_request(&mut state, slots[0], SHARED).unwrap();
        on_request(&mut state, slots[1], EXCLUSIVE).unwrap();

        let link = on_terminate(&mut state, slots[0]).unwrap();

        assert!(link.is_none());
        assert_eq!(state.table.state(slots[0]).unwrap(), SlotState::NotStarted);
        assert_eq!(state.table.total_allocated(SHARED), 0);
        assert_eq!(state.table.state(slots[1]).unwrap(), SlotState::Active);
        assert_eq!(state.table.allocated(slots[1], EXCLUSIVE), 1);
    }

    #[test]
    fn test_terminated_blocked_slot_is_not_woken() {
        let mut state = state(2);
        let slots = claim(&mut state, 2);
        on_request(&mut state, slots[0], EXCLUSIVE).unwrap();
        on_request(&mut state, slots[1], EXCLUSIVE).unwrap();
        on_request(&mut state, slots[0], SHARED).unwrap();

        on_terminate(&mut state, slots[1]).unwrap();

        assert_eq!(state.table.state(slots[1]).unwrap(), SlotState::NotStarted);
        assert_eq!(state.table.total_allocated(EXCLUSIVE), 1);
    }

    #[test]
    fn test_idle_changes_nothing() {
        let mut state = state(1);
        let a = claim(&mut state, 1)[0];
        let before = state.now();
        on_idle(a);
        assert_eq!(state.now(), before);
        assert_eq!(state.table.state(a).unwrap(), SlotState::Active);
    }
}
