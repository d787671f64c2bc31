//! Worker lifecycle: launching into a free slot and tearing down.

use std::fmt;
use std::sync::Arc;

use ractor::Actor;
use rand::RngCore;
use resmgr_core::{SlotId, VirtualTime};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::actors::{REPLY_CAPACITY, UserActorDef, UserArguments, WorkerLink};
use crate::config::WorkerPolicy;
use crate::error::{MasterError, Result};
use crate::protocol;
use crate::state::SimState;
use crate::table::{ResourceInfo, SlotState};

/// Why a worker left its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The worker sent `RELEASE_ALL_AND_TERMINATE`.
    Normal,
    /// The deadlock detector chose it as victim.
    Killed,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Killed => write!(f, "killed"),
        }
    }
}

/// Launches user workers with shared read-only views of the clock and
/// the resource descriptors.
#[derive(Debug, Clone)]
pub struct Launcher {
    clock: watch::Receiver<VirtualTime>,
    resources: Arc<[ResourceInfo]>,
    policy: WorkerPolicy,
    max_workers: usize,
}

impl Launcher {
    #[must_use]
    pub const fn new(
        clock: watch::Receiver<VirtualTime>,
        resources: Arc<[ResourceInfo]>,
        policy: WorkerPolicy,
        max_workers: usize,
    ) -> Self {
        Self {
            clock,
            resources,
            policy,
            max_workers,
        }
    }

    /// Launch a worker into the lowest free slot.
    ///
    /// Returns `None` when the live-worker cap is reached or no slot is free.
    ///
    /// # Errors
    ///
    /// Returns [`MasterError::SpawnFailed`] if the actor cannot start; the
    /// slot is released again.
    pub async fn spawn(&self, state: &mut SimState) -> Result<Option<SlotId>> {
        let live = state.table.live_workers();
        if live >= self.max_workers {
            debug!(live, cap = self.max_workers, "worker cap reached, skipping spawn");
            return Ok(None);
        }
        let Some(slot) = state.table.claim_slot() else {
            debug!("no free slot, skipping spawn");
            return Ok(None);
        };

        let (replies_tx, replies_rx) = mpsc::channel(REPLY_CAPACITY);
        let args = UserArguments {
            slot,
            policy: self.policy,
            clock: self.clock.clone(),
            resources: Arc::clone(&self.resources),
            replies: replies_tx,
            seed: state.rng.next_u64(),
        };

        match Actor::spawn(None, UserActorDef, args).await {
            Ok((actor, handle)) => {
                state
                    .table
                    .attach_link(slot, WorkerLink::new(actor, replies_rx, handle))?;
                state.stats.spawned = state.stats.spawned.saturating_add(1);
                info!(slot = %slot, at = %state.now(), "spawned worker");
                Ok(Some(slot))
            }
            Err(e) => {
                state.table.free_slot(slot)?;
                Err(MasterError::spawn_failed(slot, e.to_string()))
            }
        }
    }
}

/// Remove the worker in `slot`: reclaim its resources, wake waiters, free
/// the slot, then close its channels and wait for the actor to exit.
///
/// # Errors
///
/// Propagates protocol failures from the reclaim step.
pub async fn terminate(state: &mut SimState, slot: SlotId, reason: ExitReason) -> Result<()> {
    let link = protocol::on_terminate(state, slot)?;
    match reason {
        ExitReason::Normal => {
            state.stats.normal_terminations = state.stats.normal_terminations.saturating_add(1);
            info!(slot = %slot, at = %state.now(), "process terminated normally");
        }
        ExitReason::Killed => {
            state.stats.deadlock_kills = state.stats.deadlock_kills.saturating_add(1);
            warn!(slot = %slot, at = %state.now(), "process killed by deadlock recovery");
        }
    }
    if let Some(link) = link {
        link.close(slot).await;
    }
    Ok(())
}

/// Terminate every live worker. Used on stop and after a fatal error, so
/// failures are logged rather than returned.
pub async fn terminate_all(state: &mut SimState) {
    let live: Vec<SlotId> = state
        .table
        .slots_in(|s| s != SlotState::NotStarted)
        .collect();
    for slot in live {
        match protocol::on_terminate(state, slot) {
            Ok(Some(link)) => link.close(slot).await,
            Ok(None) => {}
            Err(e) => warn!(slot = %slot, error = %e, "failed to reclaim worker on stop"),
        }
    }
}
