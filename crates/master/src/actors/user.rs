#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use resmgr_core::{ResourceId, SlotId, ToMaster, ToWorker, VirtualTime, WireMessage};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::WorkerPolicy;
use crate::table::ResourceInfo;

/// Everything a user worker needs at launch.
#[derive(Clone)]
pub struct UserArguments {
    pub slot: SlotId,
    pub policy: WorkerPolicy,
    /// Read-only view of the coordinator's clock.
    pub clock: watch::Receiver<VirtualTime>,
    /// Read-only resource descriptors.
    pub resources: Arc<[ResourceInfo]>,
    /// Worker to coordinator endpoint.
    pub replies: mpsc::Sender<WireMessage>,
    pub seed: u64,
}

impl std::fmt::Debug for UserArguments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserArguments")
            .field("slot", &self.slot)
            .field("policy", &self.policy)
            .field("resources", &self.resources.len())
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

/// Decision state of one user worker.
///
/// Held counts mirror what the coordinator granted: incremented on
/// `ALLOCATE`, decremented when the worker sends `RELEASE`.
#[derive(Debug)]
pub struct UserState {
    slot: SlotId,
    policy: WorkerPolicy,
    resources: Arc<[ResourceInfo]>,
    rng: StdRng,
    held: Vec<u32>,
    terminate_at: VirtualTime,
    act_at: VirtualTime,
}

impl UserState {
    /// Fresh state for a worker launched at `now`.
    #[must_use]
    pub fn new(
        slot: SlotId,
        policy: WorkerPolicy,
        resources: Arc<[ResourceInfo]>,
        seed: u64,
        now: VirtualTime,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let first_action = rng.gen_range(0..policy.action_interval);
        let held = vec![0; resources.len()];
        Self {
            slot,
            policy,
            resources,
            rng,
            held,
            terminate_at: now.advanced(policy.terminate_after),
            act_at: now.advanced(first_action),
        }
    }

    /// Units of `res` this worker believes it holds.
    #[must_use]
    pub fn held(&self, res: ResourceId) -> u32 {
        self.held.get(res.index()).copied().unwrap_or(0)
    }

    /// Record a grant.
    pub fn on_allocate(&mut self, res: ResourceId) {
        if let Some(units) = self.held.get_mut(res.index()) {
            *units = units.saturating_add(1);
        }
    }

    /// Choose the reply to one `PROCESS` turn.
    pub fn decide(&mut self, now: VirtualTime) -> ToMaster {
        if now >= self.terminate_at {
            let jitter = self.rng.gen_range(0..self.policy.terminate_jitter);
            self.terminate_at = self.terminate_at.advanced(jitter);
            if self.rng.gen_range(0..100) < self.policy.terminate_percent {
                return ToMaster::ReleaseAllAndTerminate;
            }
            return ToMaster::Idle;
        }

        if now >= self.act_at {
            let msg = if self.rng.gen_bool(0.5) {
                self.pick_request()
            } else {
                self.pick_release().or_else(|| self.pick_request())
            };
            let gap = self.rng.gen_range(0..self.policy.action_interval);
            self.act_at = self.act_at.advanced(gap);
            return msg.unwrap_or(ToMaster::Idle);
        }

        ToMaster::Idle
    }

    /// A random resource held below its limit.
    fn pick_request(&mut self) -> Option<ToMaster> {
        let candidates: Vec<usize> = self
            .resources
            .iter()
            .zip(&self.held)
            .enumerate()
            .filter(|(_, (info, held))| **held < info.limit)
            .map(|(index, _)| index)
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let pick = candidates.get(self.rng.gen_range(0..candidates.len()))?;
        Some(ToMaster::Request(ResourceId::new(*pick)))
    }

    /// A random held resource, forgotten locally as it is sent.
    fn pick_release(&mut self) -> Option<ToMaster> {
        let candidates: Vec<usize> = self
            .held
            .iter()
            .enumerate()
            .filter(|(_, held)| **held > 0)
            .map(|(index, _)| index)
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let pick = *candidates.get(self.rng.gen_range(0..candidates.len()))?;
        let units = self.held.get_mut(pick)?;
        *units = units.saturating_sub(1);
        Some(ToMaster::Release(ResourceId::new(pick)))
    }
}

/// Running state of the actor: decision state plus its endpoints.
pub struct UserActorState {
    decisions: UserState,
    clock: watch::Receiver<VirtualTime>,
    replies: mpsc::Sender<WireMessage>,
}

/// A user worker: waits for `PROCESS`, answers with exactly one message.
#[derive(Clone, Copy, Default)]
pub struct UserActorDef;

impl Actor for UserActorDef {
    type Msg = ToWorker;
    type State = UserActorState;
    type Arguments = UserArguments;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let now = *args.clock.borrow();
        debug!(slot = %args.slot, at = %now, "user worker starting");
        Ok(UserActorState {
            decisions: UserState::new(args.slot, args.policy, args.resources, args.seed, now),
            clock: args.clock,
            replies: args.replies,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            ToWorker::Process => {
                let now = *state.clock.borrow();
                let reply = state.decisions.decide(now);
                let slot = state.decisions.slot;
                debug!(slot = %slot, reply = %reply, "user worker replying");

                if state.replies.send(WireMessage::from(reply)).await.is_err() {
                    warn!(slot = %slot, "coordinator endpoint closed, stopping");
                    myself.stop(None);
                    return Ok(());
                }
                if reply == ToMaster::ReleaseAllAndTerminate {
                    info!(slot = %slot, "user worker exiting");
                    myself.stop(Some("terminated".to_string()));
                }
            }
            ToWorker::Allocate(res) => {
                state.decisions.on_allocate(res);
            }
        }
        Ok(())
    }
}
