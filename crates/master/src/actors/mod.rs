//! Worker actors.
//!
//! Each live slot hosts one `ractor` actor. The coordinator talks to it
//! through the actor mailbox (`ToWorker`) and hears back on a bounded
//! channel of raw frames, one reply per `PROCESS`.

pub mod user;

use std::fmt;

use ractor::ActorRef;
use ractor::concurrency::JoinHandle;
use resmgr_core::{SlotId, ToWorker, WireMessage};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub use user::{UserActorDef, UserArguments, UserState};

/// Capacity of each worker to coordinator channel.
pub const REPLY_CAPACITY: usize = 4;

/// The coordinator's handles on one running worker.
pub struct WorkerLink {
    pub actor: ActorRef<ToWorker>,
    pub replies: mpsc::Receiver<WireMessage>,
    handle: JoinHandle<()>,
}

impl WorkerLink {
    #[must_use]
    pub const fn new(
        actor: ActorRef<ToWorker>,
        replies: mpsc::Receiver<WireMessage>,
        handle: JoinHandle<()>,
    ) -> Self {
        Self {
            actor,
            replies,
            handle,
        }
    }

    /// Close both endpoints and wait for the actor to exit.
    pub async fn close(self, slot: SlotId) {
        let Self {
            actor,
            mut replies,
            handle,
        } = self;
        replies.close();
        actor.stop(None);
        if let Err(e) = handle.await {
            warn!(slot = %slot, error = %e, "worker exited abnormally");
        } else {
            debug!(slot = %slot, "worker reaped");
        }
    }
}

impl fmt::Debug for WorkerLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerLink")
            .field("actor", &self.actor.get_id())
            .field("pending_replies", &self.replies.len())
            .finish_non_exhaustive()
    }
}
