//! Coordinator-owned simulation state and run counters.
//!
//! [`SimState`] is the single writable aggregate: the table, the clock and
//! the random source. Every protocol and detector operation borrows it
//! mutably, so no other component can hold a second writer.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use resmgr_core::{VirtualClock, VirtualTime};
use serde::{Deserialize, Serialize};

use crate::config::MasterConfig;
use crate::table::ProcessTable;

/// A bounded random virtual-time cost, in ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cost {
    min: u64,
    max: u64,
}

impl Cost {
    /// Uniform cost in `min..=max`.
    #[must_use]
    pub const fn between(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    /// Constant cost.
    #[must_use]
    pub const fn fixed(ticks: u64) -> Self {
        Self {
            min: ticks,
            max: ticks,
        }
    }

    fn sample<R: Rng + ?Sized>(self, rng: &mut R) -> u64 {
        if self.min >= self.max {
            self.min
        } else {
            rng.gen_range(self.min..=self.max)
        }
    }
}

/// Virtual-time costs of each simulated action.
pub mod costs {
    use super::Cost;

    /// Blocking a requester.
    pub const BLOCK: Cost = Cost::between(10, 50);
    /// Granting one unit.
    pub const GRANT: Cost = Cost::between(1, 10);
    /// Waking a blocked slot.
    pub const WAKE: Cost = Cost::between(1, 50);
    /// One worker turn in the service pass.
    pub const TURN: Cost = Cost::between(1, 10);
    /// Start and end of a detection run, and each recovery.
    pub const DETECTION: Cost = Cost::between(50, 100);
    /// End of every scheduling tick.
    pub const TICK: Cost = Cost::between(10, 50);
    /// Fast-forward when no slot was active during a tick.
    pub const IDLE_ADVANCE: Cost = Cost::fixed(10_000);
}

/// Aggregate counters reported when the run stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// Units granted, immediately or on wake-up.
    pub grants: u64,
    /// Workers that exited with `RELEASE_ALL_AND_TERMINATE`.
    pub normal_terminations: u64,
    /// Workers killed to break a deadlock.
    pub deadlock_kills: u64,
    /// Scheduled detection runs.
    pub detection_runs: u64,
    /// Workers launched.
    pub spawned: u64,
    /// Virtual time when the run stopped.
    pub final_time: VirtualTime,
}

/// Snapshot cadence, in grants.
pub const SNAPSHOT_EVERY: u64 = 20;

/// The coordinator's writable state.
#[derive(Debug)]
pub struct SimState {
    pub table: ProcessTable,
    pub clock: VirtualClock,
    pub rng: StdRng,
    pub stats: RunStats,
}

impl SimState {
    /// Wrap an existing table with a clock at zero.
    #[must_use]
    pub fn new(table: ProcessTable, rng: StdRng) -> Self {
        Self {
            table,
            clock: VirtualClock::new(),
            rng,
            stats: RunStats::default(),
        }
    }

    /// Draw a fresh table from `config`, seeded when the config carries a seed.
    #[must_use]
    pub fn from_config(config: &MasterConfig) -> Self {
        let mut rng = config
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        let table = ProcessTable::random(config, &mut rng);
        Self::new(table, rng)
    }

    /// Current virtual time.
    #[must_use]
    pub const fn now(&self) -> VirtualTime {
        self.clock.now()
    }

    /// Advance the clock by a sampled cost.
    pub fn charge(&mut self, cost: Cost) -> VirtualTime {
        let ticks = cost.sample(&mut self.rng);
        self.clock.advance(ticks)
    }
}
