//! The scheduling loop.
//!
//! One tick spawns a worker when the spawn instant is due, gives every
//! active slot one turn, runs deadlock detection when its instant is due,
//! and charges the per-tick cost. The loop runs until a stop is requested.

use std::sync::Arc;

use rand::Rng;
use resmgr_core::{ResourceId, SlotId, ToMaster, ToWorker, VirtualTime};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::MasterConfig;
use crate::deadlock::{self, DetectionReport};
use crate::error::{MasterError, Result};
use crate::lifecycle::{self, ExitReason, Launcher};
use crate::protocol;
use crate::shutdown::{ShutdownCoordinator, ShutdownSignal};
use crate::state::{RunStats, SimState, costs};
use crate::table::SlotState;

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Slot launched by the spawn check.
    pub spawned: Option<SlotId>,
    /// Active slots given a turn.
    pub served: usize,
    /// Present when detection ran this tick.
    pub detection: Option<DetectionReport>,
}

/// The coordinator: sole owner of the table and the clock.
pub struct Master {
    config: MasterConfig,
    state: SimState,
    launcher: Launcher,
    clock_tx: watch::Sender<VirtualTime>,
    shutdown: Arc<ShutdownCoordinator>,
    next_spawn: VirtualTime,
    next_detection: VirtualTime,
}

impl Master {
    /// Build a coordinator with a freshly drawn table.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: MasterConfig, shutdown: Arc<ShutdownCoordinator>) -> Result<Self> {
        config.validate()?;
        let state = SimState::from_config(&config);
        Ok(Self::with_state(config, state, shutdown))
    }

    /// Build a coordinator around existing state.
    #[must_use]
    pub fn with_state(
        config: MasterConfig,
        state: SimState,
        shutdown: Arc<ShutdownCoordinator>,
    ) -> Self {
        let now = state.now();
        let (clock_tx, clock_rx) = watch::channel(now);
        let resources = Arc::from(state.table.resource_infos());
        let launcher = Launcher::new(clock_rx, resources, config.worker, config.max_workers);
        let next_detection = now.advanced(config.first_detection);
        Self {
            config,
            state,
            launcher,
            clock_tx,
            shutdown,
            next_spawn: now,
            next_detection,
        }
    }

    #[must_use]
    pub const fn state(&self) -> &SimState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut SimState {
        &mut self.state
    }

    /// Counters so far, stamped with the current virtual time.
    #[must_use]
    pub fn stats(&self) -> RunStats {
        let mut stats = self.state.stats;
        stats.final_time = self.state.now();
        stats
    }

    fn publish_clock(&self) {
        self.clock_tx.send_replace(self.state.now());
    }

    /// Run ticks until a stop is requested, then terminate every live
    /// worker. Workers are torn down even when the run fails.
    ///
    /// # Errors
    ///
    /// Returns the fatal error that aborted the run.
    pub async fn run(mut self) -> Result<RunStats> {
        info!(
            slots = self.state.table.slot_count(),
            resources = self.state.table.resource_count(),
            max_workers = self.config.max_workers,
            "coordinator starting"
        );

        let outcome = self.run_loop().await;
        if let Err(e) = &outcome {
            error!(error = %e, "fatal error, tearing down workers");
            self.shutdown.initiate_shutdown(ShutdownSignal::Programmatic).await;
        }

        self.stop_workers().await;
        let stats = self.stats();
        info!(
            grants = stats.grants,
            normal_terminations = stats.normal_terminations,
            deadlock_kills = stats.deadlock_kills,
            detection_runs = stats.detection_runs,
            spawned = stats.spawned,
            at = %stats.final_time,
            "coordinator stopped"
        );
        outcome.map(|()| stats)
    }

    async fn run_loop(&mut self) -> Result<()> {
        while !self.shutdown.is_shutdown_initiated() {
            self.maint().await?;
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    /// Terminate every live worker and mark the shutdown complete.
    pub async fn stop_workers(&mut self) {
        self.shutdown.begin_stopping_workers().await;
        lifecycle::terminate_all(&mut self.state).await;
        self.publish_clock();
        self.shutdown.complete().await;
    }

    /// One scheduling tick.
    ///
    /// # Errors
    ///
    /// Returns protocol, grant and channel failures; all are fatal.
    pub async fn maint(&mut self) -> Result<TickReport> {
        let mut report = TickReport {
            spawned: self.spawn_check().await?,
            ..TickReport::default()
        };

        report.served = self.service_pass().await?;
        if self.shutdown.is_shutdown_initiated() {
            return Ok(report);
        }

        report.detection = self.deadlock_check().await?;

        self.state.charge(costs::TICK);
        if report.served == 0 {
            self.state.charge(costs::IDLE_ADVANCE);
        }
        self.publish_clock();
        Ok(report)
    }

    async fn spawn_check(&mut self) -> Result<Option<SlotId>> {
        if !self.state.clock.reached(self.next_spawn) {
            return Ok(None);
        }

        self.publish_clock();
        let spawned = match self.launcher.spawn(&mut self.state).await {
            Ok(slot) => slot,
            Err(e) if !e.is_fatal() => {
                warn!(error = %e, "spawn failed, retrying at next instant");
                None
            }
            Err(e) => return Err(e),
        };

        let gap = self
            .state
            .rng
            .gen_range(self.config.spawn_interval_min..=self.config.spawn_interval_max);
        self.next_spawn = self.next_spawn.advanced(gap);
        Ok(spawned)
    }

    /// Give every active slot one turn, in slot order. Slots that leave
    /// during the pass are skipped. Stops early if a stop interrupts a wait.
    async fn service_pass(&mut self) -> Result<usize> {
        let mut served = 0_usize;
        for index in 0..self.state.table.slot_count() {
            if self.shutdown.is_shutdown_initiated() {
                return Ok(served);
            }
            let slot = SlotId::new(index);
            if self.state.table.state(slot)? != SlotState::Active {
                continue;
            }
            served = served.saturating_add(1);

            self.publish_clock();
            let Some(msg) = self.exchange(slot).await? else {
                debug!(slot = %slot, "service pass interrupted by stop");
                return Ok(served);
            };
            self.dispatch(slot, msg).await?;
            self.state.charge(costs::TURN);
        }
        Ok(served)
    }

    /// Send `PROCESS` and wait for the single reply. `None` means the wait
    /// was cut short by a stop request.
    ///
    /// A slot without a worker, as in table-only setups, takes an idle turn.
    async fn exchange(&mut self, slot: SlotId) -> Result<Option<ToMaster>> {
        let Some(link) = self.state.table.link_mut(slot) else {
            return Ok(Some(ToMaster::Idle));
        };

        if let Err(e) = link.actor.send_message(ToWorker::Process) {
            if self.shutdown.is_shutdown_initiated() {
                return Ok(None);
            }
            return Err(MasterError::channel_closed(slot, e.to_string()));
        }

        let frame = tokio::select! {
            frame = link.replies.recv() => frame,
            () = self.shutdown.cancelled() => return Ok(None),
        };

        let Some(frame) = frame else {
            if self.shutdown.is_shutdown_initiated() {
                return Ok(None);
            }
            return Err(MasterError::channel_closed(slot, "worker endpoint closed without reply"));
        };

        ToMaster::try_from(frame)
            .map(Some)
            .map_err(|e| MasterError::protocol_violation(slot, e.to_string()))
    }

    fn check_resource(&self, slot: SlotId, res: ResourceId) -> Result<()> {
        if res.index() >= self.state.table.resource_count() {
            return Err(MasterError::protocol_violation(
                slot,
                format!("unknown resource {res}"),
            ));
        }
        Ok(())
    }

    /// Route one worker reply to the allocation protocol.
    ///
    /// # Errors
    ///
    /// Returns a protocol violation for unknown resources or releases of
    /// unheld units, and propagates grant and teardown failures.
    pub async fn dispatch(&mut self, slot: SlotId, msg: ToMaster) -> Result<()> {
        match msg {
            ToMaster::Request(res) => {
                self.check_resource(slot, res)?;
                info!(slot = %slot, resource = %res, at = %self.state.now(), "request received");
                protocol::on_request(&mut self.state, slot, res)?;
            }
            ToMaster::Release(res) => {
                self.check_resource(slot, res)?;
                info!(slot = %slot, resource = %res, at = %self.state.now(), "release received");
                protocol::on_release(&mut self.state, slot, res)?;
            }
            ToMaster::Idle => protocol::on_idle(slot),
            ToMaster::ReleaseAllAndTerminate => {
                lifecycle::terminate(&mut self.state, slot, ExitReason::Normal).await?;
            }
        }
        Ok(())
    }

    async fn deadlock_check(&mut self) -> Result<Option<DetectionReport>> {
        if !self.state.clock.reached(self.next_detection) {
            return Ok(None);
        }
        let report = deadlock::detect_and_recover(&mut self.state).await?;
        self.next_detection = self.next_detection.advanced(self.config.detection_interval);
        Ok(Some(report))
    }
}
