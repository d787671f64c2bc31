//! # resmgr master
//!
//! The coordinator of a single-node resource manager simulation. It owns
//! the process/resource table and the virtual clock, grants and reclaims
//! typed resources for a bounded set of worker actors, detects circular
//! waits and recovers by killing a victim.
//!
//! # Architecture
//!
//! - [`table`]: slots and resource kinds, with invariant-preserving mutators
//! - [`protocol`]: request, release, wake-up and termination handling
//! - [`deadlock`]: wait-for graph walk and victim recovery
//! - [`lifecycle`]: launching and reaping worker actors
//! - [`scheduler`]: the tick loop tying them together
//! - [`shutdown`]: signal, timer and programmatic stop
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use resmgr_master::{Master, MasterConfig, ShutdownCoordinator, arm_run_timer};
//!
//! let shutdown = Arc::new(ShutdownCoordinator::new());
//! let config = MasterConfig::default().seed(7);
//! let _timer = arm_run_timer(Arc::clone(&shutdown), config.max_run_time);
//! let stats = Master::new(config, shutdown)?.run().await?;
//! println!("granted {}", stats.grants);
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod actors;
pub mod config;
pub mod deadlock;
pub mod error;
pub mod lifecycle;
pub mod protocol;
pub mod scheduler;
pub mod shutdown;
pub mod state;
pub mod table;

pub use config::{MasterConfig, WorkerPolicy};
pub use deadlock::{DetectionReport, detect_and_recover, find_victim};
pub use error::{MasterError, Result};
pub use lifecycle::{ExitReason, Launcher};
pub use protocol::RequestOutcome;
pub use scheduler::{Master, TickReport};
pub use shutdown::{
    ShutdownCoordinator, ShutdownPhase, ShutdownSignal, arm_run_timer, install_signal_handlers,
};
pub use state::{Cost, RunStats, SimState};
pub use table::{ProcessTable, ResourceInfo, SlotState, TableSnapshot};
