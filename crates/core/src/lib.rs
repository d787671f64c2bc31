//! # resmgr core
//!
//! Leaf types shared by the coordinator and its workers: errors, the
//! virtual clock, the wait queue, identifiers and the message vocabulary.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod clock;
pub mod error;
pub mod ids;
pub mod messages;
pub mod queue;
pub mod result;

pub use clock::{TICKS_PER_SEC, VirtualClock, VirtualTime};
pub use error::Error;
pub use ids::{ResourceId, SlotId};
pub use messages::{MessageKind, NO_RESOURCE, ToMaster, ToWorker, WireMessage};
pub use queue::WaitQueue;
pub use result::{Result, ResultExt};
