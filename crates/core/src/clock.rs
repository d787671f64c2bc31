//! Virtual clock.
//!
//! Simulated time is a fixed-point `(secs, ticks)` pair with
//! [`TICKS_PER_SEC`] ticks per second. Every simulated action advances the
//! single [`VirtualClock`] owned by the coordinator; nothing can move it
//! backward.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Sub-second resolution of the virtual clock.
pub const TICKS_PER_SEC: u64 = 100_000_000;

/// A point on the virtual timeline.
///
/// `ticks` is always normalised to `< TICKS_PER_SEC`, so the derived
/// ordering (seconds first, then ticks) is the chronological one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VirtualTime {
    secs: u64,
    ticks: u64,
}

impl VirtualTime {
    /// The start of the timeline.
    pub const ZERO: Self = Self { secs: 0, ticks: 0 };

    /// Build a time, carrying excess ticks into seconds.
    #[must_use]
    pub const fn new(secs: u64, ticks: u64) -> Self {
        Self {
            secs: secs.saturating_add(ticks / TICKS_PER_SEC),
            ticks: ticks % TICKS_PER_SEC,
        }
    }

    /// Build a time from a total tick count.
    #[must_use]
    pub const fn from_ticks(total: u64) -> Self {
        Self::new(0, total)
    }

    /// Whole seconds.
    #[must_use]
    pub const fn secs(self) -> u64 {
        self.secs
    }

    /// Sub-second ticks.
    #[must_use]
    pub const fn ticks(self) -> u64 {
        self.ticks
    }

    /// Total ticks since zero, saturating at `u64::MAX`.
    #[must_use]
    pub const fn as_ticks(self) -> u64 {
        self.secs
            .saturating_mul(TICKS_PER_SEC)
            .saturating_add(self.ticks)
    }

    /// This time pushed forward by `ticks`.
    #[must_use]
    pub const fn advanced(self, ticks: u64) -> Self {
        Self::new(self.secs, self.ticks.saturating_add(ticks))
    }

    /// Sum of two times.
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub const fn add(self, other: Self) -> Self {
        Self::new(
            self.secs.saturating_add(other.secs),
            self.ticks.saturating_add(other.ticks),
        )
    }

    /// Difference `self - other`, or zero when `other` is later.
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub const fn sub(self, other: Self) -> Self {
        Self::from_ticks(self.as_ticks().saturating_sub(other.as_ticks()))
    }

    /// Scale this time by a non-negative factor. Negative or NaN factors yield zero.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn scale(self, factor: f64) -> Self {
        if !factor.is_finite() || factor <= 0.0 {
            return Self::ZERO;
        }
        let scaled = (self.as_ticks() as f64) * factor;
        if scaled >= u64::MAX as f64 {
            Self::from_ticks(u64::MAX)
        } else {
            Self::from_ticks(scaled as u64)
        }
    }
}

impl fmt::Display for VirtualTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.secs, self.ticks)
    }
}

/// The coordinator's clock. It only ever moves forward.
#[derive(Debug, Clone, Default)]
pub struct VirtualClock {
    now: VirtualTime,
}

impl VirtualClock {
    /// A clock starting at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            now: VirtualTime::ZERO,
        }
    }

    /// Current virtual time.
    #[must_use]
    pub const fn now(&self) -> VirtualTime {
        self.now
    }

    /// Advance by `ticks` and return the new time.
    pub const fn advance(&mut self, ticks: u64) -> VirtualTime {
        self.now = self.now.advanced(ticks);
        self.now
    }

    /// Whether `instant` has been reached.
    #[must_use]
    pub fn reached(&self, instant: VirtualTime) -> bool {
        instant <= self.now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_advance_carries_into_seconds() {
        let t = VirtualTime::new(0, TICKS_PER_SEC - 5).advanced(10);
        assert_eq!(t.secs(), 1);
        assert_eq!(t.ticks(), 5);
    }

    #[test]
    fn test_add_normalises() {
        let a = VirtualTime::new(1, 60_000_000);
        let b = VirtualTime::new(2, 50_000_000);
        assert_eq!(a.add(b), VirtualTime::new(4, 10_000_000));
    }

    #[test]
    fn test_add_exact_second_boundary() {
        let a = VirtualTime::new(0, 50_000_000);
        assert_eq!(a.add(a), VirtualTime::new(1, 0));
    }

    #[test]
    fn test_sub_borrows_and_saturates() {
        let a = VirtualTime::new(3, 10);
        let b = VirtualTime::new(1, 20);
        assert_eq!(a.sub(b), VirtualTime::new(1, TICKS_PER_SEC - 10));
        assert_eq!(b.sub(a), VirtualTime::ZERO);
    }

    #[test]
    fn test_scale() {
        let t = VirtualTime::new(3, 0);
        assert_eq!(t.scale(0.5), VirtualTime::new(1, 50_000_000));
        assert_eq!(t.scale(-1.0), VirtualTime::ZERO);
        assert_eq!(t.scale(f64::NAN), VirtualTime::ZERO);
    }

    #[test]
    fn test_ordering_is_chronological() {
        assert!(VirtualTime::new(1, 0) > VirtualTime::new(0, TICKS_PER_SEC - 1));
        assert!(VirtualTime::new(2, 5) < VirtualTime::new(2, 6));
    }

    #[test]
    fn test_display() {
        assert_eq!(VirtualTime::new(4, 1234).to_string(), "4:1234");
    }

    #[test]
    fn test_clock_reached() {
        let mut clock = VirtualClock::new();
        let target = VirtualTime::from_ticks(100);
        assert!(!clock.reached(target));
        clock.advance(100);
        assert!(clock.reached(target));
    }

    proptest! {
        #[test]
        fn prop_clock_never_moves_backward(
            steps in proptest::collection::vec(0u64..2 * TICKS_PER_SEC, 1..64),
        ) {
            let mut clock = VirtualClock::new();
            for step in steps {
                let before = clock.now();
                let after = clock.advance(step);
                prop_assert!(before <= after);
                prop_assert!(after.ticks() < TICKS_PER_SEC);
            }
        }
    }
}
