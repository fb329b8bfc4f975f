//! Simulated time and identifier types.
//!
//! This module defines strong types for values that would otherwise all be bare integers:
//! 1. **Ticks:** Simulated time as seen by the engine's global clock (1 tick = 1 ps).
//! 2. **Nodes:** Index of a simulated machine within an experiment.
//! 3. **Event queues:** Logical engine event queue a simulated core is bound to.

use std::fmt;
use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

/// Engine ticks per simulated second (1 THz global clock).
pub const TICKS_PER_SECOND: u64 = 1_000_000_000_000;

/// A point in (or span of) simulated time, measured in engine ticks.
///
/// Ticks never go backwards on a single machine; subtraction saturates at zero so a
/// stale timestamp can never produce a wrapped, enormous span.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Tick(pub u64);

impl Tick {
    /// The origin of simulated time.
    pub const ZERO: Self = Self(0);

    /// Creates a tick value from a raw count.
    #[inline]
    pub const fn new(ticks: u64) -> Self {
        Self(ticks)
    }

    /// Returns the raw tick count.
    #[inline]
    pub const fn val(self) -> u64 {
        self.0
    }

    /// Span of `us` simulated microseconds.
    pub const fn from_micros(us: u64) -> Self {
        Self(us * (TICKS_PER_SECOND / 1_000_000))
    }

    /// Span of `ms` simulated milliseconds.
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms * (TICKS_PER_SECOND / 1_000))
    }

    /// Returns the span in simulated microseconds (truncating).
    pub const fn as_micros(self) -> u64 {
        self.0 / (TICKS_PER_SECOND / 1_000_000)
    }

    /// Adds `rhs`, saturating at `u64::MAX`.
    #[inline]
    pub const fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl Add for Tick {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        self.saturating_add(rhs)
    }
}

impl Sub for Tick {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a simulated machine within an experiment.
///
/// Single-node experiments only ever use [`NodeId::PRIMARY`]; the dual-node
/// synchronizer uses `PRIMARY` for the system under test and [`NodeId::DRIVER`] for
/// the load-generating peer.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(pub usize);

impl NodeId {
    /// The system under test.
    pub const PRIMARY: Self = Self(0);
    /// The driving peer in a dual-node experiment.
    pub const DRIVER: Self = Self(1);

    /// Returns the other node of a two-machine pair.
    pub const fn peer(self) -> Self {
        if self.0 == 0 { Self::DRIVER } else { Self::PRIMARY }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node{}", self.0)
    }
}

/// Logical engine event queue.
///
/// Queue 0 carries every shared (non-core) object; each simulated core gets a queue of
/// its own so the engine may advance cores on separate host threads between
/// synchronization points.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct EventQueueId(pub u32);

impl EventQueueId {
    /// Queue shared by devices, memory and interconnect.
    pub const SHARED: Self = Self(0);
}
