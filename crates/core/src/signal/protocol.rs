//! Guest-side script contract.
//!
//! A correctly written run-script emits its markers in one fixed order:
//!
//! ```text
//! boot-complete, container-started, container-pinned, warm-start,
//! N_warm x (workbegin, workend), warm-done,
//! N_measure x (workbegin, workend), measure-done,
//! container-stopped, test-done
//! ```
//!
//! The type system cannot enforce what a guest does, so this module offers two tools:
//! [`GuestProtocol`] generates the canonical sequence (for scripted engines and tests) and
//! [`ProtocolMonitor`] reports ordering violations as they are observed. Violations are
//! diagnostics only; recovering from them is the controller's decision.

use std::fmt;

use thiserror::Error;

use super::{GuestCode, Milestone, Signal, SignalKind};
use crate::common::Tick;

/// Canonical marker sequence for a given invocation budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GuestProtocol {
    /// Instrumented warming invocations.
    pub warm: u64,
    /// Instrumented measured invocations.
    pub measure: u64,
}

impl GuestProtocol {
    /// Creates the contract for `warm` warming and `measure` measured invocations.
    pub const fn new(warm: u64, measure: u64) -> Self {
        Self { warm, measure }
    }

    /// The full ordered signal sequence, all stamped at tick zero.
    ///
    /// Work-item ids count up from zero across the warm and measured invocations, so
    /// the first measured invocation has id `warm`.
    pub fn signals(&self) -> Vec<Signal> {
        let t = Tick::ZERO;
        let mut out = Vec::with_capacity(8 + 2 * (self.warm + self.measure) as usize);
        out.push(Signal::fail(GuestCode::BootComplete, t));
        out.push(Signal::fail(GuestCode::ContainerStarted, t));
        out.push(Signal::fail(GuestCode::ContainerPinned, t));
        out.push(Signal::fail(GuestCode::WarmStart, t));
        for id in 0..self.warm {
            out.push(Signal::work_begin(id, t));
            out.push(Signal::work_end(id, t));
        }
        out.push(Signal::fail(GuestCode::WarmStop, t));
        for id in self.warm..self.warm + self.measure {
            out.push(Signal::work_begin(id, t));
            out.push(Signal::work_end(id, t));
        }
        out.push(Signal::fail(GuestCode::ClientStopped, t));
        out.push(Signal::fail(GuestCode::ContainerStopped, t));
        out.push(Signal::fail(GuestCode::TestDone, t));
        out
    }
}

/// Ordered checkpoints of the guest contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Boot complete.
    Boot,
    /// Container started.
    ContainerStarted,
    /// Container pinned.
    ContainerPinned,
    /// Client began its warming requests.
    WarmStart,
    /// Warming done.
    WarmDone,
    /// Measurement done.
    MeasureDone,
    /// Container stopped.
    ContainerStopped,
    /// Run-script done.
    TestDone,
}

impl Stage {
    /// Stage a milestone marks, if any. Work items and informational codes other than
    /// warm-start carry no stage.
    pub const fn of(milestone: Milestone) -> Option<Self> {
        match milestone {
            Milestone::BootComplete => Some(Self::Boot),
            Milestone::ContainerStarted => Some(Self::ContainerStarted),
            Milestone::ContainerPinned => Some(Self::ContainerPinned),
            Milestone::Info(GuestCode::WarmStart) => Some(Self::WarmStart),
            Milestone::WarmDone => Some(Self::WarmDone),
            Milestone::MeasureDone => Some(Self::MeasureDone),
            Milestone::ContainerStopped => Some(Self::ContainerStopped),
            Milestone::TestDone => Some(Self::TestDone),
            _ => None,
        }
    }

    const fn index(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// An observed ordering violation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    /// A marker for a stage that was already passed.
    #[error("stale marker {got}, already at {current}")]
    Stale {
        /// Stage already reached.
        current: Stage,
        /// Stage of the offending marker.
        got: Stage,
    },
    /// A marker that jumps over one or more stages.
    #[error("marker {got} skips ahead of {expected}")]
    Skipped {
        /// The stage that should have come next.
        expected: Stage,
        /// Stage of the offending marker.
        got: Stage,
    },
}

/// Tracks the last stage seen and flags out-of-order markers.
#[derive(Clone, Debug, Default)]
pub struct ProtocolMonitor {
    last: Option<Stage>,
    violations: u32,
}

impl ProtocolMonitor {
    /// Monitor for a guest starting from scratch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Monitor for a guest restored from a checkpoint taken after `stage`.
    pub fn starting_at(stage: Stage) -> Self {
        Self {
            last: Some(stage),
            violations: 0,
        }
    }

    /// Last stage observed.
    pub const fn last(&self) -> Option<Stage> {
        self.last
    }

    /// Number of violations reported so far.
    pub const fn violations(&self) -> u32 {
        self.violations
    }

    /// Records a signal.
    ///
    /// A marker that skips ahead still advances the monitor (the guest evidently is
    /// further along); a stale marker leaves it where it was.
    pub fn observe(&mut self, signal: &Signal) -> Result<(), ProtocolViolation> {
        if signal.kind() == SignalKind::Unknown {
            return Ok(());
        }
        let Some(got) = Stage::of(signal.milestone()) else {
            return Ok(());
        };

        let result = match self.last {
            Some(current) if got <= current => Err(ProtocolViolation::Stale { current, got }),
            Some(current) if got.index() > current.index() + 1 && !Self::optional_gap(current, got) => {
                Err(ProtocolViolation::Skipped {
                    expected: Self::next(current),
                    got,
                })
            }
            None if got != Stage::Boot => Err(ProtocolViolation::Skipped {
                expected: Stage::Boot,
                got,
            }),
            _ => Ok(()),
        };

        match result {
            Ok(()) => self.last = Some(got),
            Err(ProtocolViolation::Skipped { .. }) => {
                self.violations += 1;
                self.last = Some(got);
            }
            Err(ProtocolViolation::Stale { .. }) => self.violations += 1,
        }
        result
    }

    /// The client only emits warm-start when it performs uninstrumented warming, so
    /// pinned -> warm-done is a legal gap.
    fn optional_gap(current: Stage, got: Stage) -> bool {
        current == Stage::ContainerPinned && got == Stage::WarmDone
    }

    const fn next(stage: Stage) -> Stage {
        match stage {
            Stage::Boot => Stage::ContainerStarted,
            Stage::ContainerStarted => Stage::ContainerPinned,
            Stage::ContainerPinned => Stage::WarmStart,
            Stage::WarmStart => Stage::WarmDone,
            Stage::WarmDone => Stage::MeasureDone,
            Stage::MeasureDone => Stage::ContainerStopped,
            Stage::ContainerStopped | Stage::TestDone => Stage::TestDone,
        }
    }
}
