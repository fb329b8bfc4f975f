//! Experiment phases and the transition table.
//!
//! [`action`] is a pure function of the current phase and the milestone a signal
//! carries. It decides what the controller should do but performs nothing itself, so
//! the whole table can be tested without an engine.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::signal::Milestone;
use crate::stats::FailReason;

/// Lifecycle stage of one machine's experiment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ExperimentPhase {
    /// Guest kernel booting.
    Booting,
    /// Waiting for the function container to start.
    ContainerStarting,
    /// Waiting for the container to be pinned.
    ContainerPinned,
    /// Warm-up invocations.
    Warming,
    /// Measured invocations.
    Measuring,
    /// Waiting for the container to stop.
    ContainerStopping,
    /// Finished successfully.
    Done,
    /// Aborted; statistics must not be trusted.
    Failed,
}

impl ExperimentPhase {
    /// The order a successful run visits every phase in.
    pub const SUCCESS_PATH: [Self; 7] = [
        Self::Booting,
        Self::ContainerStarting,
        Self::ContainerPinned,
        Self::Warming,
        Self::Measuring,
        Self::ContainerStopping,
        Self::Done,
    ];

    /// Whether no further transitions are possible.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for ExperimentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Why a signal was ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Anomaly {
    /// Unknown cause or code.
    Unknown,
    /// Setup milestone for a phase already passed.
    Stale,
    /// Milestone that has no meaning in the current phase.
    OutOfPhase,
    /// Any signal after `Done` or `Failed`.
    Late,
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "unknown signal",
            Self::Stale => "stale milestone",
            Self::OutOfPhase => "milestone out of phase",
            Self::Late => "signal after terminal phase",
        })
    }
}

/// What the controller does with one signal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// Regular transition to the next phase.
    Enter(ExperimentPhase),
    /// Out-of-order milestone; jump forward to the phase it implies.
    Resync(ExperimentPhase),
    /// Invocation began.
    Begin(u64),
    /// Invocation ended.
    End(u64),
    /// The guest's own end-of-phase marker (warm-done in `Warming`, measure-done in
    /// `Measuring`).
    PhaseMarker,
    /// Move to `Failed`.
    Abort(FailReason),
    /// Log and count, no state change.
    Ignore(Anomaly),
    /// Known informational marker; log only.
    Info,
}

/// Looks up the action for `milestone` observed in `phase`.
pub const fn action(phase: ExperimentPhase, milestone: Milestone) -> Action {
    use ExperimentPhase as P;
    use Milestone as M;

    if phase.is_terminal() {
        return Action::Ignore(Anomaly::Late);
    }
    match (phase, milestone) {
        (_, M::UserInterrupt) => Action::Abort(FailReason::UserInterrupt),
        (_, M::Unrecognised) => Action::Ignore(Anomaly::Unknown),
        (_, M::Info(_)) => Action::Info,

        (P::Booting, M::BootComplete) => Action::Enter(P::ContainerStarting),
        (P::ContainerStarting, M::ContainerStarted) => Action::Enter(P::ContainerPinned),
        (P::ContainerPinned, M::ContainerPinned) => Action::Enter(P::Warming),
        (P::Booting, M::ContainerStarted) => Action::Resync(P::ContainerPinned),
        (P::Booting | P::ContainerStarting, M::ContainerPinned) => Action::Resync(P::Warming),
        (_, M::BootComplete | M::ContainerStarted | M::ContainerPinned) => {
            Action::Ignore(Anomaly::Stale)
        }

        (P::Warming | P::Measuring, M::WorkBegin(id)) => Action::Begin(id),
        (P::Warming | P::Measuring, M::WorkEnd(id)) => Action::End(id),
        (P::Warming, M::WarmDone) | (P::Measuring, M::MeasureDone) => Action::PhaseMarker,
        // Trailing guest marker after the budget already closed the phase.
        (P::Measuring, M::WarmDone) | (P::ContainerStopping, M::MeasureDone) => Action::Info,

        (P::ContainerStopping, M::ContainerStopped) => Action::Enter(P::Done),
        (P::ContainerStopping, M::TestDone) => Action::Resync(P::Done),
        (_, M::TestDone) => Action::Abort(FailReason::IncompleteMeasurement),

        _ => Action::Ignore(Anomaly::OutOfPhase),
    }
}
