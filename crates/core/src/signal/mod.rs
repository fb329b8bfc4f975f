//! Guest signal vocabulary.
//!
//! The simulation engine stops and hands control back to the orchestrator whenever the
//! guest executes a magic instruction. This module gives those stops a typed shape:
//! 1. **Signals:** [`Signal`] pairs a [`SignalKind`] with the raw code and the tick it fired at.
//! 2. **Guest codes:** [`GuestCode`] names every `m5 fail <code>` value the run-scripts emit.
//! 3. **Milestones:** [`Milestone`] is the phase-relevant meaning the controller dispatches on.
//! 4. **Codec:** [`codec`] converts engine exit events to signals and back.
//! 5. **Protocol:** [`protocol`] documents and monitors the ordered guest-side sequence.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::Tick;

/// Engine exit event to signal conversion.
pub mod codec;

/// Guest-side script contract and ordering monitor.
pub mod protocol;

pub use codec::{WORK_ITEM_ID_OFFSET, decode, encode};
pub use protocol::{GuestProtocol, ProtocolMonitor, ProtocolViolation, Stage};

/// Category of an engine stop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    /// `m5 exit`: the guest asked the simulator to stop.
    Exit,
    /// `m5 fail <code>`: a numbered workflow marker.
    Fail,
    /// `m5 workbegin <id>`: an instrumented invocation starts.
    WorkBegin,
    /// `m5 workend <id>`: an instrumented invocation finished.
    WorkEnd,
    /// The operator interrupted the simulator (SIGINT).
    UserInterrupt,
    /// Any cause the codec does not recognise.
    Unknown,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Exit => "exit",
            Self::Fail => "fail",
            Self::WorkBegin => "workbegin",
            Self::WorkEnd => "workend",
            Self::UserInterrupt => "interrupt",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A discrete event emitted by the simulation engine.
///
/// Signals are immutable once decoded; the controller only ever reads them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    kind: SignalKind,
    code: i64,
    tick: Tick,
}

impl Signal {
    /// Creates a signal of `kind` carrying `code`, observed at `tick`.
    pub const fn new(kind: SignalKind, code: i64, tick: Tick) -> Self {
        Self { kind, code, tick }
    }

    /// Shorthand for an `m5 fail` marker.
    pub const fn fail(code: GuestCode, tick: Tick) -> Self {
        Self::new(SignalKind::Fail, code.code(), tick)
    }

    /// Shorthand for a work-item begin with an already de-offset id.
    pub const fn work_begin(id: u64, tick: Tick) -> Self {
        Self::new(SignalKind::WorkBegin, id as i64, tick)
    }

    /// Shorthand for a work-item end with an already de-offset id.
    pub const fn work_end(id: u64, tick: Tick) -> Self {
        Self::new(SignalKind::WorkEnd, id as i64, tick)
    }

    /// Signal category.
    pub const fn kind(&self) -> SignalKind {
        self.kind
    }

    /// Raw code. For work items this is the invocation id with the guest offset removed.
    pub const fn code(&self) -> i64 {
        self.code
    }

    /// Simulated time the engine stopped at.
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// Interprets the signal in terms of experiment progress.
    pub fn milestone(&self) -> Milestone {
        match self.kind {
            SignalKind::Exit => Milestone::BootComplete,
            SignalKind::Fail => match GuestCode::from_code(self.code) {
                Some(GuestCode::BootComplete) => Milestone::BootComplete,
                Some(GuestCode::ContainerStarted) => Milestone::ContainerStarted,
                Some(GuestCode::ContainerPinned) => Milestone::ContainerPinned,
                Some(GuestCode::WarmStop | GuestCode::WarmingDone) => Milestone::WarmDone,
                Some(GuestCode::ClientStopped) => Milestone::MeasureDone,
                Some(GuestCode::ContainerStopped) => Milestone::ContainerStopped,
                Some(GuestCode::TestDone) => Milestone::TestDone,
                Some(info) => Milestone::Info(info),
                None => Milestone::Unrecognised,
            },
            SignalKind::WorkBegin => Milestone::WorkBegin(self.code.max(0) as u64),
            SignalKind::WorkEnd => Milestone::WorkEnd(self.code.max(0) as u64),
            SignalKind::UserInterrupt => Milestone::UserInterrupt,
            SignalKind::Unknown => Milestone::Unrecognised,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}) @ {}", self.kind, self.code, self.tick)
    }
}

/// Numbered workflow markers emitted by the guest run-scripts (`m5 fail <code>`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GuestCode {
    /// 1: the guest finished booting.
    BootComplete,
    /// 2: the workload container is up.
    ContainerStarted,
    /// 3: the container is pinned to its core.
    ContainerPinned,
    /// 4: legacy warming-done marker; treated like [`GuestCode::WarmStop`].
    WarmingDone,
    /// 6: the container was torn down.
    ContainerStopped,
    /// 10: the load-generating client starts.
    ClientStarted,
    /// 11: the client finished all measured invocations.
    ClientStopped,
    /// 20: the client connected to the function.
    ConnectionEstablished,
    /// 21: a request was sent.
    SendRequest,
    /// 22: a response was received.
    RecvResponse,
    /// 31: the client starts its warming requests.
    WarmStart,
    /// 32: the client finished its warming requests.
    WarmStop,
    /// -1: the run-script is done; the simulation may exit.
    TestDone,
}

impl GuestCode {
    /// Every known code, in protocol order.
    pub const ALL: [Self; 13] = [
        Self::BootComplete,
        Self::ContainerStarted,
        Self::ContainerPinned,
        Self::ClientStarted,
        Self::ConnectionEstablished,
        Self::WarmStart,
        Self::WarmStop,
        Self::WarmingDone,
        Self::SendRequest,
        Self::RecvResponse,
        Self::ClientStopped,
        Self::ContainerStopped,
        Self::TestDone,
    ];

    /// The integer the guest passes to `m5 fail`.
    pub const fn code(self) -> i64 {
        match self {
            Self::BootComplete => 1,
            Self::ContainerStarted => 2,
            Self::ContainerPinned => 3,
            Self::WarmingDone => 4,
            Self::ContainerStopped => 6,
            Self::ClientStarted => 10,
            Self::ClientStopped => 11,
            Self::ConnectionEstablished => 20,
            Self::SendRequest => 21,
            Self::RecvResponse => 22,
            Self::WarmStart => 31,
            Self::WarmStop => 32,
            Self::TestDone => -1,
        }
    }

    /// Looks up a raw `m5 fail` code.
    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }

    /// Human-readable label used in logs and rendered scripts.
    pub const fn description(self) -> &'static str {
        match self {
            Self::BootComplete => "BOOTING complete",
            Self::ContainerStarted => "Started container",
            Self::ContainerPinned => "Pinned container",
            Self::WarmingDone => "Warming done",
            Self::ContainerStopped => "Container stop",
            Self::ClientStarted => "Start client",
            Self::ClientStopped => "Stop client",
            Self::ConnectionEstablished => "Connection established",
            Self::SendRequest => "Send request  ->",
            Self::RecvResponse => "Recv response <-",
            Self::WarmStart => "Start warming",
            Self::WarmStop => "Stop warming",
            Self::TestDone => "Test done",
        }
    }
}

impl fmt::Display for GuestCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.description())
    }
}

/// What a signal means for experiment progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Milestone {
    /// Boot finished (`m5 exit` or code 1).
    BootComplete,
    /// Container started (code 2).
    ContainerStarted,
    /// Container pinned (code 3).
    ContainerPinned,
    /// Guest-side warming finished (code 32, legacy 4).
    WarmDone,
    /// Guest-side measurement finished (code 11).
    MeasureDone,
    /// Container stopped (code 6).
    ContainerStopped,
    /// Run-script finished (code -1).
    TestDone,
    /// A known marker with no effect on the phase.
    Info(GuestCode),
    /// Instrumented invocation `id` started.
    WorkBegin(u64),
    /// Instrumented invocation `id` finished.
    WorkEnd(u64),
    /// Operator interrupt.
    UserInterrupt,
    /// Unknown cause or unknown fail code.
    Unrecognised,
}
