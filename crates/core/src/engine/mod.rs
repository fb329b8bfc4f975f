//! Narrow interface to the external simulation engine.
//!
//! The orchestrator never models timing itself. Everything it needs from the simulator
//! (running until the guest signals, switching CPU models, statistics control and
//! checkpointing) goes through [`SimEngine`]. The trait is deliberately small so that a
//! real simulator binding, the in-crate [`scripted::ScriptedEngine`] and test mocks are
//! interchangeable.
//!
//! `run` is blocking and not re-entrant: an engine instance is driven by exactly one
//! control loop, which the `&mut self` receivers enforce.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::common::{EventQueueId, NodeId, Tick};
use crate::cores::{CoreKind, CoreState};
use crate::signal::codec::causes;

/// Deterministic replay engine driven by a guest trace.
pub mod scripted;

pub use scripted::{EngineCall, ScriptedEngine, Trace, TraceEntry};

/// A raw stop reported by the engine: cause string, code and the tick it happened at.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Engine cause string, e.g. `"m5_fail instruction encountered"`.
    pub cause: String,
    /// Code attached to the cause (fail code, work-item id, exit status).
    pub code: i64,
    /// Simulated time of the stop.
    pub tick: Tick,
}

impl RawEvent {
    /// Creates an event.
    pub fn new(cause: impl Into<String>, code: i64, tick: Tick) -> Self {
        Self {
            cause: cause.into(),
            code,
            tick,
        }
    }

    /// Event returned when a bounded run reaches its tick limit.
    pub fn limit_reached(tick: Tick) -> Self {
        Self::new(causes::LIMIT_REACHED, 0, tick)
    }

    /// Whether this event only reports that a bounded run hit its limit.
    pub fn is_limit_reached(&self) -> bool {
        self.cause == causes::LIMIT_REACHED
    }
}

/// A network frame crossing the link between two machines.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    /// Sending machine.
    pub src: NodeId,
    /// Receiving machine.
    pub dst: NodeId,
    /// Sender's local tick when the frame left its interface.
    pub sent_at: Tick,
    /// Tick at which the receiver may observe the frame. Set by the link.
    pub deliver_at: Tick,
    /// Frame bytes.
    pub payload: Vec<u8>,
}

/// Failures reported by an engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An operation that requires a live machine was called before `instantiate`/`restore`.
    #[error("engine has not been instantiated")]
    NotInstantiated,
    /// `instantiate` or `restore` was called on a machine that is already running.
    #[error("engine is already instantiated; restoring mid-run is not supported")]
    AlreadyInstantiated,
    /// A switch or query named a core set the machine was built without.
    #[error("core set {0} was never constructed")]
    UnknownCoreSet(CoreKind),
    /// The engine refused a CPU-model switch.
    #[error("switch {from} -> {to} rejected: {reason}")]
    SwitchRejected {
        /// Set that was expected to be active.
        from: CoreKind,
        /// Set that was to be activated.
        to: CoreKind,
        /// Engine's explanation.
        reason: String,
    },
    /// Checkpoint data could not be written or read.
    #[error("checkpoint I/O failed at {path}: {source}")]
    CheckpointIo {
        /// Checkpoint directory or file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Checkpoint data exists but cannot be interpreted.
    #[error("corrupt checkpoint at {path}: {reason}")]
    CorruptCheckpoint {
        /// Checkpoint file.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },
    /// The snapshot was taken from another machine.
    #[error("checkpoint at {path} holds {found}, not {expected}")]
    ForeignCheckpoint {
        /// Snapshot file.
        path: PathBuf,
        /// Machine being restored.
        expected: NodeId,
        /// Machine the snapshot came from.
        found: NodeId,
    },
    /// The guest has nothing left to run (scripted engines only).
    #[error("guest trace exhausted at tick {0}")]
    Exhausted(Tick),
    /// Any other engine-side failure.
    #[error("engine failure: {0}")]
    Backend(String),
}

/// Operations the orchestrator consumes from a simulation engine.
///
/// One instance models one simulated machine.
pub trait SimEngine {
    /// Builds the machine from its configuration with no prior state.
    fn instantiate(&mut self) -> Result<(), EngineError>;

    /// Builds the machine from a checkpoint directory. Only valid before the first `run`.
    fn restore(&mut self, checkpoint: &Path) -> Result<(), EngineError>;

    /// Runs until the guest signals or, when `limit` is given, until the local clock
    /// reaches `limit` (reported via [`RawEvent::limit_reached`]).
    fn run(&mut self, limit: Option<Tick>) -> Result<RawEvent, EngineError>;

    /// Current local simulated time.
    fn cur_tick(&self) -> Tick;

    /// Instructions committed since instantiation, summed over all core sets.
    fn total_instructions(&self) -> u64;

    /// Number of logical hardware threads per core set.
    fn num_cores(&self) -> usize;

    /// State of core `core` in set `kind`; `None` when the set was never constructed.
    fn core_state(&self, kind: CoreKind, core: usize) -> Option<CoreState>;

    /// Hands architectural state from `from` to `to` on every core.
    fn switch_cores(&mut self, from: CoreKind, to: CoreKind) -> Result<(), EngineError>;

    /// Zeroes all statistics counters.
    fn reset_stats(&mut self) -> Result<(), EngineError>;

    /// Writes the statistics accumulated since the last reset.
    fn dump_stats(&mut self) -> Result<(), EngineError>;

    /// Pauses the clock, serializes the whole machine into `dir` and resumes.
    fn save_checkpoint(&mut self, dir: &Path) -> Result<(), EngineError>;

    /// Binds the machine's cores to the given event queues, one per core.
    fn bind_event_queues(&mut self, queues: &[EventQueueId]) -> Result<(), EngineError>;

    /// Advances the local clock to `limit` while the guest is held (barrier wait).
    fn idle_until(&mut self, limit: Tick) -> Result<(), EngineError>;

    /// Frames the machine transmitted since the last call.
    fn take_outbound(&mut self) -> Vec<Packet>;

    /// Hands a frame to the machine's network interface.
    fn deliver(&mut self, packet: Packet) -> Result<(), EngineError>;
}
