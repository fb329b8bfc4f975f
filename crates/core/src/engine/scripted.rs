//! Deterministic replay engine.
//!
//! [`ScriptedEngine`] stands in for a full-system simulator by replaying a [`Trace`] of
//! guest events. Each entry carries the simulated time the guest spends before emitting
//! it, so bounded runs, quanta and packet timing behave like they would on a real
//! machine. The engine also keeps:
//! 1. **Core sets:** per-core active/switched-out state for the boot, warm and measure sets.
//! 2. **Counters:** a monotone committed-instruction count that survives switches and restores.
//! 3. **Checkpoints:** small JSON snapshots written to the directory the orchestrator chooses.
//! 4. **Call log:** every side-effecting call in order, so tests can assert sequencing.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::{EngineError, Packet, RawEvent, SimEngine};
use crate::common::{EventQueueId, NodeId, Tick};
use crate::cores::{CoreKind, CoreSet, CoreState};
use crate::signal::codec::{self, causes};
use crate::signal::{GuestProtocol, Signal};

/// File name of the machine snapshot inside a checkpoint directory.
pub const SNAPSHOT_FILE: &str = "m5.cpt";

/// Default guest execution rate: one committed instruction per simulated nanosecond.
const TICKS_PER_INST: u64 = 1_000;

/// One step of guest activity.
///
/// `delay` is the simulated time the guest executes before the entry takes effect.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceEntry {
    /// `m5 exit`.
    Exit {
        /// Guest time before the stop.
        #[serde(default)]
        delay: Tick,
    },
    /// `m5 fail <code>`.
    Fail {
        /// Marker code.
        code: i64,
        /// Guest time before the stop.
        #[serde(default)]
        delay: Tick,
    },
    /// `m5 workbegin` for invocation `id` (without the guest's id offset).
    WorkBegin {
        /// Invocation index.
        id: u64,
        /// Guest time before the stop.
        #[serde(default)]
        delay: Tick,
    },
    /// `m5 workend` for invocation `id` (without the guest's id offset).
    WorkEnd {
        /// Invocation index.
        id: u64,
        /// Guest time before the stop.
        #[serde(default)]
        delay: Tick,
    },
    /// Operator interrupt.
    Interrupt {
        /// Guest time before the stop.
        #[serde(default)]
        delay: Tick,
    },
    /// Any engine cause string, passed through verbatim.
    Raw {
        /// Cause string.
        cause: String,
        /// Code.
        #[serde(default)]
        code: i64,
        /// Guest time before the stop.
        #[serde(default)]
        delay: Tick,
    },
    /// A frame leaves the network interface. Does not stop the engine.
    Send {
        /// Frame bytes.
        #[serde(default)]
        payload: Vec<u8>,
        /// Guest time before transmission.
        #[serde(default)]
        delay: Tick,
    },
}

impl TraceEntry {
    /// Guest time before this entry.
    pub const fn delay(&self) -> Tick {
        match self {
            Self::Exit { delay }
            | Self::Fail { delay, .. }
            | Self::WorkBegin { delay, .. }
            | Self::WorkEnd { delay, .. }
            | Self::Interrupt { delay }
            | Self::Raw { delay, .. }
            | Self::Send { delay, .. } => *delay,
        }
    }

    fn delay_mut(&mut self) -> &mut Tick {
        match self {
            Self::Exit { delay }
            | Self::Fail { delay, .. }
            | Self::WorkBegin { delay, .. }
            | Self::WorkEnd { delay, .. }
            | Self::Interrupt { delay }
            | Self::Raw { delay, .. }
            | Self::Send { delay, .. } => delay,
        }
    }

    /// Builds the entry that makes the engine emit `signal`.
    pub fn from_signal(signal: &Signal, delay: Tick) -> Self {
        let raw = codec::encode(signal);
        match raw.cause.as_str() {
            causes::EXIT => Self::Exit { delay },
            causes::FAIL => Self::Fail {
                code: raw.code,
                delay,
            },
            causes::WORK_BEGIN => Self::WorkBegin {
                id: signal.code().max(0) as u64,
                delay,
            },
            causes::WORK_END => Self::WorkEnd {
                id: signal.code().max(0) as u64,
                delay,
            },
            causes::USER_INTERRUPT => Self::Interrupt { delay },
            _ => Self::Raw {
                cause: raw.cause,
                code: raw.code,
                delay,
            },
        }
    }

    fn to_raw(&self, tick: Tick) -> Option<RawEvent> {
        let (cause, code) = match self {
            Self::Exit { .. } => (causes::EXIT, 0),
            Self::Fail { code, .. } => (causes::FAIL, *code),
            Self::WorkBegin { id, .. } => {
                (causes::WORK_BEGIN, *id as i64 + codec::WORK_ITEM_ID_OFFSET)
            }
            Self::WorkEnd { id, .. } => (causes::WORK_END, *id as i64 + codec::WORK_ITEM_ID_OFFSET),
            Self::Interrupt { .. } => (causes::USER_INTERRUPT, 0),
            Self::Raw { cause, code, .. } => return Some(RawEvent::new(cause.clone(), *code, tick)),
            Self::Send { .. } => return None,
        };
        Some(RawEvent::new(cause, code, tick))
    }
}

/// An ordered guest trace.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Trace {
    entries: Vec<TraceEntry>,
}

impl Trace {
    /// Empty trace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Trace emitting `signals` in order, `spacing` apart.
    pub fn from_signals<'a>(signals: impl IntoIterator<Item = &'a Signal>, spacing: Tick) -> Self {
        Self {
            entries: signals
                .into_iter()
                .map(|s| TraceEntry::from_signal(s, spacing))
                .collect(),
        }
    }

    /// The canonical guest contract for `protocol`, `spacing` apart.
    pub fn from_protocol(protocol: &GuestProtocol, spacing: Tick) -> Self {
        Self::from_signals(&protocol.signals(), spacing)
    }

    /// Parses a JSON array of entries.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error for malformed input.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Appends an entry.
    pub fn push(&mut self, entry: TraceEntry) {
        self.entries.push(entry);
    }

    /// Appends an entry, builder style.
    #[must_use]
    pub fn with(mut self, entry: TraceEntry) -> Self {
        self.entries.push(entry);
        self
    }

    /// Appends all entries of `other`.
    pub fn extend(&mut self, other: Self) {
        self.entries.extend(other.entries);
    }

    /// Entries in order.
    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the trace is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A side-effecting call observed by the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineCall {
    /// `instantiate`.
    Instantiate,
    /// `restore` from a directory.
    Restore(PathBuf),
    /// A `run` that returned a guest signal.
    Run,
    /// `switch_cores`.
    Switch {
        /// Previously active set.
        from: CoreKind,
        /// Newly active set.
        to: CoreKind,
    },
    /// `reset_stats`.
    ResetStats,
    /// `dump_stats`.
    DumpStats,
    /// `save_checkpoint` into a directory.
    SaveCheckpoint(PathBuf),
    /// `bind_event_queues`.
    BindQueues(Vec<EventQueueId>),
    /// `idle_until`.
    Idle(Tick),
    /// `deliver`.
    Deliver,
}

/// Statistics window written by a `dump_stats` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsDump {
    /// Tick of the dump.
    pub tick: Tick,
    /// Simulated time since the last reset.
    pub window_ticks: Tick,
    /// Instructions committed since the last reset.
    pub window_instructions: u64,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    node: NodeId,
    tick: Tick,
    instructions: u64,
}

/// Replay engine for one simulated machine.
#[derive(Debug)]
pub struct ScriptedEngine {
    node: NodeId,
    trace: VecDeque<TraceEntry>,
    tick: Tick,
    instructions: u64,
    num_cores: usize,
    sets: [Option<Vec<CoreState>>; 3],
    initial: CoreKind,
    instantiated: bool,
    fail_checkpoints: bool,
    window_start: (Tick, u64),
    dumps: Vec<StatsDump>,
    calls: Vec<EngineCall>,
    queues: Vec<EventQueueId>,
    outbound: Vec<Packet>,
    inbox: Vec<Packet>,
}

impl ScriptedEngine {
    /// Single-core machine with all three core sets, booting on the boot set.
    pub fn new(node: NodeId, trace: Trace) -> Self {
        let mut engine = Self {
            node,
            trace: trace.entries.into(),
            tick: Tick::ZERO,
            instructions: 0,
            num_cores: 1,
            sets: [None, None, None],
            initial: CoreKind::Boot,
            instantiated: false,
            fail_checkpoints: false,
            window_start: (Tick::ZERO, 0),
            dumps: Vec::new(),
            calls: Vec::new(),
            queues: Vec::new(),
            outbound: Vec::new(),
            inbox: Vec::new(),
        };
        engine.build_sets(&CoreKind::ALL);
        engine
    }

    /// Machine built with exactly the sets present in `set`, starting on its active set.
    pub fn from_core_set(node: NodeId, set: &CoreSet, num_cores: usize, trace: Trace) -> Self {
        let kinds: Vec<CoreKind> = CoreKind::ALL.into_iter().filter(|k| set.has(*k)).collect();
        Self::new(node, trace)
            .with_cores(num_cores)
            .with_sets(&kinds, set.active())
    }

    /// Sets the number of logical cores per set.
    #[must_use]
    pub fn with_cores(mut self, num_cores: usize) -> Self {
        self.num_cores = num_cores.max(1);
        let kinds: Vec<CoreKind> = CoreKind::ALL
            .into_iter()
            .filter(|k| self.sets[Self::slot(*k)].is_some())
            .collect();
        self.build_sets(&kinds);
        self
    }

    /// Builds only `kinds`, with `initial` active.
    #[must_use]
    pub fn with_sets(mut self, kinds: &[CoreKind], initial: CoreKind) -> Self {
        self.initial = initial;
        self.build_sets(kinds);
        self
    }

    /// Makes every `save_checkpoint` fail with an I/O error (storage exhaustion).
    #[must_use]
    pub const fn with_failing_checkpoints(mut self) -> Self {
        self.fail_checkpoints = true;
        self
    }

    /// Every side-effecting call so far, in order.
    pub fn calls(&self) -> &[EngineCall] {
        &self.calls
    }

    /// Statistics windows dumped so far.
    pub fn dumps(&self) -> &[StatsDump] {
        &self.dumps
    }

    /// Frames delivered to this machine.
    pub fn inbox(&self) -> &[Packet] {
        &self.inbox
    }

    /// Event queues the cores were bound to.
    pub fn event_queues(&self) -> &[EventQueueId] {
        &self.queues
    }

    /// Guest entries not yet replayed.
    pub fn remaining(&self) -> usize {
        self.trace.len()
    }

    /// Appends more guest activity (e.g. the trace that follows a restore).
    pub fn extend_trace(&mut self, trace: Trace) {
        self.trace.extend(trace.entries);
    }

    fn build_sets(&mut self, kinds: &[CoreKind]) {
        let n = self.num_cores;
        let initial = self.initial;
        for kind in CoreKind::ALL {
            self.sets[Self::slot(kind)] = kinds.contains(&kind).then(|| {
                let state = if kind == initial {
                    CoreState::Active
                } else {
                    CoreState::SwitchedOut
                };
                vec![state; n]
            });
        }
    }

    const fn slot(kind: CoreKind) -> usize {
        match kind {
            CoreKind::Boot => 0,
            CoreKind::Warm => 1,
            CoreKind::Measure => 2,
        }
    }

    const fn require_live(&self) -> Result<(), EngineError> {
        if self.instantiated {
            Ok(())
        } else {
            Err(EngineError::NotInstantiated)
        }
    }

    fn execute(&mut self, span: Tick) {
        self.tick = self.tick + span;
        self.instructions += span.val() / TICKS_PER_INST;
    }
}

impl SimEngine for ScriptedEngine {
    fn instantiate(&mut self) -> Result<(), EngineError> {
        if self.instantiated {
            return Err(EngineError::AlreadyInstantiated);
        }
        self.instantiated = true;
        self.calls.push(EngineCall::Instantiate);
        Ok(())
    }

    fn restore(&mut self, checkpoint: &Path) -> Result<(), EngineError> {
        if self.instantiated {
            return Err(EngineError::AlreadyInstantiated);
        }
        let file = checkpoint.join(SNAPSHOT_FILE);
        let text = fs::read_to_string(&file).map_err(|source| EngineError::CheckpointIo {
            path: file.clone(),
            source,
        })?;
        let snap: Snapshot =
            serde_json::from_str(&text).map_err(|e| EngineError::CorruptCheckpoint {
                path: file.clone(),
                reason: e.to_string(),
            })?;
        if snap.node != self.node {
            return Err(EngineError::ForeignCheckpoint {
                path: file,
                expected: self.node,
                found: snap.node,
            });
        }
        self.tick = snap.tick;
        self.instructions = snap.instructions;
        self.window_start = (snap.tick, snap.instructions);
        self.instantiated = true;
        self.calls.push(EngineCall::Restore(checkpoint.to_path_buf()));
        Ok(())
    }

    fn run(&mut self, limit: Option<Tick>) -> Result<RawEvent, EngineError> {
        self.require_live()?;
        loop {
            let Some(front) = self.trace.front_mut() else {
                return Err(EngineError::Exhausted(self.tick));
            };
            let due = self.tick + front.delay();
            if let Some(limit) = limit
                && due >= limit
            {
                let span = limit - self.tick;
                *front.delay_mut() = front.delay() - span;
                self.execute(span);
                return Ok(RawEvent::limit_reached(self.tick));
            }

            let Some(entry) = self.trace.pop_front() else {
                return Err(EngineError::Exhausted(self.tick));
            };
            self.execute(entry.delay());
            match entry.to_raw(self.tick) {
                Some(raw) => {
                    trace!(node = %self.node, cause = %raw.cause, code = raw.code, tick = %raw.tick, "guest stop");
                    self.calls.push(EngineCall::Run);
                    return Ok(raw);
                }
                None => {
                    if let TraceEntry::Send { payload, .. } = entry {
                        self.outbound.push(Packet {
                            src: self.node,
                            dst: self.node.peer(),
                            sent_at: self.tick,
                            deliver_at: self.tick,
                            payload,
                        });
                    }
                }
            }
        }
    }

    fn cur_tick(&self) -> Tick {
        self.tick
    }

    fn total_instructions(&self) -> u64 {
        self.instructions
    }

    fn num_cores(&self) -> usize {
        self.num_cores
    }

    fn core_state(&self, kind: CoreKind, core: usize) -> Option<CoreState> {
        self.sets[Self::slot(kind)]
            .as_ref()
            .and_then(|cores| cores.get(core).copied())
    }

    fn switch_cores(&mut self, from: CoreKind, to: CoreKind) -> Result<(), EngineError> {
        self.require_live()?;
        for kind in [from, to] {
            if self.sets[Self::slot(kind)].is_none() {
                return Err(EngineError::UnknownCoreSet(kind));
            }
        }
        let from_active = self.sets[Self::slot(from)]
            .as_ref()
            .is_some_and(|c| c.iter().all(|s| *s == CoreState::Active));
        if !from_active {
            return Err(EngineError::SwitchRejected {
                from,
                to,
                reason: format!("{from} is not active on every core"),
            });
        }
        if let Some(cores) = self.sets[Self::slot(from)].as_mut() {
            cores.fill(CoreState::SwitchedOut);
        }
        if let Some(cores) = self.sets[Self::slot(to)].as_mut() {
            cores.fill(CoreState::Active);
        }
        self.calls.push(EngineCall::Switch { from, to });
        Ok(())
    }

    fn reset_stats(&mut self) -> Result<(), EngineError> {
        self.require_live()?;
        self.window_start = (self.tick, self.instructions);
        self.calls.push(EngineCall::ResetStats);
        Ok(())
    }

    fn dump_stats(&mut self) -> Result<(), EngineError> {
        self.require_live()?;
        let (start_tick, start_insts) = self.window_start;
        self.dumps.push(StatsDump {
            tick: self.tick,
            window_ticks: self.tick - start_tick,
            window_instructions: self.instructions - start_insts,
        });
        self.calls.push(EngineCall::DumpStats);
        Ok(())
    }

    fn save_checkpoint(&mut self, dir: &Path) -> Result<(), EngineError> {
        self.require_live()?;
        if self.fail_checkpoints {
            return Err(EngineError::CheckpointIo {
                path: dir.to_path_buf(),
                source: std::io::Error::other("no space left on checkpoint device"),
            });
        }
        fs::create_dir_all(dir).map_err(|source| EngineError::CheckpointIo {
            path: dir.to_path_buf(),
            source,
        })?;
        let snap = Snapshot {
            node: self.node,
            tick: self.tick,
            instructions: self.instructions,
        };
        let file = dir.join(SNAPSHOT_FILE);
        let text = serde_json::to_string_pretty(&snap).map_err(|e| {
            EngineError::CorruptCheckpoint {
                path: file.clone(),
                reason: e.to_string(),
            }
        })?;
        fs::write(&file, text).map_err(|source| EngineError::CheckpointIo { path: file, source })?;
        self.calls.push(EngineCall::SaveCheckpoint(dir.to_path_buf()));
        Ok(())
    }

    fn bind_event_queues(&mut self, queues: &[EventQueueId]) -> Result<(), EngineError> {
        if queues.len() != self.num_cores {
            return Err(EngineError::Backend(format!(
                "{} event queues for {} cores",
                queues.len(),
                self.num_cores
            )));
        }
        self.queues = queues.to_vec();
        self.calls.push(EngineCall::BindQueues(self.queues.clone()));
        Ok(())
    }

    fn idle_until(&mut self, limit: Tick) -> Result<(), EngineError> {
        self.require_live()?;
        self.tick = self.tick.max(limit);
        self.calls.push(EngineCall::Idle(limit));
        Ok(())
    }

    fn take_outbound(&mut self) -> Vec<Packet> {
        std::mem::take(&mut self.outbound)
    }

    fn deliver(&mut self, packet: Packet) -> Result<(), EngineError> {
        self.inbox.push(packet);
        self.calls.push(EngineCall::Deliver);
        Ok(())
    }
}
