use std::ops::Range;

use simphase_core::checkpoint::{CheckpointManager, CheckpointRecord, CheckpointTag};
use simphase_core::common::{NodeId, Tick};
use simphase_core::config::{Config, Mode, Topology};
use simphase_core::engine::{ScriptedEngine, SimEngine, Trace, TraceEntry};
use simphase_core::signal::GuestProtocol;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Workload every test context runs.
pub const WORKLOAD: &str = "fibonacci-go";

/// Installs a test-writer subscriber once per process. `RUST_LOG` selects the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A configuration whose checkpoint root lives in a private temporary directory.
pub struct TestContext {
    pub dir: TempDir,
    pub config: Config,
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TestContext {
    /// Setup-mode configuration with the default core sets and budgets.
    pub fn new() -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.experiment.workload = WORKLOAD.to_owned();
        config.checkpoint.dir = dir.path().join("cpt");
        Self { dir, config }
    }

    pub fn evaluation(mut self, resume_from: CheckpointTag) -> Self {
        self.config.experiment.mode = Mode::Evaluation;
        self.config.checkpoint.resume_from = resume_from;
        self
    }

    pub fn with_budgets(mut self, warm: i64, measure: i64) -> Self {
        self.config.experiment.warm_invocations = warm;
        self.config.experiment.measure_invocations = measure;
        self
    }

    pub fn dual(mut self, quantum: Tick, link_delay: Tick) -> Self {
        self.config.topology = Topology::Dual;
        self.config.sync.quantum = quantum;
        self.config.sync.link_delay = Some(link_delay);
        self
    }

    /// Writes a primary `tag` checkpoint at tick zero, as a setup run would.
    pub fn seed_checkpoint(&self, tag: CheckpointTag) -> CheckpointRecord {
        self.seed_checkpoint_at(NodeId::PRIMARY, tag, Tick::ZERO)
    }

    /// Writes `node`'s `tag` checkpoint with the machine's clock at `tick`.
    pub fn seed_checkpoint_at(&self, node: NodeId, tag: CheckpointTag, tick: Tick) -> CheckpointRecord {
        let mut engine = ScriptedEngine::new(node, Trace::new());
        engine.instantiate().unwrap();
        engine.idle_until(tick).unwrap();
        let mut manager = CheckpointManager::new(self.config.checkpoint.dir.clone()).with_node(node);
        manager.save(&mut engine, WORKLOAD, tag).unwrap()
    }

    /// Writes the `tag` checkpoint of both machines, saved together at `tick`.
    pub fn seed_pair(&self, tag: CheckpointTag, tick: Tick) -> [CheckpointRecord; 2] {
        [NodeId::PRIMARY, NodeId::DRIVER].map(|node| self.seed_checkpoint_at(node, tag, tick))
    }

    /// Engine for the system under test, built with the configured core sets.
    pub fn engine(&self, trace: Trace) -> ScriptedEngine {
        self.engine_for(NodeId::PRIMARY, trace)
    }

    pub fn engine_for(&self, node: NodeId, trace: Trace) -> ScriptedEngine {
        let cores = if node == NodeId::PRIMARY {
            self.config.cores.num_cores
        } else {
            self.config.cores.driver_cores
        };
        ScriptedEngine::from_core_set(node, &self.config.core_set(), cores, trace)
    }
}

/// The full guest contract, `spacing` apart.
pub fn full_trace(warm: u64, measure: u64, spacing: Tick) -> Trace {
    Trace::from_protocol(&GuestProtocol::new(warm, measure), spacing)
}

/// The guest contract as seen after restoring a post-boot checkpoint.
pub fn post_pinned_trace(warm: u64, measure: u64, spacing: Tick) -> Trace {
    let signals = GuestProtocol::new(warm, measure).signals();
    Trace::from_signals(&signals[3..], spacing)
}

/// The first three setup markers (boot, started, pinned).
pub fn setup_trace(spacing: Tick) -> Trace {
    let signals = GuestProtocol::new(0, 0).signals();
    Trace::from_signals(&signals[..3], spacing)
}

/// Matched begin/end pairs for `ids`.
pub fn work_items(ids: Range<u64>, spacing: Tick) -> Trace {
    let mut trace = Trace::new();
    for id in ids {
        trace.push(TraceEntry::WorkBegin { id, delay: spacing });
        trace.push(TraceEntry::WorkEnd { id, delay: spacing });
    }
    trace
}
