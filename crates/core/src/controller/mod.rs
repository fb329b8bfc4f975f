//! Phase controller.
//!
//! This module implements the per-machine experiment state machine. It provides:
//! 1. **Transitions:** one [`PhaseController::step`] per decoded signal, driven by the
//!    table in [`phase`].
//! 2. **Side effects:** CPU-model switches, statistics reset/dump and checkpoints,
//!    each completed before `step` returns so the next engine run never overlaps one.
//! 3. **Modes:** setup runs checkpoint and halt, evaluation runs restore and measure,
//!    and full runs go from boot to the dump without touching checkpoints.
//! 4. **Barriers:** optionally parks at the warm/measure boundary, and before each
//!    setup checkpoint, until released. This is how the dual-node synchronizer keeps
//!    both machines' windows aligned and snapshots the pair at one common tick.
//!
//! The controller is the only component that decides whether a run continues,
//! resynchronizes or aborts. Everything below it reports typed failures upward.

/// Phases, anomalies and the transition table.
pub mod phase;

use std::time::Instant;

use thiserror::Error;
use tracing::{debug, error, info, warn};

pub use phase::{Action, Anomaly, ExperimentPhase, action};

use crate::checkpoint::{CheckpointManager, CheckpointTag};
use crate::common::{NodeId, OrchestratorError, Tick};
use crate::config::{Config, Mode, SaveAt};
use crate::cores::{CoreKind, CoreSwitchManager};
use crate::counter::{CountWindow, InvocationBudget, InvocationCounter};
use crate::engine::SimEngine;
use crate::signal::{ProtocolMonitor, Signal, Stage};
use crate::stats::{FailReason, Outcome, PhaseEntry, RunReport};

/// Synchronization points a controller can park at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Barrier {
    /// Warm-up complete; waiting to switch cores and reset statistics.
    MeasureStart,
    /// Setup boundary reached; waiting to save the tagged checkpoint.
    Checkpoint(CheckpointTag),
}

/// What the run loop should do after a step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Resume the engine.
    Continue,
    /// Hold the guest until [`PhaseController::release_barrier`].
    AtBarrier(Barrier),
    /// The run is over (done, checkpointed or failed).
    Halt,
}

/// Misuse of the controller, or a statistics guard that tripped.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ControllerError {
    /// `step` before `start`.
    #[error("controller has not been started")]
    NotStarted,
    /// `start` twice.
    #[error("controller was already started")]
    AlreadyStarted,
    /// A signal arrived while parked at a barrier.
    #[error("signal received while parked at {0:?}")]
    SignalAtBarrier(Barrier),
    /// `release_barrier` without a pending barrier.
    #[error("no barrier is pending")]
    NoPendingBarrier,
    /// A statistics reset was about to be issued inside the warm-up window.
    #[error("statistics reset refused: {remaining} warm invocations remain")]
    ResetBeforeWarmComplete {
        /// Warm budget left.
        remaining: i64,
    },
    /// A statistics dump was about to be issued inside the measurement window.
    #[error("statistics dump refused: {remaining} measured invocations remain")]
    DumpBeforeMeasureComplete {
        /// Measure budget left.
        remaining: i64,
    },
}

/// Drives one machine through its experiment phases.
#[derive(Debug)]
pub struct PhaseController {
    node: NodeId,
    mode: Mode,
    workload: String,
    save_at: SaveAt,
    resume_from: CheckpointTag,
    phase: ExperimentPhase,
    counter: InvocationCounter,
    cores: CoreSwitchManager,
    checkpoints: CheckpointManager,
    barrier: bool,
    checkpoint_barrier: bool,
    pending: Option<Barrier>,
    monitor: ProtocolMonitor,
    report: RunReport,
    started: Option<Instant>,
}

impl PhaseController {
    /// Controller for `node` configured by `config`, without a measurement barrier.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::Config`] when `config` does not validate (a zero budget
    /// could never be exhausted), [`OrchestratorError::Switch`] when the initial core
    /// set is not configured.
    pub fn new(node: NodeId, config: &Config) -> Result<Self, OrchestratorError> {
        config.validate()?;
        let exp = &config.experiment;
        let cores = CoreSwitchManager::new(node, config.core_set())?;
        Ok(Self {
            node,
            mode: exp.mode,
            workload: exp.workload.clone(),
            save_at: exp.save_at,
            resume_from: config.checkpoint.resume_from,
            phase: ExperimentPhase::Booting,
            counter: InvocationCounter::new(InvocationBudget::new(
                exp.warm_invocations,
                exp.measure_invocations,
            )),
            cores,
            checkpoints: CheckpointManager::new(config.checkpoint.dir.clone()).with_node(node),
            barrier: false,
            checkpoint_barrier: false,
            pending: None,
            monitor: ProtocolMonitor::new(),
            report: RunReport::new(node, exp.mode, exp.workload.clone()),
            started: None,
        })
    }

    /// Enables or disables the warm/measure barrier.
    #[must_use]
    pub const fn with_barrier(mut self, barrier: bool) -> Self {
        self.barrier = barrier;
        self
    }

    /// Parks before every setup checkpoint, so a peer can save at the same tick.
    #[must_use]
    pub const fn with_checkpoint_barrier(mut self, barrier: bool) -> Self {
        self.checkpoint_barrier = barrier;
        self
    }

    /// Machine this controller drives.
    pub const fn node(&self) -> NodeId {
        self.node
    }

    /// Current phase.
    pub const fn phase(&self) -> ExperimentPhase {
        self.phase
    }

    /// Remaining budgets.
    pub const fn budget(&self) -> InvocationBudget {
        self.counter.budget()
    }

    /// Barrier the controller is parked at, if any.
    pub const fn pending_barrier(&self) -> Option<Barrier> {
        self.pending
    }

    /// Active core set.
    pub const fn active_cores(&self) -> CoreKind {
        self.cores.active()
    }

    /// Report so far.
    pub const fn report(&self) -> &RunReport {
        &self.report
    }

    /// Consumes the controller, returning its report.
    pub fn into_report(self) -> RunReport {
        self.report
    }

    /// Whether the run reached `Done` or `Failed`, or halted after checkpointing.
    pub fn is_finished(&self) -> bool {
        self.phase.is_terminal() || self.report.outcome != Outcome::Running
    }

    /// Brings the machine up and enters the first phase.
    ///
    /// Setup and full modes instantiate a fresh machine in `Booting`. Evaluation mode restores
    /// the configured checkpoint and resumes in `Warming` (post-boot) or `Measuring`
    /// (post-warm).
    ///
    /// # Returns
    ///
    /// [`Step::Continue`], or [`Step::Halt`] if entering the first phase already ended
    /// the run.
    ///
    /// # Errors
    ///
    /// A missing checkpoint record, restore failure or switch failure; all fatal.
    pub fn start<E: SimEngine + ?Sized>(&mut self, engine: &mut E) -> Result<Step, OrchestratorError> {
        if self.started.is_some() {
            return Err(ControllerError::AlreadyStarted.into());
        }
        self.started = Some(Instant::now());

        match self.mode {
            Mode::Setup | Mode::Full => {
                engine.instantiate()?;
                self.report.start_tick = engine.cur_tick();
                self.cores.verify_active(engine, self.cores.active())?;
                self.enter(ExperimentPhase::Booting, engine.cur_tick());
                Ok(Step::Continue)
            }
            Mode::Evaluation => {
                let record = self.checkpoints.lookup(&self.workload, self.resume_from)?;
                self.checkpoints.restore(engine, &record)?;
                self.report.start_tick = engine.cur_tick();
                self.cores.verify_active(engine, self.cores.active())?;
                match self.resume_from {
                    CheckpointTag::Boot => {
                        self.monitor = ProtocolMonitor::starting_at(Stage::ContainerPinned);
                        self.enter_warming(engine)
                    }
                    CheckpointTag::Warm => {
                        self.monitor = ProtocolMonitor::starting_at(Stage::WarmDone);
                        if InvocationBudget::is_active(self.counter.budget().warm_remaining) {
                            warn!(
                                node = %self.node,
                                "resuming after warm-up; warm_invocations is ignored"
                            );
                        }
                        self.counter.disable_warm();
                        self.enter_measuring(engine)
                    }
                }
            }
        }
    }

    /// Consumes one decoded signal.
    ///
    /// All side effects the signal triggers are complete when this returns.
    ///
    /// # Errors
    ///
    /// Fatal failures only. Protocol anomalies are logged, counted and ignored.
    pub fn step<E: SimEngine + ?Sized>(
        &mut self,
        engine: &mut E,
        signal: &Signal,
    ) -> Result<Step, OrchestratorError> {
        if self.started.is_none() {
            return Err(ControllerError::NotStarted.into());
        }
        if let Some(barrier) = self.pending {
            return Err(ControllerError::SignalAtBarrier(barrier).into());
        }
        let tick = signal.tick();
        if let Err(violation) = self.monitor.observe(signal) {
            warn!(node = %self.node, phase = %self.phase, %tick, "guest protocol: {violation}");
        }

        let node = self.node;
        let phase = self.phase;
        match action(phase, signal.milestone()) {
            Action::Enter(next) => self.advance(engine, next, tick),
            Action::Resync(next) => {
                warn!(%node, %phase, code = signal.code(), %tick, "out-of-order signal; resynchronizing to {next}");
                self.report.anomalies += 1;
                self.advance(engine, next, tick)
            }
            Action::Begin(id) => {
                if let Err(e) = self.counter.on_work_begin(id) {
                    warn!(%node, %phase, %tick, "{e}");
                    self.report.anomalies += 1;
                }
                Ok(Step::Continue)
            }
            Action::End(id) => match self.counter.on_work_end(id) {
                Ok(exhausted) => {
                    info!(%node, %phase, id, %tick, "End invocation");
                    if exhausted {
                        self.window_complete(engine)
                    } else {
                        Ok(Step::Continue)
                    }
                }
                Err(e) => {
                    warn!(%node, %phase, %tick, "{e}; not counted");
                    self.report.anomalies += 1;
                    Ok(Step::Continue)
                }
            },
            Action::PhaseMarker => {
                if self.counter.window_active() {
                    warn!(%node, %phase, code = signal.code(), "guest ended {phase} before the budget did; ignored");
                    self.report.anomalies += 1;
                    Ok(Step::Continue)
                } else {
                    self.window_complete(engine)
                }
            }
            Action::Abort(reason) => {
                self.fail(reason, tick);
                Ok(Step::Halt)
            }
            Action::Ignore(anomaly) => {
                warn!(%node, %phase, code = signal.code(), %tick, "{anomaly}: {signal}; ignored");
                self.report.anomalies += 1;
                Ok(Step::Continue)
            }
            Action::Info => {
                debug!(%node, %phase, code = signal.code(), %tick, "guest marker");
                Ok(Step::Continue)
            }
        }
    }

    /// Leaves the barrier the controller is parked at.
    ///
    /// # Errors
    ///
    /// [`ControllerError::NoPendingBarrier`], or any failure of the switch, reset or
    /// checkpoint save that follows.
    pub fn release_barrier<E: SimEngine + ?Sized>(
        &mut self,
        engine: &mut E,
    ) -> Result<Step, OrchestratorError> {
        let Some(barrier) = self.pending.take() else {
            return Err(ControllerError::NoPendingBarrier.into());
        };
        debug!(node = %self.node, ?barrier, "barrier released");
        match barrier {
            Barrier::MeasureStart => self.enter_measuring(engine),
            Barrier::Checkpoint(CheckpointTag::Boot) => self.save_boot(engine),
            Barrier::Checkpoint(CheckpointTag::Warm) => self.save_warm(engine),
        }
    }

    /// Moves the run to `Failed` for a reason outside the signal stream. A no-op once
    /// the run has finished.
    pub fn abort(&mut self, reason: FailReason, tick: Tick) {
        if !self.is_finished() {
            self.pending = None;
            self.fail(reason, tick);
        }
    }

    fn advance<E: SimEngine + ?Sized>(
        &mut self,
        engine: &mut E,
        next: ExperimentPhase,
        tick: Tick,
    ) -> Result<Step, OrchestratorError> {
        match next {
            ExperimentPhase::Warming => self.enter_warming(engine),
            ExperimentPhase::Done => {
                self.enter(ExperimentPhase::Done, tick);
                self.finish(Outcome::Completed, tick);
                info!(node = %self.node, %tick, "Simulation done");
                Ok(Step::Halt)
            }
            other => {
                self.enter(other, tick);
                Ok(Step::Continue)
            }
        }
    }

    fn enter_warming<E: SimEngine + ?Sized>(
        &mut self,
        engine: &mut E,
    ) -> Result<Step, OrchestratorError> {
        self.enter(ExperimentPhase::Warming, engine.cur_tick());
        if self.mode != Mode::Setup {
            return self.begin_warm(engine);
        }
        if self.checkpoint_barrier {
            return Ok(self.park(Barrier::Checkpoint(CheckpointTag::Boot), engine.cur_tick()));
        }
        self.save_boot(engine)
    }

    fn save_boot<E: SimEngine + ?Sized>(
        &mut self,
        engine: &mut E,
    ) -> Result<Step, OrchestratorError> {
        let record = self
            .checkpoints
            .save(engine, &self.workload, CheckpointTag::Boot)?;
        self.report.checkpoints.push(record.clone());
        if self.save_at == SaveAt::Pinned {
            self.finish(Outcome::Checkpointed { record }, engine.cur_tick());
            return Ok(Step::Halt);
        }
        self.begin_warm(engine)
    }

    fn begin_warm<E: SimEngine + ?Sized>(
        &mut self,
        engine: &mut E,
    ) -> Result<Step, OrchestratorError> {
        let warm_budget = self.counter.budget().warm_remaining;
        if InvocationBudget::is_active(warm_budget) && self.cores.core_set().has(CoreKind::Warm) {
            let _switched = self.cores.switch_to(engine, CoreKind::Warm)?;
            self.report.core_switches = self.cores.switches();
        }
        self.counter.set_window(CountWindow::Warm);
        Ok(Step::Continue)
    }

    fn window_complete<E: SimEngine + ?Sized>(
        &mut self,
        engine: &mut E,
    ) -> Result<Step, OrchestratorError> {
        match self.phase {
            ExperimentPhase::Warming => self.warm_complete(engine),
            ExperimentPhase::Measuring => self.measure_complete(engine),
            _ => Ok(Step::Continue),
        }
    }

    fn warm_complete<E: SimEngine + ?Sized>(
        &mut self,
        engine: &mut E,
    ) -> Result<Step, OrchestratorError> {
        let tick = engine.cur_tick();
        self.counter.set_window(CountWindow::Idle);
        self.report.warm_invocations = self.counter.warm_counted();
        info!(node = %self.node, %tick, invocations = self.counter.warm_counted(), "warm-up complete");

        if self.mode == Mode::Setup {
            if self.checkpoint_barrier {
                return Ok(self.park(Barrier::Checkpoint(CheckpointTag::Warm), tick));
            }
            return self.save_warm(engine);
        }
        if self.barrier {
            return Ok(self.park(Barrier::MeasureStart, tick));
        }
        self.enter_measuring(engine)
    }

    fn save_warm<E: SimEngine + ?Sized>(
        &mut self,
        engine: &mut E,
    ) -> Result<Step, OrchestratorError> {
        let record = self
            .checkpoints
            .save(engine, &self.workload, CheckpointTag::Warm)?;
        self.report.checkpoints.push(record.clone());
        self.finish(Outcome::Checkpointed { record }, engine.cur_tick());
        Ok(Step::Halt)
    }

    fn park(&mut self, barrier: Barrier, tick: Tick) -> Step {
        self.pending = Some(barrier);
        info!(node = %self.node, %tick, ?barrier, "waiting at barrier");
        Step::AtBarrier(barrier)
    }

    fn enter_measuring<E: SimEngine + ?Sized>(
        &mut self,
        engine: &mut E,
    ) -> Result<Step, OrchestratorError> {
        let remaining = self.counter.budget().warm_remaining;
        if remaining > 0 {
            return Err(ControllerError::ResetBeforeWarmComplete { remaining }.into());
        }
        let _switched = self.cores.switch_to(engine, CoreKind::Measure)?;
        self.report.core_switches = self.cores.switches();
        engine.reset_stats()?;
        self.report.stats_resets += 1;

        self.enter(ExperimentPhase::Measuring, engine.cur_tick());
        self.counter.set_window(CountWindow::Measure);
        Ok(Step::Continue)
    }

    fn measure_complete<E: SimEngine + ?Sized>(
        &mut self,
        engine: &mut E,
    ) -> Result<Step, OrchestratorError> {
        let remaining = self.counter.budget().measure_remaining;
        if remaining > 0 {
            return Err(ControllerError::DumpBeforeMeasureComplete { remaining }.into());
        }
        engine.dump_stats()?;
        self.report.stats_dumps += 1;
        self.counter.set_window(CountWindow::Idle);
        self.report.measured_invocations = self.counter.measure_counted();
        info!(
            node = %self.node,
            tick = %engine.cur_tick(),
            invocations = self.counter.measure_counted(),
            "measurement complete; statistics dumped"
        );

        self.enter(ExperimentPhase::ContainerStopping, engine.cur_tick());
        Ok(Step::Continue)
    }

    fn fail(&mut self, reason: FailReason, tick: Tick) {
        self.counter.set_window(CountWindow::Idle);
        self.enter(ExperimentPhase::Failed, tick);
        error!(node = %self.node, %tick, "experiment failed: {reason}");
        self.finish(Outcome::Failed { reason }, tick);
    }

    fn enter(&mut self, phase: ExperimentPhase, tick: Tick) {
        info!(node = %self.node, %phase, %tick, "entering phase");
        self.phase = phase;
        self.report.phases.push(PhaseEntry { phase, tick });
    }

    fn finish(&mut self, outcome: Outcome, tick: Tick) {
        self.report.outcome = outcome;
        self.report.end_tick = tick;
        self.report.warm_invocations = self.counter.warm_counted();
        self.report.measured_invocations = self.counter.measure_counted();
        if let Some(started) = self.started {
            self.report.host_seconds = started.elapsed().as_secs_f64();
        }
    }
}
