//! Dual-node synchronization.
//!
//! Two machines (the system under test and a driving peer) run side by side, linked
//! by an [`EtherLink`]. Simulated time is cut into quanta: in each round both machines
//! run until the shared horizon, then frames are exchanged. Because the link delay is
//! strictly greater than the quantum, a frame sent in one round is always due in a
//! later one, so neither machine can observe a frame before its peer sent it.
//!
//! Each machine has its own [`PhaseController`]. With the barrier enabled, a machine
//! that finishes warm-up is parked (its clock idles to the horizon) until the other
//! one finishes warm-up too; only then do both switch cores and reset statistics.
//! Setup checkpoints are always taken at a barrier, so the pair is saved at one tick
//! and a later evaluation run restores both machines onto a common clock.

/// Delayed link between the machines.
pub mod link;

use thiserror::Error;
use tracing::{debug, error, info};

pub use link::EtherLink;

use crate::common::{EventQueueId, NodeId, OrchestratorError, Tick};
use crate::config::{Config, ConfigError};
use crate::controller::{Barrier, PhaseController, Step};
use crate::engine::SimEngine;
use crate::signal::codec;
use crate::stats::{FailReason, Outcome, RunReport};

/// Synchronization failures.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Quantum, delay or margin rejected at construction.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The machines came up at different ticks, so they share no common time base.
    #[error("machines start at different ticks: primary {primary}, driver {driver}")]
    ClockMismatch {
        /// Primary's tick after start.
        primary: Tick,
        /// Driver's tick after start.
        driver: Tick,
    },
    /// A frame was due before the receiver's current window.
    #[error("frame {src} -> {dst} sent at {sent_at} was due at {deliver_at}, before window start {window_start}")]
    CausalityViolation {
        /// Sender.
        src: NodeId,
        /// Receiver.
        dst: NodeId,
        /// Send tick.
        sent_at: Tick,
        /// Arrival tick.
        deliver_at: Tick,
        /// Start of the receiver's window.
        window_start: Tick,
    },
}

/// Where a machine stands in the round loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    /// Runs guest code each round.
    Running,
    /// Held at a barrier; the clock idles.
    Parked(Barrier),
    /// Halted.
    Finished,
}

#[derive(Debug)]
struct NodeSlot<E> {
    controller: PhaseController,
    engine: E,
    state: NodeState,
}

/// Result of a dual-node run.
#[derive(Clone, Debug, PartialEq)]
pub struct DualReport {
    /// System under test.
    pub primary: RunReport,
    /// Driving peer.
    pub driver: RunReport,
    /// Quanta simulated.
    pub rounds: u64,
    /// Frames carried by the link.
    pub packets: u64,
}

impl DualReport {
    /// Whether both machines ended successfully.
    pub const fn is_success(&self) -> bool {
        self.primary.outcome.is_success() && self.driver.outcome.is_success()
    }
}

/// Runs two linked machines in lockstep quanta.
#[derive(Debug)]
pub struct DualNodeSynchronizer<E: SimEngine> {
    nodes: [NodeSlot<E>; 2],
    link: EtherLink,
    quantum: Tick,
    now: Tick,
    rounds: u64,
}

impl<E: SimEngine> DualNodeSynchronizer<E> {
    /// Builds the pair and assigns event queues.
    ///
    /// Shared objects stay on [`EventQueueId::SHARED`]; the primary's cores take queues
    /// `1..=n` and the driver's cores the queues after that, so every core can advance
    /// on its own host thread between sync points.
    ///
    /// # Arguments
    ///
    /// * `config` - Experiment configuration; its `sync` section is validated here.
    /// * `primary` - Engine of the system under test.
    /// * `driver` - Engine of the driving peer.
    ///
    /// # Errors
    ///
    /// [`SyncError::Config`] when the link delay does not exceed the quantum by the
    /// configured safety factor; any other configuration or engine error.
    pub fn new(config: &Config, primary: E, driver: E) -> Result<Self, OrchestratorError> {
        config.sync.validate().map_err(SyncError::from)?;
        config.validate()?;
        let barrier = config.sync.barrier;

        let mut nodes = [
            NodeSlot {
                controller: PhaseController::new(NodeId::PRIMARY, config)?
                    .with_barrier(barrier)
                    .with_checkpoint_barrier(true),
                engine: primary,
                state: NodeState::Running,
            },
            NodeSlot {
                controller: PhaseController::new(NodeId::DRIVER, config)?
                    .with_barrier(barrier)
                    .with_checkpoint_barrier(true),
                engine: driver,
                state: NodeState::Running,
            },
        ];

        let mut next_queue = EventQueueId::SHARED.0 + 1;
        for slot in &mut nodes {
            let n = slot.engine.num_cores() as u32;
            let queues: Vec<EventQueueId> = (next_queue..next_queue + n).map(EventQueueId).collect();
            next_queue += n;
            slot.engine.bind_event_queues(&queues)?;
            debug!(node = %slot.controller.node(), ?queues, "event queues bound");
        }

        let delay = config.sync.effective_link_delay();
        info!(quantum = %config.sync.quantum, delay = %delay, barrier, "dual-node synchronizer ready");
        Ok(Self {
            nodes,
            link: EtherLink::new(delay),
            quantum: config.sync.quantum,
            now: Tick::ZERO,
            rounds: 0,
        })
    }

    /// The link.
    pub const fn link(&self) -> &EtherLink {
        &self.link
    }

    /// Controller of `node`.
    pub const fn controller(&self, node: NodeId) -> &PhaseController {
        &self.nodes[Self::slot(node)].controller
    }

    /// Engine of `node`.
    pub const fn engine(&self, node: NodeId) -> &E {
        &self.nodes[Self::slot(node)].engine
    }

    /// Round-loop state of `node`.
    pub const fn state(&self, node: NodeId) -> NodeState {
        self.nodes[Self::slot(node)].state
    }

    /// Current synchronized time.
    pub const fn now(&self) -> Tick {
        self.now
    }

    const fn slot(node: NodeId) -> usize {
        if node.0 == 0 { 0 } else { 1 }
    }

    /// Runs both machines until both halt.
    ///
    /// # Returns
    ///
    /// Both run reports. A machine that fails (interrupt, incomplete measurement)
    /// makes its peer fail with [`FailReason::PeerFailed`].
    ///
    /// # Errors
    ///
    /// The first fatal error of either machine, or a causality violation. Both
    /// reports are marked failed before the error is returned.
    pub fn run(&mut self) -> Result<DualReport, OrchestratorError> {
        if let Err(e) = self.drive() {
            error!("dual-node run aborted: {e}");
            let now = self.now;
            for slot in &mut self.nodes {
                slot.controller.abort(FailReason::Fatal(e.to_string()), now);
                slot.state = NodeState::Finished;
            }
            return Err(e);
        }
        Ok(self.report())
    }

    /// Snapshot of both reports.
    pub fn report(&self) -> DualReport {
        DualReport {
            primary: self.nodes[0].controller.report().clone(),
            driver: self.nodes[1].controller.report().clone(),
            rounds: self.rounds,
            packets: self.link.carried(),
        }
    }

    fn drive(&mut self) -> Result<(), OrchestratorError> {
        for slot in &mut self.nodes {
            let step = slot.controller.start(&mut slot.engine)?;
            slot.state = Self::state_after(step);
        }
        self.align_clocks()?;

        while self.nodes.iter().any(|s| s.state != NodeState::Finished) {
            let horizon = self.now + self.quantum;
            for slot in &mut self.nodes {
                Self::run_window(slot, horizon)?;
            }

            self.propagate_failure();
            self.resolve_barrier()?;
            self.exchange(horizon)?;

            self.now = horizon;
            self.rounds += 1;
        }
        info!(rounds = self.rounds, packets = self.link.carried(), "dual-node run finished");
        Ok(())
    }

    /// Starts the round loop at the tick both machines were instantiated or restored at.
    fn align_clocks(&mut self) -> Result<(), SyncError> {
        let primary = self.nodes[0].engine.cur_tick();
        let driver = self.nodes[1].engine.cur_tick();
        if primary != driver {
            return Err(SyncError::ClockMismatch { primary, driver });
        }
        if primary != self.now {
            debug!(tick = %primary, "resuming synchronized time from the restored clocks");
        }
        self.now = primary;
        Ok(())
    }

    const fn state_after(step: Step) -> NodeState {
        match step {
            Step::Continue => NodeState::Running,
            Step::AtBarrier(barrier) => NodeState::Parked(barrier),
            Step::Halt => NodeState::Finished,
        }
    }

    /// Advances one machine to `horizon`.
    fn run_window(slot: &mut NodeSlot<E>, horizon: Tick) -> Result<(), OrchestratorError> {
        match slot.state {
            NodeState::Finished => Ok(()),
            NodeState::Parked(_) => Ok(slot.engine.idle_until(horizon)?),
            NodeState::Running => loop {
                let raw = slot.engine.run(Some(horizon))?;
                if raw.is_limit_reached() {
                    return Ok(());
                }
                let signal = codec::decode(&raw);
                let step = slot.controller.step(&mut slot.engine, &signal)?;
                slot.state = Self::state_after(step);
                match slot.state {
                    NodeState::Running => {}
                    NodeState::Parked(barrier) => {
                        debug!(node = %slot.controller.node(), ?barrier, tick = %raw.tick, "parked");
                        slot.engine.idle_until(horizon)?;
                        return Ok(());
                    }
                    NodeState::Finished => return Ok(()),
                }
            },
        }
    }

    /// A machine that ended in `Failed` takes its peer down with it.
    fn propagate_failure(&mut self) {
        let failed: Vec<bool> = self
            .nodes
            .iter()
            .map(|s| matches!(s.controller.report().outcome, Outcome::Failed { .. }))
            .collect();
        for (i, slot) in self.nodes.iter_mut().enumerate() {
            if failed[1 - i] && slot.state != NodeState::Finished {
                slot.controller.abort(FailReason::PeerFailed, self.now);
                slot.state = NodeState::Finished;
            }
        }
    }

    /// Releases parked machines once no machine is still short of the barrier.
    fn resolve_barrier(&mut self) -> Result<(), OrchestratorError> {
        let parked = self
            .nodes
            .iter()
            .filter(|s| matches!(s.state, NodeState::Parked(_)))
            .count();
        let running = self
            .nodes
            .iter()
            .filter(|s| s.state == NodeState::Running)
            .count();
        if parked == 0 || running > 0 {
            return Ok(());
        }
        info!(tick = %(self.now + self.quantum), "both nodes at barrier; releasing");
        for slot in &mut self.nodes {
            if matches!(slot.state, NodeState::Parked(_)) {
                let step = slot.controller.release_barrier(&mut slot.engine)?;
                slot.state = Self::state_after(step);
            }
        }
        Ok(())
    }

    /// Moves frames sent in the last window onto the wire and delivers the ones due in
    /// the next.
    fn exchange(&mut self, horizon: Tick) -> Result<(), OrchestratorError> {
        for slot in &mut self.nodes {
            for packet in slot.engine.take_outbound() {
                self.link.send(packet);
            }
        }
        let due = self
            .link
            .due(horizon, horizon + self.quantum)
            .map_err(OrchestratorError::from)?;
        for packet in due {
            let slot = &mut self.nodes[Self::slot(packet.dst)];
            slot.engine.deliver(packet)?;
        }
        Ok(())
    }
}
