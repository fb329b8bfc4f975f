//! Single-machine run loop.
//!
//! [`Experiment`] owns one engine and its [`PhaseController`] side by side and runs
//! the blocking loop: run the engine until the guest signals, decode, step the
//! controller, repeat until the controller halts. Without a peer there is nothing to
//! wait for at the measurement barrier, so it is released immediately.

use tracing::{debug, error};

use crate::common::{NodeId, OrchestratorError};
use crate::config::Config;
use crate::controller::{PhaseController, Step};
use crate::engine::SimEngine;
use crate::signal::codec;
use crate::stats::{FailReason, RunReport};

/// One machine plus the controller driving it.
#[derive(Debug)]
pub struct Experiment<E: SimEngine> {
    controller: PhaseController,
    engine: E,
}

impl<E: SimEngine> Experiment<E> {
    /// Creates an experiment on the primary node.
    ///
    /// # Errors
    ///
    /// Configuration errors from validation, or a missing initial core set.
    pub fn new(config: &Config, engine: E) -> Result<Self, OrchestratorError> {
        let controller = PhaseController::new(NodeId::PRIMARY, config)?;
        Ok(Self { controller, engine })
    }

    /// The controller.
    pub const fn controller(&self) -> &PhaseController {
        &self.controller
    }

    /// The engine.
    pub const fn engine(&self) -> &E {
        &self.engine
    }

    /// Splits the experiment into its controller and engine.
    pub fn into_parts(self) -> (PhaseController, E) {
        (self.controller, self.engine)
    }

    /// Runs until the controller halts.
    ///
    /// # Returns
    ///
    /// The run report. A `Failed` outcome (interrupt, incomplete measurement) is a
    /// report, not an error.
    ///
    /// # Errors
    ///
    /// Any fatal failure. The report is marked failed before the error is returned.
    pub fn run(&mut self) -> Result<RunReport, OrchestratorError> {
        match self.drive() {
            Ok(()) => Ok(self.controller.report().clone()),
            Err(e) => {
                error!(node = %self.controller.node(), "fatal: {e}");
                self.controller
                    .abort(FailReason::Fatal(e.to_string()), self.engine.cur_tick());
                Err(e)
            }
        }
    }

    fn drive(&mut self) -> Result<(), OrchestratorError> {
        let mut step = self.controller.start(&mut self.engine)?;
        loop {
            match step {
                Step::Halt => return Ok(()),
                Step::AtBarrier(barrier) => {
                    debug!(?barrier, "single node; releasing barrier");
                    step = self.controller.release_barrier(&mut self.engine)?;
                    continue;
                }
                Step::Continue => {}
            }

            let raw = self.engine.run(None)?;
            if raw.is_limit_reached() {
                continue;
            }
            let signal = codec::decode(&raw);
            step = self.controller.step(&mut self.engine, &signal)?;
        }
    }
}
