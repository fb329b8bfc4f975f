//! Experiment-phase orchestration for full-system simulation.
//!
//! This crate sequences multi-phase architectural simulation experiments on top of an
//! external simulation engine:
//! 1. **Signals:** Decoding engine exit events into guest milestones and work items.
//! 2. **Phases:** The per-machine state machine (boot, container setup, warm-up,
//!    measurement, teardown) and its side effects.
//! 3. **Machine control:** CPU-model switches, statistics reset/dump and checkpoints.
//! 4. **Dual node:** Two machines on a delayed link, advanced in bounded quanta with a
//!    barrier at the measurement boundary.
//! 5. **Tooling:** Configuration, guest run-scripts, run reports and log checking.

/// Run-log checking for batches of experiments.
pub mod analysis;
/// Checkpoint save, lookup and restore.
pub mod checkpoint;
/// Simulated time, identifiers and the crate-wide error taxonomy.
pub mod common;
/// Operator configuration (defaults, sections, validation).
pub mod config;
/// Per-machine phase state machine.
pub mod controller;
/// CPU-model switch management.
pub mod cores;
/// Work-item counting against the warm and measure budgets.
pub mod counter;
/// Simulation engine interface and the scripted replay engine.
pub mod engine;
/// Single-machine run loop.
pub mod experiment;
/// Guest run-script rendering.
pub mod script;
/// Engine signal codec and guest protocol.
pub mod signal;
/// Run reports.
pub mod stats;
/// Dual-node synchronization.
pub mod sync;

/// Root configuration type; use `Config::default()` or load JSON with `Config::from_file`.
pub use crate::config::Config;
/// Per-machine state machine.
pub use crate::controller::PhaseController;
/// Crate-wide error.
pub use crate::common::OrchestratorError;
/// Single-machine driver.
pub use crate::experiment::Experiment;
/// Two-machine driver.
pub use crate::sync::DualNodeSynchronizer;
