//! Crate-wide error aggregation.
//!
//! Each component reports its own typed error. [`OrchestratorError`] collects them so the
//! run loops and the CLI can propagate with `?` and still classify the failure:
//! 1. **Fatal only:** every variant ends the experiment; nothing here is retried.
//! 2. **Exit status:** every failure maps onto one distinguished process exit code.
//!
//! Protocol anomalies (unknown or out-of-order signals) are never errors at this level;
//! the controller logs them and counts them in the run report.

use std::path::PathBuf;

use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::config::ConfigError;
use crate::controller::ControllerError;
use crate::cores::SwitchError;
use crate::engine::EngineError;
use crate::sync::SyncError;

/// Process exit statuses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExitStatus {
    /// `Done` reached and statistics dumped once (or a setup run checkpointed).
    Success,
    /// The experiment ended in `Failed` (interrupt, incomplete measurement).
    Failed,
    /// Invalid or missing configuration.
    Config,
    /// Checkpoint could not be saved, found or restored.
    Checkpoint,
    /// The engine or a CPU-model switch failed.
    Engine,
    /// Dual-node synchronization failed.
    Sync,
}

impl ExitStatus {
    /// Numeric process exit code.
    pub const fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Failed => 1,
            Self::Config => 2,
            Self::Checkpoint => 3,
            Self::Engine => 4,
            Self::Sync => 5,
        }
    }
}

/// Any failure that stops an experiment.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Configuration rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// CPU-model switch failed.
    #[error(transparent)]
    Switch(#[from] SwitchError),
    /// Checkpoint save, lookup or restore failed.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    /// The engine failed outside of a switch or checkpoint.
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// Dual-node synchronization failed.
    #[error(transparent)]
    Sync(#[from] SyncError),
    /// The controller was driven incorrectly or a guard tripped.
    #[error(transparent)]
    Controller(#[from] ControllerError),
    /// Host-side file I/O (reports, scripts, traces).
    #[error("I/O error at {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl OrchestratorError {
    /// Exit status for this failure.
    ///
    /// A missing core set, a missing checkpoint record and an invalid quantum/delay
    /// relationship are setup mistakes and report as configuration errors.
    pub const fn exit_status(&self) -> ExitStatus {
        match self {
            Self::Config(_)
            | Self::Io { .. }
            | Self::Checkpoint(CheckpointError::Missing { .. })
            | Self::Switch(SwitchError::MissingCoreSet { .. })
            | Self::Sync(SyncError::Config(_)) => ExitStatus::Config,
            Self::Checkpoint(_) => ExitStatus::Checkpoint,
            Self::Switch(_) | Self::Engine(_) | Self::Controller(_) => ExitStatus::Engine,
            Self::Sync(_) => ExitStatus::Sync,
        }
    }

    /// Numeric process exit code.
    pub const fn exit_code(&self) -> i32 {
        self.exit_status().code()
    }
}
