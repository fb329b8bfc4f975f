//! Checkpoint management.
//!
//! Checkpoints are whole-machine snapshots keyed by `(workload, node, tag)` and stored
//! at `<root>/<workload>/<node>/cpt.<tag>`, so the two machines of a dual-node run
//! never share a snapshot. The snapshot files inside are written by the engine
//! and are opaque here; alongside them the manager writes a small `record.json`
//! manifest so an evaluation run can find, and sanity-check, what a setup run left
//! behind.
//!
//! Saving is synchronous: the engine pauses the machine clock, serializes, resumes,
//! and only then does the controller handle the next signal. Overwriting an existing
//! `(workload, tag)` pair is allowed and not guarded.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::common::{NodeId, Tick};
use crate::engine::{EngineError, SimEngine};

/// Name of the manifest written next to the engine's snapshot files.
pub const MANIFEST_FILE: &str = "record.json";

/// Which experiment boundary a checkpoint captures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointTag {
    /// Post-boot: guest booted, container started and pinned.
    #[serde(alias = "Boot")]
    Boot,
    /// Post-warm: warm-up invocations done.
    #[serde(alias = "Warm")]
    Warm,
}

impl CheckpointTag {
    /// Directory-name suffix.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Boot => "boot",
            Self::Warm => "warm",
        }
    }
}

impl fmt::Display for CheckpointTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted checkpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Workload the checkpoint belongs to.
    pub workload_id: String,
    /// Machine the snapshot was taken from.
    #[serde(default)]
    pub node: NodeId,
    /// Boundary captured.
    pub phase_tag: CheckpointTag,
    /// Directory holding the snapshot.
    pub path: PathBuf,
    /// Machine tick when saved.
    pub tick: Tick,
    /// Committed instructions when saved.
    pub instructions: u64,
}

/// Checkpoint failures. All are fatal.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// No record exists for the requested pair.
    #[error("no {tag} checkpoint for workload '{workload}' at {path}")]
    Missing {
        /// Workload.
        workload: String,
        /// Tag.
        tag: CheckpointTag,
        /// Expected directory.
        path: PathBuf,
    },
    /// The checkpoint directory or manifest could not be accessed.
    #[error("checkpoint I/O failed at {path}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The manifest exists but is unreadable.
    #[error("bad checkpoint manifest {path}: {source}")]
    Manifest {
        /// Manifest path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
    /// The manifest names another workload, node or tag than its location implies.
    #[error("checkpoint at {path} belongs to {found_workload}/{found_node}/{found_tag}")]
    Mismatch {
        /// Directory.
        path: PathBuf,
        /// Workload in the manifest.
        found_workload: String,
        /// Machine in the manifest.
        found_node: NodeId,
        /// Tag in the manifest.
        found_tag: CheckpointTag,
    },
    /// Restore attempted on a machine that already runs.
    #[error("checkpoints can only be restored before the run loop starts")]
    RestoreAfterStart,
    /// The engine failed while saving or restoring.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Saves and locates one machine's checkpoints under a root directory.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    root: PathBuf,
    node: NodeId,
    saved: Vec<CheckpointRecord>,
}

impl CheckpointManager {
    /// Manager rooted at `root` for [`NodeId::PRIMARY`].
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            node: NodeId::PRIMARY,
            saved: Vec::new(),
        }
    }

    /// Scopes the manager to `node`'s checkpoints.
    #[must_use]
    pub const fn with_node(mut self, node: NodeId) -> Self {
        self.node = node;
        self
    }

    /// Machine whose checkpoints this manager handles.
    pub const fn node(&self) -> NodeId {
        self.node
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Records saved through this manager, oldest first.
    pub fn saved(&self) -> &[CheckpointRecord] {
        &self.saved
    }

    /// Directory for `(workload, tag)` of this manager's node.
    pub fn path_for(&self, workload: &str, tag: CheckpointTag) -> PathBuf {
        self.root
            .join(workload)
            .join(self.node.to_string())
            .join(format!("cpt.{tag}"))
    }

    /// Snapshots `engine` as `(workload, tag)`.
    ///
    /// # Arguments
    ///
    /// * `engine` - The paused-and-resumed machine.
    /// * `workload` - Workload key.
    /// * `tag` - Boundary being captured.
    ///
    /// # Returns
    ///
    /// The record of the new checkpoint.
    ///
    /// # Errors
    ///
    /// [`CheckpointError::Io`] when the directory or manifest cannot be written, and
    /// [`CheckpointError::Engine`] when the engine fails to serialize. Neither is retried.
    pub fn save<E: SimEngine + ?Sized>(
        &mut self,
        engine: &mut E,
        workload: &str,
        tag: CheckpointTag,
    ) -> Result<CheckpointRecord, CheckpointError> {
        let path = self.path_for(workload, tag);
        if path.exists() {
            warn!(path = %path.display(), "overwriting existing checkpoint");
        }
        fs::create_dir_all(&path).map_err(|source| CheckpointError::Io {
            path: path.clone(),
            source,
        })?;
        engine.save_checkpoint(&path)?;

        let record = CheckpointRecord {
            workload_id: workload.to_owned(),
            node: self.node,
            phase_tag: tag,
            path: path.clone(),
            tick: engine.cur_tick(),
            instructions: engine.total_instructions(),
        };
        let manifest = path.join(MANIFEST_FILE);
        let text =
            serde_json::to_string_pretty(&record).map_err(|source| CheckpointError::Manifest {
                path: manifest.clone(),
                source,
            })?;
        fs::write(&manifest, text).map_err(|source| CheckpointError::Io {
            path: manifest,
            source,
        })?;

        info!(workload, node = %self.node, tag = %tag, tick = %record.tick, path = %path.display(), "checkpoint saved");
        self.saved.push(record.clone());
        Ok(record)
    }

    /// Finds the record for `(workload, tag)`.
    ///
    /// # Errors
    ///
    /// [`CheckpointError::Missing`] when no manifest exists, otherwise
    /// [`CheckpointError::Io`], [`CheckpointError::Manifest`] or
    /// [`CheckpointError::Mismatch`].
    pub fn lookup(
        &self,
        workload: &str,
        tag: CheckpointTag,
    ) -> Result<CheckpointRecord, CheckpointError> {
        let path = self.path_for(workload, tag);
        let manifest = path.join(MANIFEST_FILE);
        let text = match fs::read_to_string(&manifest) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CheckpointError::Missing {
                    workload: workload.to_owned(),
                    tag,
                    path,
                });
            }
            Err(source) => {
                return Err(CheckpointError::Io {
                    path: manifest,
                    source,
                });
            }
        };
        let mut record: CheckpointRecord =
            serde_json::from_str(&text).map_err(|source| CheckpointError::Manifest {
                path: manifest,
                source,
            })?;
        if record.workload_id != workload || record.node != self.node || record.phase_tag != tag {
            return Err(CheckpointError::Mismatch {
                path,
                found_workload: record.workload_id,
                found_node: record.node,
                found_tag: record.phase_tag,
            });
        }
        // The tree may have been moved since it was written.
        record.path = path;
        Ok(record)
    }

    /// Builds `engine` from `record`. Only valid before the machine has started.
    ///
    /// # Errors
    ///
    /// [`CheckpointError::Mismatch`] when `record` was taken from another node,
    /// [`CheckpointError::RestoreAfterStart`] when the engine already runs, otherwise
    /// [`CheckpointError::Engine`].
    pub fn restore<E: SimEngine + ?Sized>(
        &self,
        engine: &mut E,
        record: &CheckpointRecord,
    ) -> Result<(), CheckpointError> {
        if record.node != self.node {
            return Err(CheckpointError::Mismatch {
                path: record.path.clone(),
                found_workload: record.workload_id.clone(),
                found_node: record.node,
                found_tag: record.phase_tag,
            });
        }
        match engine.restore(&record.path) {
            Ok(()) => {
                info!(
                    workload = %record.workload_id,
                    node = %record.node,
                    tag = %record.phase_tag,
                    tick = %engine.cur_tick(),
                    "checkpoint restored"
                );
                Ok(())
            }
            Err(EngineError::AlreadyInstantiated) => Err(CheckpointError::RestoreAfterStart),
            Err(e) => Err(e.into()),
        }
    }
}
