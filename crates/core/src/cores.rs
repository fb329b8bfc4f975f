//! CPU-model switch management.
//!
//! Each simulated machine is built with up to three core sets that share one architectural
//! state:
//! 1. **Boot:** a fast, usually virtualized, core used to boot the guest and set up the container.
//! 2. **Warm:** a functional core that warms caches and predictors without timing detail.
//! 3. **Measure:** the detailed timing core the statistics window is collected on.
//!
//! Exactly one set is active on every logical core at a time. [`CoreSwitchManager`]
//! owns the bookkeeping for one machine, checks the switch preconditions against what
//! the engine reports, performs the switch, and verifies the postconditions before
//! returning. A switch is never a reset: committed instruction counts must carry over.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::common::NodeId;
use crate::engine::{EngineError, SimEngine};

/// Role of a core set within the experiment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoreKind {
    /// Fast boot/IO core.
    Boot,
    /// Functional warming core.
    Warm,
    /// Detailed measurement core.
    Measure,
}

impl CoreKind {
    /// All roles, in the order an experiment normally visits them.
    pub const ALL: [Self; 3] = [Self::Boot, Self::Warm, Self::Measure];

    const fn index(self) -> usize {
        match self {
            Self::Boot => 0,
            Self::Warm => 1,
            Self::Measure => 2,
        }
    }
}

impl fmt::Display for CoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Boot => "boot",
            Self::Warm => "warm",
            Self::Measure => "measure",
        };
        f.write_str(name)
    }
}

/// Whether a core of a set is currently executing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoreState {
    /// Owns the architectural state and runs.
    Active,
    /// Holds no state; waiting to be switched in.
    SwitchedOut,
}

/// CPU timing model a core set is built from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum CpuModel {
    /// Hardware-virtualized execution; no timing.
    #[serde(alias = "KVM")]
    Kvm,
    /// Functional execution with atomic memory accesses.
    Atomic,
    /// Simple in-order timing.
    Timing,
    /// Pipelined in-order core.
    Minor,
    /// Detailed out-of-order core.
    O3,
}

impl fmt::Display for CpuModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The core sets one machine was constructed with and which of them is active.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoreSet {
    models: [Option<CpuModel>; 3],
    active: CoreKind,
}

impl CoreSet {
    /// Describes a machine built with the given models, starting on `active`.
    pub const fn new(
        boot: Option<CpuModel>,
        warm: Option<CpuModel>,
        measure: Option<CpuModel>,
        active: CoreKind,
    ) -> Self {
        Self {
            models: [boot, warm, measure],
            active,
        }
    }

    /// Model backing `kind`, if that set exists.
    pub const fn model(&self, kind: CoreKind) -> Option<CpuModel> {
        self.models[kind.index()]
    }

    /// Whether `kind` was constructed.
    pub const fn has(&self, kind: CoreKind) -> bool {
        self.model(kind).is_some()
    }

    /// The active set.
    pub const fn active(&self) -> CoreKind {
        self.active
    }
}

/// Failures of a CPU-model switch.
#[derive(Debug, Error)]
pub enum SwitchError {
    /// The requested set was never constructed. A configuration mistake; never retried.
    #[error("{node}: core set {kind} was never constructed")]
    MissingCoreSet {
        /// Machine.
        node: NodeId,
        /// Missing set.
        kind: CoreKind,
    },
    /// Switching a set onto itself.
    #[error("{node}: cannot switch core set {kind} onto itself")]
    SameSet {
        /// Machine.
        node: NodeId,
        /// The set named twice.
        kind: CoreKind,
    },
    /// The set to switch away from is not active on some core.
    #[error("{node}: core set {kind} is not active on core {core}")]
    NotActive {
        /// Machine.
        node: NodeId,
        /// Set expected to be active.
        kind: CoreKind,
        /// First offending core.
        core: usize,
    },
    /// The set to switch to is already running on some core.
    #[error("{node}: core set {kind} is not switched out on core {core}")]
    NotSwitchedOut {
        /// Machine.
        node: NodeId,
        /// Set expected to be switched out.
        kind: CoreKind,
        /// First offending core.
        core: usize,
    },
    /// The engine returned but the new set is not active everywhere.
    #[error("{node}: switch to {kind} incomplete on core {core}")]
    Incomplete {
        /// Machine.
        node: NodeId,
        /// Set that should now be active.
        kind: CoreKind,
        /// First offending core.
        core: usize,
    },
    /// Committed instructions went backwards across the switch.
    #[error("{node}: instruction count regressed across switch ({before} -> {after})")]
    CounterRegression {
        /// Machine.
        node: NodeId,
        /// Count before the switch.
        before: u64,
        /// Count after the switch.
        after: u64,
    },
    /// The engine itself failed.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Performs and verifies CPU-model switches for one machine.
#[derive(Debug)]
pub struct CoreSwitchManager {
    node: NodeId,
    set: CoreSet,
    switches: u32,
}

impl CoreSwitchManager {
    /// Creates a manager for `node` whose machine was built as `set`.
    ///
    /// # Errors
    ///
    /// [`SwitchError::MissingCoreSet`] when the set marked active does not exist.
    pub fn new(node: NodeId, set: CoreSet) -> Result<Self, SwitchError> {
        if !set.has(set.active) {
            return Err(SwitchError::MissingCoreSet {
                node,
                kind: set.active,
            });
        }
        Ok(Self {
            node,
            set,
            switches: 0,
        })
    }

    /// Currently active set.
    pub const fn active(&self) -> CoreKind {
        self.set.active
    }

    /// The machine's core sets.
    pub const fn core_set(&self) -> &CoreSet {
        &self.set
    }

    /// Number of switches performed.
    pub const fn switches(&self) -> u32 {
        self.switches
    }

    /// Checks that the engine agrees `kind` is active on every core.
    ///
    /// # Errors
    ///
    /// [`SwitchError::MissingCoreSet`] or [`SwitchError::NotActive`].
    pub fn verify_active<E: SimEngine + ?Sized>(
        &self,
        engine: &E,
        kind: CoreKind,
    ) -> Result<(), SwitchError> {
        for core in 0..engine.num_cores() {
            match engine.core_state(kind, core) {
                None => {
                    return Err(SwitchError::MissingCoreSet {
                        node: self.node,
                        kind,
                    });
                }
                Some(CoreState::SwitchedOut) => {
                    return Err(SwitchError::NotActive {
                        node: self.node,
                        kind,
                        core,
                    });
                }
                Some(CoreState::Active) => {}
            }
        }
        Ok(())
    }

    /// Switches the machine from `from` to `to`.
    ///
    /// Preconditions (checked on every logical core): `from` is active and `to` is
    /// switched out. When this returns `Ok`, `to` is active everywhere, `from` is
    /// switched out, and the committed instruction count did not decrease.
    ///
    /// # Arguments
    ///
    /// * `engine` - The machine to switch.
    /// * `from` - The set expected to be active.
    /// * `to` - The set to activate.
    ///
    /// # Errors
    ///
    /// Any [`SwitchError`]; a missing set is fatal and must not be retried.
    pub fn switch<E: SimEngine + ?Sized>(
        &mut self,
        engine: &mut E,
        from: CoreKind,
        to: CoreKind,
    ) -> Result<(), SwitchError> {
        let node = self.node;
        if from == to {
            return Err(SwitchError::SameSet { node, kind: to });
        }
        for kind in [from, to] {
            if !self.set.has(kind) {
                return Err(SwitchError::MissingCoreSet { node, kind });
            }
        }

        self.verify_active(engine, from)?;
        for core in 0..engine.num_cores() {
            match engine.core_state(to, core) {
                None => return Err(SwitchError::MissingCoreSet { node, kind: to }),
                Some(CoreState::Active) => {
                    return Err(SwitchError::NotSwitchedOut {
                        node,
                        kind: to,
                        core,
                    });
                }
                Some(CoreState::SwitchedOut) => {}
            }
        }

        let before = engine.total_instructions();
        info!(
            %node,
            from = %from,
            to = %to,
            model = ?self.set.model(to),
            "switching core set"
        );
        engine.switch_cores(from, to)?;

        for core in 0..engine.num_cores() {
            if engine.core_state(to, core) != Some(CoreState::Active)
                || engine.core_state(from, core) != Some(CoreState::SwitchedOut)
            {
                return Err(SwitchError::Incomplete {
                    node,
                    kind: to,
                    core,
                });
            }
        }
        let after = engine.total_instructions();
        if after < before {
            return Err(SwitchError::CounterRegression {
                node,
                before,
                after,
            });
        }

        self.set.active = to;
        self.switches += 1;
        debug!(%node, insts = after, "switch complete");
        Ok(())
    }

    /// Makes `to` the active set, switching from whatever is active now.
    ///
    /// # Returns
    ///
    /// `true` if a switch was performed, `false` if `to` was already active.
    ///
    /// # Errors
    ///
    /// As [`CoreSwitchManager::switch`].
    pub fn switch_to<E: SimEngine + ?Sized>(
        &mut self,
        engine: &mut E,
        to: CoreKind,
    ) -> Result<bool, SwitchError> {
        let from = self.set.active;
        if from == to {
            return Ok(false);
        }
        self.switch(engine, from, to)?;
        Ok(true)
    }
}
