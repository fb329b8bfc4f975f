//! Configuration for experiment orchestration.
//!
//! This module defines the operator-facing configuration consumed by the controller,
//! the synchronizer and the script renderer. It provides:
//! 1. **Defaults:** Baseline values matching the reference serverless experiments.
//! 2. **Structures:** Experiment, checkpoint, core-set, topology, sync and guest sections.
//! 3. **Validation:** Fail-fast checks for budgets, required core sets and the
//!    link-delay/quantum causality margin.
//!
//! Configuration is supplied as JSON (`Config::from_file`) or built with `Config::default()`.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::checkpoint::CheckpointTag;
use crate::common::Tick;
use crate::cores::{CoreKind, CoreSet, CpuModel};

/// Default configuration constants.
mod defaults {
    use crate::common::Tick;
    use crate::cores::CpuModel;

    /// Function deployed in the guest when none is named.
    pub const WORKLOAD: &str = "helloworld";

    /// Warm budget; inactive, so warm-up ends on the guest's warm-done marker.
    pub const WARM_INVOCATIONS: i64 = -1;

    /// Measured invocations per run.
    pub const MEASURE_INVOCATIONS: i64 = 20;

    /// Checkpoint root directory.
    pub const CHECKPOINT_DIR: &str = "cpt_1m";

    /// Boot core model (hardware virtualization).
    pub const BOOT_MODEL: CpuModel = CpuModel::Kvm;

    /// Warm-up core model.
    pub const WARM_MODEL: CpuModel = CpuModel::Atomic;

    /// Measurement core model.
    pub const MEASURE_MODEL: CpuModel = CpuModel::O3;

    /// Logical cores per core set on the system under test.
    pub const NUM_CORES: usize = 2;

    /// Logical cores per core set on the driving node.
    pub const DRIVER_CORES: usize = 1;

    /// Synchronization quantum (50 us).
    pub const QUANTUM: Tick = Tick::from_micros(50);

    /// Required link-delay multiple of the quantum.
    pub const SAFETY_FACTOR: f64 = 2.0;

    /// Compose file that defines the function container.
    pub const COMPOSE_FILE: &str = "/root/functions.yaml";

    /// Container name used by `docker update`.
    pub const CONTAINER: &str = "function";

    /// Host core the container is pinned to.
    pub const PIN_CORE: u32 = 1;

    /// Guest test client binary.
    pub const CLIENT: &str = "/root/test-client";

    /// Address the client reaches the function at.
    pub const URL: &str = "localhost";

    /// Function port.
    pub const PORT: u16 = 50000;

    /// Client request input size.
    pub const INPUT: u32 = 10;

    /// Seconds to wait after pinning before starting the client.
    pub const SETTLE_SECS: u32 = 5;

    /// Functional warming requests issued by the client before the measured ones.
    pub const FUNCTIONAL_WARM_REQUESTS: u64 = 5000;

    /// Address of the system under test on the simulated network.
    pub const TEST_IP: &str = "10.0.2.17";

    /// Address of the driving node.
    pub const DRIVE_IP: &str = "10.0.2.18";

    /// Guest network interface.
    pub const DEVICE: &str = "enp0s2";
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read configuration {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The JSON did not match the schema.
    #[error("invalid configuration JSON: {0}")]
    Parse(#[from] serde_json::Error),
    /// No workload named.
    #[error("experiment.workload must not be empty")]
    EmptyWorkload,
    /// A budget of exactly zero can never be exhausted by counting.
    #[error("experiment.{which} must be positive, or negative to disable it (got 0)")]
    ZeroBudget {
        /// Field name.
        which: &'static str,
    },
    /// A mode needs a core set that is not configured.
    #[error("{mode} mode requires the {kind} core set")]
    MissingCoreSet {
        /// Operating mode.
        mode: Mode,
        /// Required set.
        kind: CoreKind,
    },
    /// Zero logical cores.
    #[error("cores.{which} must be at least 1")]
    ZeroCores {
        /// Field name.
        which: &'static str,
    },
    /// Quantum of zero ticks.
    #[error("sync.quantum must be positive")]
    ZeroQuantum,
    /// Safety factor below one or not a number.
    #[error("sync.safety_factor must be >= 1.0 (got {0})")]
    InvalidSafetyFactor(f64),
    /// A packet could arrive inside the quantum it was sent in.
    #[error("link delay {delay} must exceed the quantum {quantum}")]
    LinkDelayTooShort {
        /// Configured delay.
        delay: Tick,
        /// Configured quantum.
        quantum: Tick,
    },
    /// Delay exceeds the quantum but not by the configured margin.
    #[error("link delay {delay} must be at least {factor} x quantum {quantum}")]
    InsufficientMargin {
        /// Configured delay.
        delay: Tick,
        /// Configured quantum.
        quantum: Tick,
        /// Required multiple.
        factor: f64,
    },
}

/// Operating mode of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Mode {
    /// Boot on the fast core, checkpoint, halt.
    #[default]
    #[serde(alias = "setup")]
    Setup,
    /// Restore a checkpoint and measure.
    #[serde(alias = "evaluation")]
    Evaluation,
    /// Boot on the fast core and carry on through warm-up and measurement in one
    /// run, switching cores in place. No checkpoint is written or read.
    #[serde(alias = "full")]
    Full,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Setup => "setup",
            Self::Evaluation => "evaluation",
            Self::Full => "full",
        })
    }
}

/// Where a setup run checkpoints and halts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum SaveAt {
    /// At the container-pinned boundary (post-boot checkpoint only).
    #[default]
    #[serde(alias = "pinned")]
    Pinned,
    /// Post-boot checkpoint at the pinned boundary, then post-warm at warm-up completion.
    #[serde(alias = "warm")]
    Warm,
}

impl SaveAt {
    /// Tags a setup run with this setting writes, in order.
    pub const fn tags(self) -> &'static [CheckpointTag] {
        match self {
            Self::Pinned => &[CheckpointTag::Boot],
            Self::Warm => &[CheckpointTag::Boot, CheckpointTag::Warm],
        }
    }
}

/// Number of simulated machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Topology {
    /// One machine.
    #[default]
    #[serde(alias = "single")]
    Single,
    /// System under test plus a driving peer on a delayed link.
    #[serde(alias = "dual")]
    Dual,
}

/// Root configuration.
///
/// # Examples
///
/// ```
/// use simphase_core::config::{Config, Mode};
///
/// let json = r#"{
///     "experiment": {
///         "mode": "Evaluation",
///         "workload": "fibonacci-go",
///         "warm_invocations": 5000,
///         "measure_invocations": 20
///     },
///     "checkpoint": { "resume_from": "boot" }
/// }"#;
/// let config = Config::from_json_str(json).unwrap();
/// assert_eq!(config.experiment.mode, Mode::Evaluation);
/// assert_eq!(config.cores.num_cores, 2);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Mode, workload and budgets.
    #[serde(default)]
    pub experiment: ExperimentConfig,
    /// Checkpoint location and resume tag.
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    /// CPU models per core set.
    #[serde(default)]
    pub cores: CoreConfig,
    /// Single or dual machine.
    #[serde(default)]
    pub topology: Topology,
    /// Dual-node synchronization.
    #[serde(default)]
    pub sync: SyncConfig,
    /// Guest run-script parameters.
    #[serde(default)]
    pub guest: GuestConfig,
}

impl Config {
    /// Parses and validates a JSON configuration.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed JSON, or any validation error.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] when the file cannot be read, otherwise as
    /// [`Config::from_json_str`].
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Checks the configuration for setup mistakes.
    ///
    /// # Errors
    ///
    /// The first violated rule, as a [`ConfigError`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let exp = &self.experiment;
        if exp.workload.trim().is_empty() {
            return Err(ConfigError::EmptyWorkload);
        }
        if exp.warm_invocations == 0 {
            return Err(ConfigError::ZeroBudget {
                which: "warm_invocations",
            });
        }
        if exp.measure_invocations == 0 {
            return Err(ConfigError::ZeroBudget {
                which: "measure_invocations",
            });
        }
        if self.cores.num_cores == 0 {
            return Err(ConfigError::ZeroCores { which: "num_cores" });
        }
        if self.cores.driver_cores == 0 {
            return Err(ConfigError::ZeroCores {
                which: "driver_cores",
            });
        }

        let required: &[CoreKind] = match exp.mode {
            Mode::Setup => &[CoreKind::Boot],
            Mode::Evaluation => &[CoreKind::Measure],
            Mode::Full => &[CoreKind::Boot, CoreKind::Measure],
        };
        if let Some(&kind) = required.iter().find(|k| self.cores.model(**k).is_none()) {
            return Err(ConfigError::MissingCoreSet {
                mode: exp.mode,
                kind,
            });
        }

        if self.topology == Topology::Dual {
            self.sync.validate()?;
        }
        Ok(())
    }

    /// Core sets a machine of this experiment is built with, and the set it starts on.
    pub const fn core_set(&self) -> CoreSet {
        let c = &self.cores;
        CoreSet::new(c.boot, c.warm, c.measure, self.initial_core_set())
    }

    /// Set a machine starts on.
    ///
    /// Setup and full runs boot on the boot set. Evaluation restores onto the warm set (or the
    /// measure set when none is configured) for a post-boot checkpoint, and onto the
    /// measure set for a post-warm checkpoint.
    pub const fn initial_core_set(&self) -> CoreKind {
        match (self.experiment.mode, self.checkpoint.resume_from) {
            (Mode::Setup | Mode::Full, _) => CoreKind::Boot,
            (Mode::Evaluation, CheckpointTag::Boot) if self.cores.warm.is_some() => CoreKind::Warm,
            (Mode::Evaluation, _) => CoreKind::Measure,
        }
    }
}

/// Experiment mode, workload and invocation budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Setup, evaluation or full.
    #[serde(default)]
    pub mode: Mode,

    /// Function deployed in the guest; also the checkpoint key.
    #[serde(default = "ExperimentConfig::default_workload")]
    pub workload: String,

    /// Invocations counted in warm-up. Negative disables the budget.
    #[serde(default = "ExperimentConfig::default_warm")]
    pub warm_invocations: i64,

    /// Invocations counted in measurement. Negative disables the budget.
    #[serde(default = "ExperimentConfig::default_measure")]
    pub measure_invocations: i64,

    /// Where a setup run checkpoints.
    #[serde(default)]
    pub save_at: SaveAt,
}

impl ExperimentConfig {
    fn default_workload() -> String {
        defaults::WORKLOAD.to_owned()
    }

    const fn default_warm() -> i64 {
        defaults::WARM_INVOCATIONS
    }

    const fn default_measure() -> i64 {
        defaults::MEASURE_INVOCATIONS
    }
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            workload: Self::default_workload(),
            warm_invocations: defaults::WARM_INVOCATIONS,
            measure_invocations: defaults::MEASURE_INVOCATIONS,
            save_at: SaveAt::default(),
        }
    }
}

/// Checkpoint location and resume selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Root directory; checkpoints live at `<dir>/<workload>/cpt.<tag>`.
    #[serde(default = "CheckpointConfig::default_dir")]
    pub dir: PathBuf,

    /// Tag an evaluation run restores.
    #[serde(default = "CheckpointConfig::default_resume")]
    pub resume_from: CheckpointTag,
}

impl CheckpointConfig {
    fn default_dir() -> PathBuf {
        PathBuf::from(defaults::CHECKPOINT_DIR)
    }

    const fn default_resume() -> CheckpointTag {
        CheckpointTag::Warm
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: Self::default_dir(),
            resume_from: Self::default_resume(),
        }
    }
}

/// CPU models per core set. A `null` model leaves that set unconstructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Boot set.
    #[serde(default = "CoreConfig::default_boot")]
    pub boot: Option<CpuModel>,

    /// Warm-up set.
    #[serde(default = "CoreConfig::default_warm")]
    pub warm: Option<CpuModel>,

    /// Measurement set.
    #[serde(default = "CoreConfig::default_measure")]
    pub measure: Option<CpuModel>,

    /// Logical cores per set on the system under test.
    #[serde(default = "CoreConfig::default_num_cores")]
    pub num_cores: usize,

    /// Logical cores per set on the driving node.
    #[serde(default = "CoreConfig::default_driver_cores")]
    pub driver_cores: usize,
}

impl CoreConfig {
    const fn default_boot() -> Option<CpuModel> {
        Some(defaults::BOOT_MODEL)
    }

    const fn default_warm() -> Option<CpuModel> {
        Some(defaults::WARM_MODEL)
    }

    const fn default_measure() -> Option<CpuModel> {
        Some(defaults::MEASURE_MODEL)
    }

    const fn default_num_cores() -> usize {
        defaults::NUM_CORES
    }

    const fn default_driver_cores() -> usize {
        defaults::DRIVER_CORES
    }

    /// Model configured for `kind`.
    pub const fn model(&self, kind: CoreKind) -> Option<CpuModel> {
        match kind {
            CoreKind::Boot => self.boot,
            CoreKind::Warm => self.warm,
            CoreKind::Measure => self.measure,
        }
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            boot: Self::default_boot(),
            warm: Self::default_warm(),
            measure: Self::default_measure(),
            num_cores: defaults::NUM_CORES,
            driver_cores: defaults::DRIVER_CORES,
        }
    }
}

/// Dual-node synchronization parameters. All times are in ticks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Maximum simulated time either machine may run ahead between sync points.
    #[serde(default = "SyncConfig::default_quantum")]
    pub quantum: Tick,

    /// Link propagation delay. Defaults to `2 * quantum`.
    #[serde(default)]
    pub link_delay: Option<Tick>,

    /// The delay must be at least `safety_factor * quantum`.
    #[serde(default = "SyncConfig::default_safety_factor")]
    pub safety_factor: f64,

    /// Hold each machine at the warm/measure boundary until both reach it.
    #[serde(default = "SyncConfig::default_barrier")]
    pub barrier: bool,
}

impl SyncConfig {
    const fn default_quantum() -> Tick {
        defaults::QUANTUM
    }

    const fn default_safety_factor() -> f64 {
        defaults::SAFETY_FACTOR
    }

    const fn default_barrier() -> bool {
        true
    }

    /// Link delay after applying the default.
    pub const fn effective_link_delay(&self) -> Tick {
        match self.link_delay {
            Some(delay) => delay,
            None => Tick(self.quantum.0.saturating_mul(2)),
        }
    }

    /// Checks the causality contract between link delay and quantum.
    ///
    /// A delay not strictly above the quantum always fails; a delay above the quantum
    /// but below `safety_factor * quantum` fails with [`ConfigError::InsufficientMargin`].
    ///
    /// # Errors
    ///
    /// [`ConfigError::ZeroQuantum`], [`ConfigError::InvalidSafetyFactor`],
    /// [`ConfigError::LinkDelayTooShort`] or [`ConfigError::InsufficientMargin`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let quantum = self.quantum;
        let delay = self.effective_link_delay();
        let factor = self.safety_factor;
        if quantum == Tick::ZERO {
            return Err(ConfigError::ZeroQuantum);
        }
        if factor.is_nan() || factor < 1.0 {
            return Err(ConfigError::InvalidSafetyFactor(factor));
        }
        if delay <= quantum {
            return Err(ConfigError::LinkDelayTooShort { delay, quantum });
        }
        if (delay.val() as f64) < factor * quantum.val() as f64 {
            return Err(ConfigError::InsufficientMargin {
                delay,
                quantum,
                factor,
            });
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            quantum: defaults::QUANTUM,
            link_delay: None,
            safety_factor: defaults::SAFETY_FACTOR,
            barrier: true,
        }
    }
}

/// Parameters of the guest run-script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestConfig {
    /// Compose file defining the function container.
    #[serde(default = "GuestConfig::default_compose_file")]
    pub compose_file: String,

    /// Container name.
    #[serde(default = "GuestConfig::default_container")]
    pub container: String,

    /// Guest core the container is pinned to.
    #[serde(default = "GuestConfig::default_pin_core")]
    pub pin_core: u32,

    /// Test client binary.
    #[serde(default = "GuestConfig::default_client")]
    pub client: String,

    /// Address of the function as seen by the client.
    #[serde(default = "GuestConfig::default_url")]
    pub url: String,

    /// Function port.
    #[serde(default = "GuestConfig::default_port")]
    pub port: u16,

    /// Request input size.
    #[serde(default = "GuestConfig::default_input")]
    pub input: u32,

    /// Seconds to settle after pinning.
    #[serde(default = "GuestConfig::default_settle")]
    pub settle_secs: u32,

    /// Functional warming requests (`-w`) when the warm budget is inactive.
    #[serde(default = "GuestConfig::default_functional_warm")]
    pub functional_warm_requests: u64,

    /// Address of the system under test.
    #[serde(default = "GuestConfig::default_test_ip")]
    pub test_ip: String,

    /// Address of the driving node.
    #[serde(default = "GuestConfig::default_drive_ip")]
    pub drive_ip: String,

    /// Guest network interface.
    #[serde(default = "GuestConfig::default_device")]
    pub device: String,
}

impl GuestConfig {
    fn default_compose_file() -> String {
        defaults::COMPOSE_FILE.to_owned()
    }

    fn default_container() -> String {
        defaults::CONTAINER.to_owned()
    }

    const fn default_pin_core() -> u32 {
        defaults::PIN_CORE
    }

    fn default_client() -> String {
        defaults::CLIENT.to_owned()
    }

    fn default_url() -> String {
        defaults::URL.to_owned()
    }

    const fn default_port() -> u16 {
        defaults::PORT
    }

    const fn default_input() -> u32 {
        defaults::INPUT
    }

    const fn default_settle() -> u32 {
        defaults::SETTLE_SECS
    }

    const fn default_functional_warm() -> u64 {
        defaults::FUNCTIONAL_WARM_REQUESTS
    }

    fn default_test_ip() -> String {
        defaults::TEST_IP.to_owned()
    }

    fn default_drive_ip() -> String {
        defaults::DRIVE_IP.to_owned()
    }

    fn default_device() -> String {
        defaults::DEVICE.to_owned()
    }
}

impl Default for GuestConfig {
    fn default() -> Self {
        Self {
            compose_file: Self::default_compose_file(),
            container: Self::default_container(),
            pin_core: defaults::PIN_CORE,
            client: Self::default_client(),
            url: Self::default_url(),
            port: defaults::PORT,
            input: defaults::INPUT,
            settle_secs: defaults::SETTLE_SECS,
            functional_warm_requests: defaults::FUNCTIONAL_WARM_REQUESTS,
            test_ip: Self::default_test_ip(),
            drive_ip: Self::default_drive_ip(),
            device: Self::default_device(),
        }
    }
}
