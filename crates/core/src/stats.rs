//! Per-run reporting.
//!
//! This module records what an experiment did on one machine. It provides:
//! 1. **Phase history:** every phase entered, with the tick it was entered at.
//! 2. **Outcome:** completed, checkpointed or failed (with the reason).
//! 3. **Side effects:** statistics resets and dumps, core switches and checkpoints.
//! 4. **Invocations:** warm-up and measured invocation counts, protocol anomalies.

use std::fmt;

use serde::Serialize;

use crate::checkpoint::CheckpointRecord;
use crate::common::{ExitStatus, NodeId, Tick};
use crate::config::Mode;
use crate::controller::ExperimentPhase;

/// Why a run ended in `Failed`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailReason {
    /// Operator interrupt.
    UserInterrupt,
    /// The guest finished before measurement completed.
    IncompleteMeasurement,
    /// The other machine of a dual-node run failed.
    PeerFailed,
    /// A fatal error stopped the run.
    Fatal(String),
}

impl fmt::Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserInterrupt => f.write_str("user interrupt"),
            Self::IncompleteMeasurement => f.write_str("measurement incomplete"),
            Self::PeerFailed => f.write_str("peer node failed"),
            Self::Fatal(msg) => write!(f, "fatal: {msg}"),
        }
    }
}

/// How a run ended.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// Not finished yet.
    #[default]
    Running,
    /// Reached `Done` with statistics dumped once.
    Completed,
    /// Setup run persisted its checkpoint and halted.
    Checkpointed {
        /// Last checkpoint written.
        record: CheckpointRecord,
    },
    /// Reached `Failed`; measurement data must be discarded.
    Failed {
        /// Cause.
        reason: FailReason,
    },
}

impl Outcome {
    /// Whether the run ended successfully.
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Completed | Self::Checkpointed { .. })
    }
}

/// A phase entry in the history.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PhaseEntry {
    /// Phase entered.
    pub phase: ExperimentPhase,
    /// Tick of entry.
    pub tick: Tick,
}

/// Valid section identifiers for [`RunReport::print_sections`].
pub const REPORT_SECTIONS: &[&str] = &["summary", "phases", "invocations", "side_effects"];

/// Everything a run did on one machine.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunReport {
    /// Machine.
    pub node: NodeId,
    /// Operating mode.
    pub mode: Mode,
    /// Workload.
    pub workload: String,
    /// Phases entered, in order.
    pub phases: Vec<PhaseEntry>,
    /// Result.
    pub outcome: Outcome,
    /// Statistics resets issued.
    pub stats_resets: u32,
    /// Statistics dumps issued.
    pub stats_dumps: u32,
    /// CPU-model switches performed.
    pub core_switches: u32,
    /// Checkpoints written.
    pub checkpoints: Vec<CheckpointRecord>,
    /// Invocations completed during warm-up.
    pub warm_invocations: u64,
    /// Invocations completed during measurement.
    pub measured_invocations: u64,
    /// Ignored or unmatched signals.
    pub anomalies: u32,
    /// Tick the run started at.
    pub start_tick: Tick,
    /// Tick the run ended at.
    pub end_tick: Tick,
    /// Host wall-clock time spent.
    pub host_seconds: f64,
}

impl RunReport {
    /// Empty report for a run that has not started.
    pub fn new(node: NodeId, mode: Mode, workload: impl Into<String>) -> Self {
        Self {
            node,
            mode,
            workload: workload.into(),
            phases: Vec::new(),
            outcome: Outcome::Running,
            stats_resets: 0,
            stats_dumps: 0,
            core_switches: 0,
            checkpoints: Vec::new(),
            warm_invocations: 0,
            measured_invocations: 0,
            anomalies: 0,
            start_tick: Tick::ZERO,
            end_tick: Tick::ZERO,
            host_seconds: 0.0,
        }
    }

    /// The phases entered, without ticks.
    pub fn phase_sequence(&self) -> Vec<ExperimentPhase> {
        self.phases.iter().map(|e| e.phase).collect()
    }

    /// Last phase entered.
    pub fn final_phase(&self) -> Option<ExperimentPhase> {
        self.phases.last().map(|e| e.phase)
    }

    /// Process exit status this run maps to.
    pub const fn exit_status(&self) -> ExitStatus {
        match self.outcome {
            Outcome::Completed | Outcome::Checkpointed { .. } => ExitStatus::Success,
            Outcome::Running | Outcome::Failed { .. } => ExitStatus::Failed,
        }
    }

    /// Prints only the requested sections to stdout.
    ///
    /// # Arguments
    ///
    /// * `sections` - Names from [`REPORT_SECTIONS`], or empty for all.
    pub fn print_sections(&self, sections: &[String]) {
        let want = |s: &str| sections.is_empty() || sections.iter().any(|x| x == s);
        let sim_us = (self.end_tick - self.start_tick).as_micros();

        println!("==========================================================");
        println!("EXPERIMENT REPORT [{}]", self.node);
        println!("==========================================================");
        if want("summary") {
            println!("workload                 {}", self.workload);
            println!("mode                     {}", self.mode);
            println!("outcome                  {}", self.outcome);
            println!("final_phase              {}", self.final_phase().map_or_else(|| "-".to_owned(), |p| p.to_string()));
            println!("sim_ticks                {} -> {}", self.start_tick, self.end_tick);
            println!("sim_us                   {sim_us}");
            println!("host_seconds             {:.4} s", self.host_seconds);
            println!("----------------------------------------------------------");
        }
        if want("phases") {
            println!("PHASES");
            for entry in &self.phases {
                println!("  {:<22} @ {}", entry.phase.to_string(), entry.tick);
            }
            println!("----------------------------------------------------------");
        }
        if want("invocations") {
            println!("INVOCATIONS");
            println!("  warm                   {}", self.warm_invocations);
            println!("  measured               {}", self.measured_invocations);
            println!("  anomalies              {}", self.anomalies);
            println!("----------------------------------------------------------");
        }
        if want("side_effects") {
            println!("SIDE EFFECTS");
            println!("  stats_resets           {}", self.stats_resets);
            println!("  stats_dumps            {}", self.stats_dumps);
            println!("  core_switches          {}", self.core_switches);
            println!("  checkpoints            {}", self.checkpoints.len());
            for record in &self.checkpoints {
                println!("    {:<6} {}", record.phase_tag.as_str(), record.path.display());
            }
            println!("----------------------------------------------------------");
        }
    }

    /// Prints every section to stdout.
    pub fn print(&self) {
        self.print_sections(&[]);
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => f.write_str("running"),
            Self::Completed => f.write_str("completed"),
            Self::Checkpointed { record } => write!(f, "checkpointed ({})", record.phase_tag),
            Self::Failed { reason } => write!(f, "failed ({reason})"),
        }
    }
}
