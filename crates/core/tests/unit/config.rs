//! # Configuration Tests
//!
//! Defaults, JSON deserialization, core-set selection and validation, including the
//! link-delay/quantum causality margin.

use std::path::PathBuf;

use rstest::rstest;
use simphase_core::checkpoint::CheckpointTag;
use simphase_core::common::Tick;
use simphase_core::config::*;
use simphase_core::cores::{CoreKind, CpuModel};

#[test]
fn test_config_default() {
    let config = Config::default();
    assert_eq!(config.experiment.mode, Mode::Setup);
    assert_eq!(config.experiment.workload, "helloworld");
    assert_eq!(config.experiment.warm_invocations, -1);
    assert_eq!(config.experiment.measure_invocations, 20);
    assert_eq!(config.experiment.save_at, SaveAt::Pinned);
    assert_eq!(config.topology, Topology::Single);
    assert!(config.validate().is_ok());
}

#[test]
fn test_checkpoint_and_core_defaults() {
    let config = Config::default();
    assert_eq!(config.checkpoint.dir, PathBuf::from("cpt_1m"));
    assert_eq!(config.checkpoint.resume_from, CheckpointTag::Warm);
    assert_eq!(config.cores.boot, Some(CpuModel::Kvm));
    assert_eq!(config.cores.warm, Some(CpuModel::Atomic));
    assert_eq!(config.cores.measure, Some(CpuModel::O3));
    assert_eq!(config.cores.num_cores, 2);
    assert_eq!(config.cores.driver_cores, 1);
}

#[test]
fn test_sync_defaults_are_valid() {
    let sync = SyncConfig::default();
    assert_eq!(sync.quantum, Tick::from_micros(50));
    assert_eq!(sync.quantum, Tick(50_000_000));
    assert_eq!(sync.effective_link_delay(), Tick(100_000_000));
    assert!((sync.safety_factor - 2.0).abs() < f64::EPSILON);
    assert!(sync.barrier);
    assert!(sync.validate().is_ok());
}

#[test]
fn test_guest_defaults() {
    let guest = GuestConfig::default();
    assert_eq!(guest.test_ip, "10.0.2.17");
    assert_eq!(guest.drive_ip, "10.0.2.18");
    assert_eq!(guest.device, "enp0s2");
    assert_eq!(guest.port, 50000);
}

#[test]
fn test_partial_json_fills_defaults() {
    let json = r#"{
        "experiment": { "mode": "Evaluation", "workload": "aes-go", "warm_invocations": 100 },
        "cores": { "warm": null }
    }"#;
    let config = Config::from_json_str(json).unwrap();
    assert_eq!(config.experiment.mode, Mode::Evaluation);
    assert_eq!(config.experiment.workload, "aes-go");
    assert_eq!(config.experiment.warm_invocations, 100);
    assert_eq!(config.experiment.measure_invocations, 20);
    assert_eq!(config.cores.warm, None);
    assert_eq!(config.cores.measure, Some(CpuModel::O3));
}

#[test]
fn test_lowercase_aliases_accepted() {
    let json = r#"{
        "experiment": { "mode": "setup", "save_at": "warm" },
        "checkpoint": { "resume_from": "boot" },
        "cores": { "boot": "KVM", "measure": "Timing" },
        "topology": "single"
    }"#;
    let config = Config::from_json_str(json).unwrap();
    assert_eq!(config.experiment.save_at, SaveAt::Warm);
    assert_eq!(config.checkpoint.resume_from, CheckpointTag::Boot);
    assert_eq!(config.cores.boot, Some(CpuModel::Kvm));
    assert_eq!(config.cores.measure, Some(CpuModel::Timing));
}

#[test]
fn test_malformed_json_is_parse_error() {
    assert!(matches!(
        Config::from_json_str("{ \"experiment\": "),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn test_missing_file_is_io_error() {
    let err = Config::from_file(std::path::Path::new("/nonexistent/simphase.json")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[test]
fn test_full_mode_parses() {
    let config =
        Config::from_json_str(r#"{ "experiment": { "mode": "full", "workload": "aes-go" } }"#).unwrap();
    assert_eq!(config.experiment.mode, Mode::Full);
    assert_eq!(config.experiment.mode.to_string(), "full");
    assert!(config.validate().is_ok());
}

#[test]
fn test_from_file_reads_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{ "experiment": { "workload": "auth-go" } }"#).unwrap();
    let config = Config::from_file(&path).unwrap();
    assert_eq!(config.experiment.workload, "auth-go");
}

#[rstest]
#[case::zero_warm(0, 20, "warm_invocations")]
#[case::zero_measure(-1, 0, "measure_invocations")]
fn test_zero_budget_rejected(#[case] warm: i64, #[case] measure: i64, #[case] which: &str) {
    let mut config = Config::default();
    config.experiment.warm_invocations = warm;
    config.experiment.measure_invocations = measure;
    match config.validate() {
        Err(ConfigError::ZeroBudget { which: got }) => assert_eq!(got, which),
        other => panic!("expected ZeroBudget, got {other:?}"),
    }
}

#[test]
fn test_empty_workload_rejected() {
    let mut config = Config::default();
    config.experiment.workload = "  ".to_owned();
    assert!(matches!(config.validate(), Err(ConfigError::EmptyWorkload)));
}

#[rstest]
#[case::setup_without_boot(Mode::Setup, CoreKind::Boot)]
#[case::evaluation_without_measure(Mode::Evaluation, CoreKind::Measure)]
#[case::full_without_boot(Mode::Full, CoreKind::Boot)]
#[case::full_without_measure(Mode::Full, CoreKind::Measure)]
fn test_mode_requires_core_set(#[case] mode: Mode, #[case] missing: CoreKind) {
    let mut config = Config::default();
    config.experiment.mode = mode;
    match missing {
        CoreKind::Boot => config.cores.boot = None,
        CoreKind::Warm => config.cores.warm = None,
        CoreKind::Measure => config.cores.measure = None,
    }
    match config.validate() {
        Err(ConfigError::MissingCoreSet { mode: m, kind }) => {
            assert_eq!(m, mode);
            assert_eq!(kind, missing);
        }
        other => panic!("expected MissingCoreSet, got {other:?}"),
    }
}

#[test]
fn test_zero_cores_rejected() {
    let mut config = Config::default();
    config.cores.num_cores = 0;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::ZeroCores { which: "num_cores" })
    ));
}

#[rstest]
#[case::setup(Mode::Setup, CheckpointTag::Warm, true, CoreKind::Boot)]
#[case::full(Mode::Full, CheckpointTag::Warm, true, CoreKind::Boot)]
#[case::resume_boot_with_warm_set(Mode::Evaluation, CheckpointTag::Boot, true, CoreKind::Warm)]
#[case::resume_boot_without_warm_set(Mode::Evaluation, CheckpointTag::Boot, false, CoreKind::Measure)]
#[case::resume_warm(Mode::Evaluation, CheckpointTag::Warm, true, CoreKind::Measure)]
fn test_initial_core_set(
    #[case] mode: Mode,
    #[case] resume: CheckpointTag,
    #[case] warm_set: bool,
    #[case] expected: CoreKind,
) {
    let mut config = Config::default();
    config.experiment.mode = mode;
    config.checkpoint.resume_from = resume;
    if !warm_set {
        config.cores.warm = None;
    }
    assert_eq!(config.initial_core_set(), expected);
    assert_eq!(config.core_set().active(), expected);
}

#[rstest]
#[case::delay_equals_quantum(100, Some(100), ConfigErrorKind::TooShort)]
#[case::delay_below_quantum(100, Some(40), ConfigErrorKind::TooShort)]
#[case::inside_margin(100, Some(150), ConfigErrorKind::Margin)]
#[case::zero_quantum(0, Some(10), ConfigErrorKind::ZeroQuantum)]
fn test_sync_validation(
    #[case] quantum: u64,
    #[case] delay: Option<u64>,
    #[case] expected: ConfigErrorKind,
) {
    let sync = SyncConfig {
        quantum: Tick(quantum),
        link_delay: delay.map(Tick),
        ..SyncConfig::default()
    };
    let err = sync.validate().unwrap_err();
    let kind = match err {
        ConfigError::LinkDelayTooShort { .. } => ConfigErrorKind::TooShort,
        ConfigError::InsufficientMargin { .. } => ConfigErrorKind::Margin,
        ConfigError::ZeroQuantum => ConfigErrorKind::ZeroQuantum,
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(kind, expected);
}

#[derive(Debug, PartialEq, Eq)]
enum ConfigErrorKind {
    TooShort,
    Margin,
    ZeroQuantum,
}

#[test]
fn test_custom_safety_factor() {
    let sync = SyncConfig {
        quantum: Tick(100),
        link_delay: Some(Tick(150)),
        safety_factor: 1.5,
        ..SyncConfig::default()
    };
    assert!(sync.validate().is_ok());

    let sync = SyncConfig {
        safety_factor: 0.5,
        ..sync
    };
    assert!(matches!(
        sync.validate(),
        Err(ConfigError::InvalidSafetyFactor(_))
    ));
}

#[test]
fn test_single_topology_skips_sync_checks() {
    let mut config = Config::default();
    config.sync.link_delay = Some(Tick(1));
    assert!(config.validate().is_ok());
    config.topology = Topology::Dual;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::LinkDelayTooShort { .. })
    ));
}

#[test]
fn test_save_at_tags() {
    assert_eq!(SaveAt::Pinned.tags(), &[CheckpointTag::Boot]);
    assert_eq!(
        SaveAt::Warm.tags(),
        &[CheckpointTag::Boot, CheckpointTag::Warm]
    );
}
