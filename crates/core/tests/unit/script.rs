//! # Run-Script Tests

use simphase_core::config::{Config, Topology};
use simphase_core::script::*;

fn fail_codes(script: &str) -> Vec<i64> {
    script
        .lines()
        .filter_map(|l| l.trim().strip_prefix("m5 fail "))
        .filter_map(|rest| rest.split_whitespace().next())
        .map(|code| code.parse().unwrap())
        .collect()
}

#[test]
fn test_single_node_markers_in_contract_order() {
    let script = render_run_script(&Config::default());
    assert!(script.starts_with("#!/bin/bash"));
    assert_eq!(fail_codes(&script), vec![1, 2, 3, 10, 11, 6, -1]);
}

#[test]
fn test_client_invocation_count() {
    let mut config = Config::default();
    config.experiment.workload = "aes-go".to_owned();
    config.experiment.warm_invocations = 100;
    config.experiment.measure_invocations = 20;
    assert_eq!(client_invocations(&config), 120);

    let script = render_run_script(&config);
    assert!(script.contains("-function-name aes-go"));
    assert!(script.contains("-n 120"));
    assert!(script.contains("-m5ops"));
    assert!(script.contains("up -d aes-go"));
}

#[test]
fn test_disabled_warm_budget_counts_only_measure() {
    let config = Config::default();
    assert_eq!(client_invocations(&config), 20);
}

#[test]
fn test_dual_scripts_split_roles() {
    let config = Config::default();
    let scripts = render_dual_scripts(&config);

    assert_eq!(fail_codes(&scripts.test), vec![1, 2, 3]);
    assert!(scripts.test.contains("ifconfig enp0s2 10.0.2.17"));
    assert!(!scripts.test.contains("-m5ops"));

    assert!(scripts.drive.contains("m5 exit"));
    assert!(scripts.drive.contains("ifconfig enp0s2 10.0.2.18"));
    assert!(scripts.drive.contains("-url 10.0.2.17"));
    assert_eq!(fail_codes(&scripts.drive), vec![10, 11, -1]);
}

#[test]
fn test_write_run_script_per_topology() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();

    let written = write_run_script(dir.path(), &config).unwrap();
    assert_eq!(written, vec![dir.path().join(RUN_SCRIPT)]);

    config.topology = Topology::Dual;
    let out = dir.path().join("dual");
    let written = write_run_script(&out, &config).unwrap();
    assert_eq!(written, vec![out.join(RUN_SCRIPT), out.join(DRIVE_SCRIPT)]);
    let drive = std::fs::read_to_string(out.join(DRIVE_SCRIPT)).unwrap();
    assert_eq!(drive, render_dual_scripts(&config).drive);
}
