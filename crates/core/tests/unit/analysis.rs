//! # Run-Log Analysis Tests

use std::fs;
use std::path::Path;

use pretty_assertions::assert_eq;
use simphase_core::analysis::*;

fn log(invocations: usize, done: bool) -> String {
    let mut text = String::from("INFO simphase: command line: simphase replay --config a.json\n");
    for i in 0..invocations {
        text.push_str(&format!("INFO node0: End invocation id={i}\n"));
    }
    if done {
        text.push_str("INFO node0: Simulation done\n");
    }
    text
}

fn write_run(root: &Path, name: &str, text: &str) {
    let dir = root.join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(LOG_FILE), text).unwrap();
}

#[test]
fn test_check_log_counts_until_done() {
    let mut text = log(20, true);
    text.push_str("End invocation after done\n");
    let summary = check_log(&text);
    assert_eq!(
        summary,
        LogSummary {
            command: Some("simphase replay --config a.json".to_owned()),
            invocations: 20,
            done: true,
        }
    );
}

#[test]
fn test_legacy_marker_spelling_is_counted() {
    let summary = check_log("End invokation\nEnd invokation\nSimulation done\n");
    assert_eq!(summary.invocations, 2);
    assert_eq!(summary.command, None);
}

#[test]
fn test_status_classification() {
    assert_eq!(check_log(&log(20, true)).status(20), RunStatus::Succeed);
    assert_eq!(check_log(&log(19, true)).status(20), RunStatus::Warn);
    assert_eq!(check_log(&log(20, false)).status(20), RunStatus::Fail);
}

#[test]
fn test_results_dir_report_and_reruns() {
    let root = tempfile::tempdir().unwrap();
    write_run(root.path(), "aes-go", &log(20, true));
    write_run(root.path(), "auth-go", &log(3, false));
    write_run(root.path(), "fibonacci-go", &log(12, true));
    fs::create_dir_all(root.path().join("no-log")).unwrap();
    fs::write(root.path().join("stray.txt"), "x").unwrap();

    let report = check_results_dir(root.path(), DEFAULT_EXPECTED_INVOCATIONS).unwrap();
    let names: Vec<&str> = report.runs.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["aes-go", "auth-go", "fibonacci-go"]);
    assert_eq!(report.count(RunStatus::Succeed), 1);
    assert_eq!(report.count(RunStatus::Warn), 1);
    assert_eq!(report.count(RunStatus::Fail), 1);

    let log_path = root.path().join("auth-go").join(LOG_FILE);
    assert_eq!(
        report.rerun_commands(),
        vec![format!(
            "simphase replay --config a.json > {} 2>&1 &",
            log_path.display()
        )]
    );
}

#[test]
fn test_missing_results_dir_is_io_error() {
    assert!(check_results_dir(Path::new("/nonexistent/results"), 20).is_err());
}
