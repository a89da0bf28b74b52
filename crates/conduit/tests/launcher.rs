#![cfg(unix)]

use std::{
    fs,
    io::BufRead,
    path::{Path, PathBuf},
};

use conduit::launcher::{LaunchError, LaunchOptions, ensure_package, spawn_worker};
use pretty_assertions::assert_eq;
use serde_json::json;

fn script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("worker.sh");
    fs::write(&path, body).unwrap();
    path
}

fn sh_options() -> LaunchOptions {
    LaunchOptions {
        program: Some(PathBuf::from("sh")),
        ..LaunchOptions::default()
    }
}

#[test]
fn worker_receives_the_payload_after_signalling() {
    let dir = tempfile::tempdir().unwrap();
    let artifact = script(dir.path(), "read payload\necho 0\necho \"$payload\"\n");

    let mut worker = spawn_worker(&artifact, &json!({ "job": 7 }), &sh_options()).unwrap();
    let mut echoed = String::new();
    worker.stdout().read_line(&mut echoed).unwrap();
    assert_eq!(echoed.trim(), r#"{"job":7}"#);
    assert!(worker.wait().unwrap().success());
}

#[test]
fn custom_success_signal() {
    let dir = tempfile::tempdir().unwrap();
    let artifact = script(dir.path(), "echo 3\n");
    let options = LaunchOptions {
        success_signal: 3,
        ..sh_options()
    };
    let mut worker = spawn_worker(&artifact, &json!(null), &options).unwrap();
    assert!(worker.wait().unwrap().success());
}

#[test]
fn other_signal_is_a_failure() {
    let dir = tempfile::tempdir().unwrap();
    let artifact = script(dir.path(), "echo 7\nsleep 5\n");
    let err = spawn_worker(&artifact, &json!({}), &sh_options()).unwrap_err();
    assert!(
        matches!(err, LaunchError::Signal { expected: 0, actual: 7 }),
        "unexpected error: {err}"
    );
}

#[test]
fn non_numeric_status_is_a_protocol_error() {
    let dir = tempfile::tempdir().unwrap();
    let artifact = script(dir.path(), "echo ready\n");
    let err = spawn_worker(&artifact, &json!({}), &sh_options()).unwrap_err();
    assert!(matches!(err, LaunchError::Protocol(_)), "unexpected error: {err}");
}

#[test]
fn silent_exit_is_a_protocol_error() {
    let dir = tempfile::tempdir().unwrap();
    let artifact = script(dir.path(), "exit 0\n");
    let err = spawn_worker(&artifact, &json!({}), &sh_options()).unwrap_err();
    assert_eq!(err.to_string(), "worker protocol error: worker exited before signalling");
}

/// Larger than any pipe buffer, so writing it to a worker that never reads fails.
fn large_payload() -> serde_json::Value {
    json!({ "blob": "x".repeat(1 << 20) })
}

#[test]
fn worker_that_never_reads_is_judged_by_its_status() {
    let dir = tempfile::tempdir().unwrap();
    let artifact = script(dir.path(), "exec 0<&-\necho 0\n");
    let mut worker = spawn_worker(&artifact, &large_payload(), &sh_options()).unwrap();
    assert!(worker.wait().unwrap().success());
}

#[test]
fn worker_exiting_before_reading_is_a_protocol_error() {
    let dir = tempfile::tempdir().unwrap();
    let artifact = script(dir.path(), "exit 3\n");
    let err = spawn_worker(&artifact, &large_payload(), &sh_options()).unwrap_err();
    assert!(matches!(err, LaunchError::Protocol(_)), "unexpected error: {err}");
}

#[test]
fn missing_program_is_an_io_error() {
    let options = LaunchOptions {
        program: Some(PathBuf::from("/nonexistent/conduit-interpreter")),
        ..LaunchOptions::default()
    };
    let err = spawn_worker(Path::new("worker"), &json!({}), &options).unwrap_err();
    assert!(matches!(err, LaunchError::Io(_)));
}

#[test]
fn installed_package_is_not_reinstalled() {
    let site = tempfile::tempdir().unwrap();
    fs::create_dir(site.path().join("requests")).unwrap();
    let options = LaunchOptions {
        site_dir: Some(site.path().to_path_buf()),
        // would fail if it ran
        package_manager: vec!["false".to_owned()],
        ..LaunchOptions::default()
    };
    assert!(!ensure_package("requests", &options).unwrap());
}

#[test]
fn missing_package_runs_the_package_manager() {
    let site = tempfile::tempdir().unwrap();
    let options = LaunchOptions {
        site_dir: Some(site.path().to_path_buf()),
        package_manager: vec!["true".to_owned()],
        ..LaunchOptions::default()
    };
    assert!(ensure_package("requests", &options).unwrap());
}

#[test]
fn failed_install_reports_the_exit_code() {
    let options = LaunchOptions {
        package_manager: vec!["sh".to_owned(), "-c".to_owned(), "exit 4".to_owned()],
        ..LaunchOptions::default()
    };
    let err = ensure_package("requests", &options).unwrap_err();
    assert!(
        matches!(&err, LaunchError::Install { package, code: Some(4) } if package == "requests"),
        "unexpected error: {err}"
    );
}

#[test]
fn empty_package_manager_is_rejected() {
    let options = LaunchOptions {
        package_manager: Vec::new(),
        ..LaunchOptions::default()
    };
    assert!(matches!(ensure_package("x", &options), Err(LaunchError::Config(_))));
}

#[test]
fn options_deserialize_with_defaults() {
    let options: LaunchOptions = serde_json::from_str(r#"{ "success_signal": 1 }"#).unwrap();
    assert_eq!(options.success_signal, 1);
    assert_eq!(options.package_manager, vec!["pip", "install"]);
    assert_eq!(options.program, None);
}
