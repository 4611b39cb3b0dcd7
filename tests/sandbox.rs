//! Integration tests for the sandbox runner.
//!
//! Script units re-execute the compiled `codeforge` binary as the child.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use codeforge::sandbox::{
    SandboxConfig, SandboxRunner, WorkUnit, ABNORMAL_EXIT_EXCEPTION, TIMEOUT_EXCEPTION,
};
use serde_json::json;
use tempfile::TempDir;

fn runner(timeout: Duration) -> SandboxRunner {
    SandboxRunner::new(
        SandboxConfig::new()
            .with_child_program(env!("CARGO_BIN_EXE_codeforge"))
            .with_timeout(timeout)
            .with_kill_grace(Duration::from_millis(500))
            .with_echo_output(false),
    )
}

fn write_script(dir: &TempDir, name: &str, code: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, code).expect("write script");
    path
}

#[tokio::test]
async fn test_script_returns_value() {
    let dir = TempDir::new().unwrap();
    let path = write_script(&dir, "add.rhai", "fn add(a, b) { a + b }");

    let result = runner(Duration::from_secs(30))
        .run(&WorkUnit::script(&path, "add", vec![json!(2), json!(3)]))
        .await;

    assert!(result.success, "unexpected failure: {}", result.diagnostic());
    assert_eq!(result.value, json!(5));
    assert!(result.exception.is_none());
}

#[tokio::test]
async fn test_script_output_is_captured() {
    let dir = TempDir::new().unwrap();
    let path = write_script(
        &dir,
        "greet.rhai",
        r#"fn greet(name) { print("hello " + name); debug("checked"); #{ greeted: name } }"#,
    );

    let result = runner(Duration::from_secs(30))
        .run(&WorkUnit::script(&path, "greet", vec![json!("ada")]))
        .await;

    assert!(result.success, "unexpected failure: {}", result.diagnostic());
    assert!(result.stdout.contains("hello ada"));
    assert!(result.stderr.contains("checked"));
    assert_eq!(result.value, json!({"greeted": "ada"}));
}

#[tokio::test]
async fn test_raising_script_reports_exception_and_traceback() {
    let dir = TempDir::new().unwrap();
    let path = write_script(
        &dir,
        "parse.rhai",
        r#"
fn check(x) { if x < 0 { throw "negative input"; } x }
fn parse(x) { check(x) * 2 }
"#,
    );

    let result = runner(Duration::from_secs(30))
        .run(&WorkUnit::script(&path, "parse", vec![json!(-1)]))
        .await;

    assert!(!result.success);
    let exception = result.exception.clone().unwrap_or_default();
    assert!(exception.contains("negative input"), "exception: {}", exception);
    assert!(!result.traceback.is_empty());
    assert!(result.diagnostic().contains("negative input"));
}

#[tokio::test]
async fn test_syntax_error_is_reported() {
    let dir = TempDir::new().unwrap();
    let path = write_script(&dir, "broken.rhai", "fn broken( { 1 }");

    let result = runner(Duration::from_secs(30))
        .run(&WorkUnit::script(&path, "broken", vec![]))
        .await;

    assert!(!result.success);
    assert!(result
        .exception
        .as_deref()
        .is_some_and(|e| e.starts_with("SyntaxError")));
}

#[tokio::test]
async fn test_missing_entry_point_fails() {
    let dir = TempDir::new().unwrap();
    let path = write_script(&dir, "other.rhai", "fn other() { 1 }");

    let result = runner(Duration::from_secs(30))
        .run(&WorkUnit::script(&path, "wanted", vec![]))
        .await;

    assert!(!result.success);
    assert!(result.exception.is_some());
}

#[tokio::test]
async fn test_runaway_script_times_out() {
    let dir = TempDir::new().unwrap();
    let path = write_script(&dir, "spin.rhai", "fn spin() { loop { } }");
    let timeout = Duration::from_secs(1);

    let started = Instant::now();
    let result = runner(timeout).run(&WorkUnit::script(&path, "spin", vec![])).await;
    let elapsed = started.elapsed();

    assert!(!result.success);
    assert!(result.is_timeout());
    assert!(result
        .exception
        .as_deref()
        .is_some_and(|e| e.starts_with(TIMEOUT_EXCEPTION)));
    // timeout + kill grace, with slack for process startup
    assert!(elapsed < Duration::from_secs(5), "took {:?}", elapsed);
}

#[tokio::test]
async fn test_each_attempt_gets_a_fresh_result_slot() {
    let dir = TempDir::new().unwrap();
    let path = write_script(&dir, "id.rhai", "fn id(x) { x }");
    let runner = runner(Duration::from_secs(30));

    let first = runner.run(&WorkUnit::script(&path, "id", vec![json!("a")])).await;
    let second = runner.run(&WorkUnit::script(&path, "id", vec![json!("b")])).await;

    assert_eq!(first.value, json!("a"));
    assert_eq!(second.value, json!("b"));
}

#[tokio::test]
async fn test_child_exiting_without_result_is_abnormal_exit() {
    let dir = TempDir::new().unwrap();
    let path = write_script(&dir, "add.rhai", "fn add(a, b) { a + b }");
    let runner = SandboxRunner::new(
        SandboxConfig::new()
            .with_child_program("/bin/true")
            .with_timeout(Duration::from_secs(30))
            .with_echo_output(false),
    );

    let result = runner
        .run(&WorkUnit::script(&path, "add", vec![json!(2), json!(3)]))
        .await;

    assert!(!result.success);
    assert!(result.is_abnormal_exit());
    assert!(!result.is_timeout());
    let exception = result.exception.as_deref().unwrap_or_default();
    assert!(exception.starts_with(ABNORMAL_EXIT_EXCEPTION), "{}", exception);
    assert!(exception.contains("code 0"), "{}", exception);
}
