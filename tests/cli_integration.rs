//! CLI integration tests
//!
//! These tests verify the command-line interface behavior, including:
//! - Command parsing and help output
//! - Spec resolution errors and their exit codes
//! - Configuration commands

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn etch_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_etch"))
}

/// Runs etch inside `dir`, isolated from the caller's ETCH_*, RUST_LOG and
/// global config
fn etch(dir: &Path, args: &[&str]) -> Output {
    let mut cmd = Command::new(etch_bin());
    cmd.current_dir(dir).args(args);
    for (key, _) in std::env::vars() {
        if key.starts_with("ETCH_") {
            cmd.env_remove(key);
        }
    }
    cmd.env_remove("RUST_LOG")
        .env_remove("XDG_CONFIG_HOME")
        .env("HOME", dir);
    cmd.output().expect("Failed to execute etch")
}

fn write_specs(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, body).expect("Failed to write spec file");
    path
}

#[test]
fn test_cli_help() {
    let temp = TempDir::new().unwrap();
    let output = etch(temp.path(), &["--help"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("etch"));
    assert!(stdout.contains("build"));
    assert!(stdout.contains("graph"));
    assert!(stdout.contains("toolchain"));
}

#[test]
fn test_cli_version() {
    let temp = TempDir::new().unwrap();
    let output = etch(temp.path(), &["--version"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_graph_prints_build_order() {
    let temp = TempDir::new().unwrap();
    write_specs(
        &temp,
        "kernels.yaml",
        r#"kernels:
  - id: softmax
    board: stm32h7
    dependencies: [gemm]
  - id: gemm
    board: stm32h7
    params:
      tile: 32
"#,
    );

    let output = etch(temp.path(), &["graph", "kernels.yaml"]);

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    let gemm = stdout.find("gemm").unwrap();
    let softmax = stdout.find("softmax").unwrap();
    assert!(gemm < softmax);
    assert!(stdout.contains("softmax [stm32h7] <- gemm"));
}

#[test]
fn test_graph_cycle_exits_with_configuration_error() {
    let temp = TempDir::new().unwrap();
    write_specs(
        &temp,
        "cycle.yaml",
        r#"kernels:
  - id: A
    board: stm32h7
    dependencies: [B]
  - id: B
    board: stm32h7
    dependencies: [C]
  - id: C
    board: stm32h7
    dependencies: [A]
"#,
    );

    let output = etch(temp.path(), &["graph", "cycle.yaml"]);

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("A -> B -> C -> A"));
}

#[test]
fn test_unknown_reference_exits_with_configuration_error() {
    let temp = TempDir::new().unwrap();
    write_specs(
        &temp,
        "bad.yaml",
        r#"id: conv
board: stm32h7
params:
  weights: ${missing.output}
"#,
    );

    let output = etch(temp.path(), &["graph", "bad.yaml"]);

    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_build_without_specs_exits_with_configuration_error() {
    let temp = TempDir::new().unwrap();
    let output = etch(temp.path(), &["build", "does-not-exist"]);

    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_config_init_and_set() {
    let temp = TempDir::new().unwrap();

    let output = etch(temp.path(), &["config", "init"]);
    assert!(output.status.success());
    assert!(temp.path().join("etch.yaml").exists());

    let output = etch(temp.path(), &["config", "set", "pipeline.max_workers", "3"]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let output = etch(temp.path(), &["config", "show"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Max Workers: 3"));
}

#[test]
fn test_config_set_unknown_key_fails() {
    let temp = TempDir::new().unwrap();
    let output = etch(temp.path(), &["config", "set", "no.such.key", "1"]);

    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_configured_log_level_drives_logging() {
    let temp = TempDir::new().unwrap();
    write_specs(&temp, "kernels.yaml", "kernels:\n  - id: gemm\n    board: stm32h7\n");

    let output = etch(temp.path(), &["graph", "kernels.yaml"]);
    assert!(output.status.success());
    assert!(!String::from_utf8_lossy(&output.stderr).contains("starting"));

    let output = etch(temp.path(), &["config", "set", "log_level", "debug"]);
    assert!(output.status.success());

    let output = etch(temp.path(), &["graph", "kernels.yaml"]);
    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("starting"), "stderr: {}", stderr);

    let output = etch(temp.path(), &["--log-level", "warn", "graph", "kernels.yaml"]);
    assert!(!String::from_utf8_lossy(&output.stderr).contains("starting"));
}

#[test]
fn test_debug_setting_raises_log_level() {
    let temp = TempDir::new().unwrap();
    write_specs(&temp, "kernels.yaml", "kernels:\n  - id: gemm\n    board: stm32h7\n");

    let output = etch(temp.path(), &["config", "set", "debug", "true"]);
    assert!(output.status.success());

    let output = etch(temp.path(), &["graph", "kernels.yaml"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("starting"));
}
