#![allow(clippy::unwrap_used, clippy::expect_used)]

//! CLI smoke tests for the apphost-server binary: help output, configuration validation
//! and archive inspection.

use std::path::Path;
use std::process::{Command, Stdio};

use apphost::testing::{ClassFileBuilder, jar_bytes};
use tempfile::TempDir;

/// Helper to run the apphost-server binary with given arguments
fn run_apphost_server(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_apphost-server"))
        .args(args)
        .env_remove("APPHOST__LOGGING__LEVEL")
        .env_remove("RUST_LOG")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .expect("Failed to execute apphost-server")
}

fn write_shop_war(dir: &Path) -> String {
    let war = jar_bytes(&[
        (
            "WEB-INF/classes/com/acme/ShopApp.class",
            ClassFileBuilder::new("com.acme.ShopApp")
                .super_class("jakarta.ws.rs.core.Application")
                .annotation_with_value("jakarta.ws.rs.ApplicationPath", "value", "api")
                .build(),
        ),
        (
            "WEB-INF/classes/com/acme/Cart.class",
            ClassFileBuilder::new("com.acme.Cart")
                .annotation("jakarta.enterprise.context.SessionScoped")
                .build(),
        ),
    ]);
    let path = dir.join("shop.war");
    std::fs::write(&path, war).expect("Failed to write archive");
    path.to_str().unwrap().to_owned()
}

#[test]
fn test_cli_help_command() {
    let output = run_apphost_server(&["--help"]);

    assert!(output.status.success(), "Help command should succeed");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage:"), "Should contain usage information");
    assert!(stdout.contains("run"), "Should contain 'run' subcommand");
    assert!(stdout.contains("check"), "Should contain 'check' subcommand");
    assert!(stdout.contains("inspect"), "Should contain 'inspect' subcommand");
    assert!(stdout.contains("--config"), "Should mention config option");
}

#[test]
fn test_cli_version_command() {
    let output = run_apphost_server(&["--version"]);

    assert!(output.status.success(), "Version command should succeed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("apphost-server"), "Should contain binary name");
}

#[test]
fn test_cli_invalid_command() {
    let output = run_apphost_server(&["invalid-command"]);
    assert!(!output.status.success(), "Invalid command should fail");
}

#[test]
fn test_cli_config_validation_missing_file() {
    let output = run_apphost_server(&["--config", "/nonexistent/config.yaml", "check"]);

    assert!(
        !output.status.success(),
        "Should fail when config file doesn't exist"
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not found"), "Should indicate config file not found: {stderr}");
}

#[test]
fn test_cli_config_validation_unknown_section() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = temp_dir.path().join("invalid.yaml");
    std::fs::write(&config_path, "database:\n  dsn: sqlite::memory:\n").unwrap();

    let output = run_apphost_server(&["--config", config_path.to_str().unwrap(), "check"]);

    assert!(!output.status.success(), "Should reject unknown sections");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid configuration"), "Should name the problem: {stderr}");
}

#[test]
fn test_cli_config_validation_valid_config() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = temp_dir.path().join("valid.yaml");
    let config_content = r"
logging:
  level: warn
modules:
  rest:
    config:
      default_application_path: /rs
  billing:
    config: {}
";
    std::fs::write(&config_path, config_content).expect("Failed to write config file");

    let output = run_apphost_server(&["--config", config_path.to_str().unwrap(), "check"]);

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "Should succeed with valid config: {stderr}");
    assert!(stdout.contains("Configuration is valid"));
    assert!(
        stdout.contains("modules (start order): logging, config, cdi, rest"),
        "logging must start first: {stdout}"
    );
    assert!(stderr.contains("unknown module 'billing'"));
}

#[test]
fn test_cli_startup_failure_replays_early_logs() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = temp_dir.path().join("bad-level.yaml");
    std::fs::write(&config_path, "logging:\n  level: loudest\n").unwrap();

    let output = run_apphost_server(&["--config", config_path.to_str().unwrap(), "run"]);

    assert!(!output.status.success(), "Startup with a bad log level should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid log level"), "Should name the problem: {stderr}");
    assert!(
        stderr.contains("configuration loaded from"),
        "Buffered records should reach stderr: {stderr}"
    );
    assert!(
        stderr.contains("module dependency order resolved"),
        "Buffered records should reach stderr: {stderr}"
    );
}

#[test]
fn test_cli_print_config() {
    let output = run_apphost_server(&["-vv", "--print-config"]);

    assert!(output.status.success());
    let printed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(printed["logging"]["level"], "debug");
    assert_eq!(printed["sniffing"]["fast_detection"], true);
}

#[test]
fn test_cli_inspect_prints_deployment_record() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let war = write_shop_war(temp_dir.path());

    let output = run_apphost_server(&[
        "inspect",
        &war,
        "--context-root",
        "store",
        "--set",
        "owner=ops",
    ]);

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "Inspect should succeed: {stderr}");

    let record: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(record["name"], "shop");
    assert_eq!(record["context_root"], "/store");
    assert_eq!(record["data"]["owner"], "ops");
    assert_eq!(record["data"]["jaxrs.application-path"], "/api");
    assert_eq!(record["data"]["cdi.bean-archive"], "implicit");
    let specifications = record["specifications"].as_array().unwrap();
    assert!(specifications.contains(&serde_json::json!("jax-rs")));
    assert!(specifications.contains(&serde_json::json!("cdi")));
}

#[test]
fn test_cli_inspect_missing_archive_fails() {
    let output = run_apphost_server(&["inspect", "/nonexistent/app.war"]);

    assert!(!output.status.success(), "Inspect of a missing archive should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("cannot deploy"), "Should explain the failure: {stderr}");
}

#[test]
fn test_cli_inspect_rejects_malformed_set() {
    let output = run_apphost_server(&["inspect", "/srv/app.war", "--set", "novalue"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("KEY=VALUE"), "{stderr}");
}
