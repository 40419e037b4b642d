//! CLI integration tests

use std::process::{Command, Output};

fn greenops(args: &[&str]) -> Output {
    Command::new("cargo")
        .args(["run", "-q", "-p", "greenops-cli", "--"])
        .args(args)
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = greenops(&["--help"]);

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(
        stdout.contains("GreenOps safe migration executor"),
        "Should show app name"
    );
    assert!(stdout.contains("migrate"), "Should show migrate command");
    assert!(stdout.contains("evaluate"), "Should show evaluate command");
    assert!(stdout.contains("active"), "Should show active command");
    assert!(stdout.contains("health"), "Should show health command");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = greenops(&["--version"]);

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("greenops"), "Should show binary name");
}

/// Test migrate subcommand help
#[test]
fn test_migrate_help() {
    let output = greenops(&["migrate", "--help"]);

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Migrate help should succeed");
    assert!(stdout.contains("--target-type"), "Should show target type option");
    assert!(stdout.contains("--target-zone"), "Should show target zone option");
    assert!(stdout.contains("--strategy"), "Should show strategy option");
    assert!(stdout.contains("in-place"), "Should list in-place strategy");
    assert!(stdout.contains("snapshot"), "Should list snapshot strategy");
}

/// Test evaluate subcommand help
#[test]
fn test_evaluate_help() {
    let output = greenops(&["evaluate", "--help"]);

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Evaluate help should succeed");
    assert!(stdout.contains("--cpu"), "Should show cpu option");
    assert!(stdout.contains("--memory"), "Should show memory option");
}

/// Test format and api-url options
#[test]
fn test_global_options() {
    let output = greenops(&["--help"]);

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.contains("--format"), "Should show format option");
    assert!(stdout.contains("table"), "Should show table format");
    assert!(stdout.contains("json"), "Should show json format");
    assert!(stdout.contains("--api-url"), "Should show api-url option");
    assert!(stdout.contains("GREENOPS_API_URL"), "Should show env var");
}

/// Test invalid command error handling
#[test]
fn test_invalid_command() {
    let output = greenops(&["invalid-command"]);

    assert!(!output.status.success(), "Invalid command should fail");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("error") || stderr.contains("invalid"),
        "Should show error message"
    );
}

/// Test missing required argument error handling
#[test]
fn test_missing_target_type() {
    let output = greenops(&["migrate", "web-1"]);

    assert!(!output.status.success(), "Missing argument should fail");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("--target-type"),
        "Should show error about missing argument"
    );
}

/// Test unknown strategy is rejected before any request is made
#[test]
fn test_invalid_strategy() {
    let output = greenops(&["migrate", "web-1", "--target-type", "e2-small", "--strategy", "live"]);

    assert!(!output.status.success(), "Unknown strategy should fail");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid value"), "Should reject the value");
}
