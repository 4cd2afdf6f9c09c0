//! CLI Integration Tests
//!
//! Tests the command-line interface end-to-end.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get the binary to test.
fn sosrep() -> Command {
    Command::cargo_bin("sosrep").unwrap()
}

/// Arguments shared by every non-interactive invocation: batch mode and
/// a config file that does not exist, so the host's real configuration
/// never leaks into a test.
fn batch_args(tmp: &TempDir) -> Vec<String> {
    vec![
        "--batch".to_string(),
        "--config-file".to_string(),
        tmp.path().join("absent.conf").display().to_string(),
        "--tmp-dir".to_string(),
        tmp.path().display().to_string(),
    ]
}

// ============================================================================
// Help & Version Tests
// ============================================================================

#[test]
fn test_help_flag() {
    sosrep()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("diagnostic report archive"));
}

#[test]
fn test_short_help_flag() {
    sosrep().arg("-h").assert().success().stdout(predicate::str::contains("Usage:"));
}

#[test]
fn test_version_flag() {
    sosrep()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

// ============================================================================
// Plugin Listing Tests
// ============================================================================

#[test]
fn test_list_plugins() {
    let tmp = TempDir::new().unwrap();
    sosrep()
        .args(batch_args(&tmp))
        .arg("--list-plugins")
        .assert()
        .success()
        .stdout(predicate::str::contains("system"));
}

#[test]
fn test_list_plugins_json() {
    let tmp = TempDir::new().unwrap();
    sosrep()
        .args(batch_args(&tmp))
        .args(["--list-plugins", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("["))
        .stdout(predicate::str::contains("\"system\""));
}

// ============================================================================
// Fatal Configuration Errors
// ============================================================================

#[test]
fn test_unknown_compression_type_is_fatal() {
    let tmp = TempDir::new().unwrap();
    sosrep()
        .args(batch_args(&tmp))
        .args(["-z", "lz4"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown compression type"));
}

#[test]
fn test_unknown_plugin_on_cli_is_fatal() {
    let tmp = TempDir::new().unwrap();
    sosrep()
        .args(batch_args(&tmp))
        .args(["-o", "ghost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ghost"));
}

#[test]
fn test_unknown_plugin_option_is_fatal() {
    let tmp = TempDir::new().unwrap();
    sosrep()
        .args(batch_args(&tmp))
        .args(["-o", "system", "-k", "system.bogus=1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("bogus"));
}

#[test]
fn test_everything_excluded_is_fatal() {
    let tmp = TempDir::new().unwrap();
    sosrep()
        .args(batch_args(&tmp))
        .args(["-o", "system", "-n", "system"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no valid plugins"));
}

// ============================================================================
// End-to-End Collection
// ============================================================================

#[test]
fn test_batch_run_produces_archive_and_checksum() {
    let tmp = TempDir::new().unwrap();
    sosrep()
        .args(batch_args(&tmp))
        .args(["-o", "system", "-z", "zip"])
        .assert()
        .success()
        .stdout(predicate::str::contains("has been generated"))
        .stdout(predicate::str::contains("checksum"));

    let entries: Vec<String> = std::fs::read_dir(tmp.path())
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert!(
        entries.iter().any(|name| name.starts_with("sosreport-") && name.ends_with(".zip")),
        "archive missing from {entries:?}"
    );
    assert!(
        entries.iter().any(|name| name.ends_with(".sha512") || name.ends_with(".sha256")),
        "checksum file missing from {entries:?}"
    );
}

#[test]
fn test_silent_run_prints_nothing() {
    let tmp = TempDir::new().unwrap();
    sosrep()
        .args(batch_args(&tmp))
        .args(["-o", "system", "-z", "zip", "--silent"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn test_ticket_number_lands_in_archive_name() {
    let tmp = TempDir::new().unwrap();
    sosrep()
        .args(batch_args(&tmp))
        .args(["-o", "system", "-z", "zip", "--ticket-number", "case4711"])
        .assert()
        .success();

    let found = std::fs::read_dir(tmp.path())
        .unwrap()
        .flatten()
        .any(|e| e.file_name().to_string_lossy().contains("case4711"));
    assert!(found, "ticket number missing from archive name");
}

#[test]
fn test_plugin_option_accepted_on_cli() {
    let tmp = TempDir::new().unwrap();
    sosrep()
        .args(batch_args(&tmp))
        .args(["-o", "system", "-z", "zip", "--silent", "-k", "system.bogus=1"])
        .assert()
        .failure();

    // A valid option on an active plugin is accepted.
    let tmp = TempDir::new().unwrap();
    sosrep()
        .args(batch_args(&tmp))
        .args(["-o", "logs,system", "-z", "zip", "--silent", "-k", "logs.size_limit=1"])
        .assert()
        .success();
}
