//! End-to-end CLI smoke tests driving the compiled `chronodl` binary.
//!
//! Grounded on the teacher's `downloader-cli/tests/cli_e2e.rs`: `assert_cmd`
//! against a tempdir, no network, asserting on exit code and stdout.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;

fn write_input_csv(dir: &std::path::Path, contents: &str) -> std::path::PathBuf {
    let path = dir.join("input.csv");
    let mut file = std::fs::File::create(&path).unwrap();
    write!(file, "{contents}").unwrap();
    path
}

// ==== missing input ====

#[test]
fn missing_input_csv_exits_success_with_nothing_to_do() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("does_not_exist.csv");
    let output_dir = dir.path().join("out");

    Command::cargo_bin("chronodl")
        .unwrap()
        .arg("--input")
        .arg(&missing)
        .arg("--output-dir")
        .arg(&output_dir)
        .assert()
        .success();
}

// ==== empty input ====

#[test]
fn empty_input_csv_exits_success() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input_csv(dir.path(), "entry_id,short_title,main_author,retrievable\n");
    let output_dir = dir.path().join("out");

    Command::cargo_bin("chronodl")
        .unwrap()
        .arg("--input")
        .arg(&input)
        .arg("--output-dir")
        .arg(&output_dir)
        .assert()
        .success();
}

// ==== dry run with no providers configured ====

#[test]
fn dry_run_with_no_providers_reports_no_eligible_candidate() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input_csv(
        dir.path(),
        "entry_id,short_title,main_author,retrievable\nE0001,The Art of Cooking,Jane Doe,\n",
    );
    let output_dir = dir.path().join("out");

    Command::cargo_bin("chronodl")
        .unwrap()
        .arg("--input")
        .arg(&input)
        .arg("--output-dir")
        .arg(&output_dir)
        .arg("--dry-run")
        .assert()
        .success()
        .stdout(predicate::str::contains("no eligible candidate"))
        .stdout(predicate::str::contains("Dry run - no files downloaded"));

    assert!(!output_dir.join("index.csv").exists());
}

// ==== quota-status subcommand ====

#[test]
fn quota_status_on_fresh_output_dir_reports_no_quotas() {
    let dir = tempfile::tempdir().unwrap();
    let output_dir = dir.path().join("out");

    Command::cargo_bin("chronodl")
        .unwrap()
        .arg("--output-dir")
        .arg(&output_dir)
        .arg("quota-status")
        .assert()
        .success()
        .stdout(predicate::str::contains("No provider quotas recorded yet."));
}

// ==== reset-quota subcommand ====

#[test]
fn reset_quota_without_provider_or_all_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output_dir = dir.path().join("out");

    Command::cargo_bin("chronodl")
        .unwrap()
        .arg("--output-dir")
        .arg(&output_dir)
        .arg("reset-quota")
        .assert()
        .failure();
}

#[test]
fn reset_quota_all_on_fresh_state_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let output_dir = dir.path().join("out");

    Command::cargo_bin("chronodl")
        .unwrap()
        .arg("--output-dir")
        .arg(&output_dir)
        .arg("reset-quota")
        .arg("--all")
        .assert()
        .success()
        .stdout(predicate::str::contains("Reset quota for every tracked provider."));
}
