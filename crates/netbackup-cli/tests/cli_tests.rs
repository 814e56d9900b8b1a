// SPDX-License-Identifier: MIT OR Apache-2.0
//! Integration tests for the `netbackup` CLI binary.

use assert_cmd::Command;
use predicates::str::contains;

fn netbackup() -> Command {
    Command::cargo_bin("netbackup").expect("binary `netbackup` should be built")
}

#[test]
fn help_flag_prints_usage() {
    netbackup()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("controller"))
        .stdout(contains("worker"));
}

#[test]
fn version_flag_prints_version() {
    netbackup()
        .arg("--version")
        .assert()
        .success()
        .stdout(contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn controller_missing_config_file_exits_nonzero() {
    netbackup()
        .args(["controller", "--config", "/nonexistent/netbackup.toml"])
        .assert()
        .failure();
}

#[test]
fn worker_unparsable_controller_url_exits_nonzero() {
    netbackup()
        .args(["worker", "--controller", "not a url"])
        .assert()
        .failure();
}

#[test]
fn worker_unsupported_scheme_exits_nonzero() {
    netbackup()
        .args(["worker", "--controller", "ftp://controller.example"])
        .assert()
        .failure()
        .stderr(contains("unsupported controller URL scheme"));
}
