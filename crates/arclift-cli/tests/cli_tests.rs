//! CLI smoke tests.
//!
//! The heavy lifting needs the native engine library, so these stick to
//! argument handling and error surfaces.

#![allow(clippy::unwrap_used)]

use assert_cmd::Command;
use predicates::prelude::*;

fn arclift() -> Command {
    Command::cargo_bin("arclift").unwrap()
}

#[test]
fn test_help_lists_subcommands() {
    arclift()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("list"))
        .stdout(predicate::str::contains("extract"))
        .stdout(predicate::str::contains("create"))
        .stdout(predicate::str::contains("verify"));
}

#[test]
fn test_version_flag() {
    arclift().arg("--version").assert().success();
}

#[test]
fn test_list_missing_archive_fails() {
    arclift()
        .args(["list", "/definitely/not/here.7z"])
        .assert()
        .failure();
}

#[test]
fn test_create_requires_sources() {
    arclift()
        .args(["create", "out.7z"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("SOURCE"));
}

#[test]
fn test_create_unknown_extension_fails() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("file.txt");
    std::fs::write(&src, b"data").unwrap();

    arclift()
        .args(["create", "out.unknownext"])
        .arg(&src)
        .assert()
        .failure()
        .stderr(predicate::str::contains("format"));
}

#[test]
fn test_encrypt_headers_requires_password() {
    arclift()
        .args(["create", "out.7z", "src", "--encrypt-headers"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("password"));
}
