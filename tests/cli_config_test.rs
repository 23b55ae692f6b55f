//! Integration tests for `bsync config` and startup errors.

mod common;

use common::TestEnv;
use predicates::prelude::*;

#[test]
fn test_config_path_points_at_override() {
    let env = TestEnv::new();
    env.bsync()
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.kdl"))
        .stdout(predicate::str::contains("\"exists\":false"));
}

#[test]
fn test_config_set_then_get() {
    let env = TestEnv::new();
    env.bsync()
        .args(["config", "set", "base-url", "http://localhost:8080/agilefant"])
        .assert()
        .success();

    assert!(env.config_path().exists());

    env.bsync()
        .args(["config", "get", "base-url"])
        .assert()
        .success()
        .stdout(predicate::str::contains("http://localhost:8080/agilefant"))
        .stdout(predicate::str::contains("file:"));
}

#[test]
fn test_config_list_human() {
    let env = TestEnv::new();
    env.bsync()
        .args(["-H", "config", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("base-url =  (unset)"))
        .stdout(predicate::str::contains("discard-stale-responses = true (default)"))
        .stdout(predicate::str::contains("feedback-history = 100 (default)"));
}

#[test]
fn test_keep_stale_flag_overrides_default() {
    let env = TestEnv::new();
    env.bsync()
        .args(["--keep-stale", "config", "get", "discard-stale-responses"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"value\":\"false\""))
        .stdout(predicate::str::contains("\"source\":\"cli\""));
}

#[test]
fn test_env_base_url_beats_file() {
    let env = TestEnv::new();
    env.bsync()
        .args(["config", "set", "base-url", "http://file.example"])
        .assert()
        .success();

    env.bsync()
        .env("BSYNC_BASE_URL", "http://env.example")
        .args(["config", "get", "base-url"])
        .assert()
        .success()
        .stdout(predicate::str::contains("http://env.example"))
        .stdout(predicate::str::contains("env:BSYNC_BASE_URL"));
}

#[test]
fn test_config_set_rejects_unknown_key() {
    let env = TestEnv::new();
    env.bsync()
        .args(["config", "set", "colour", "blue"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown config key"));
}

#[test]
fn test_network_command_without_base_url_fails() {
    let env = TestEnv::new();
    env.bsync()
        .args(["show", "42"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No base URL configured"));
}

#[test]
fn test_human_errors_are_plain_text() {
    let env = TestEnv::new();
    env.bsync()
        .args(["-H", "show", "42"])
        .assert()
        .failure()
        .stderr(predicate::str::starts_with("Error: "));
}
