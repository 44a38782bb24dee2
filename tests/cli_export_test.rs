//! End-to-end runs of the binary against a fake exporter script.

#![cfg(unix)]

mod common;

use common::{TestEnv, after_of};
use predicates::prelude::*;

const CONFIG: &str = "\
; channels to archive
[DEFAULT]
format = json
partition = 1000

[1]
name = Guild

# main chat, already archived once
[1.10]
name = general
after = 2024-05-01T00:00:00.000000

[1.20]
name = bots
token = second-bot
partition = 100
";

#[test]
fn exports_all_channels_and_writes_watermarks() {
    let env = TestEnv::new(CONFIG);

    env.archive()
        .assert()
        .success()
        .stderr(predicate::str::contains("Guild/general#10: ok"))
        .stderr(predicate::str::contains("2 succeeded, 0 failed, 0 skipped"));

    let calls = env.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].contains("--channel 10 --token main-secret --bot true"));
    assert!(calls[0].contains("--after 2024-05-01T00:00:00.000000"));
    assert!(calls[0].contains("--partition 1000"));
    assert!(calls[1].contains("--channel 20 --token X --bot true"));
    assert!(calls[1].contains("--partition 100"));
    assert!(!calls[1].contains("--after"));

    let config = env.config();
    let general = after_of(&config, "1.10").unwrap();
    assert!(general.as_str() > "2024-05-01T00:00:00.000000");
    assert!(after_of(&config, "1.20").is_some());
    assert!(config.starts_with("; channels to archive\n[DEFAULT]\n"));
    assert!(config.contains("# main chat, already archived once\n[1.10]\n"));
    assert!(config.contains("[1.20]\nname = bots\ntoken = second-bot\npartition = 100\nafter = "));
}

#[test]
fn second_run_resumes_from_stored_watermark() {
    let env = TestEnv::new(CONFIG);
    env.archive().assert().success();
    let first = after_of(&env.config(), "1.20").unwrap();

    env.archive().assert().success();
    let calls = env.calls();
    assert_eq!(calls.len(), 4);
    assert!(calls[3].contains(&format!("--after {}", first)));
    assert!(after_of(&env.config(), "1.20").unwrap() >= first);
}

#[test]
fn failing_channel_keeps_its_watermark_and_fails_the_run() {
    let env = TestEnv::new(&format!(
        "{}\n[1.30]\nname = locked\nafter = 2024-01-01T00:00:00.000000\n",
        CONFIG
    ));

    env.archive()
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "Guild/locked#30: FAILED: exit code 1: Error: Forbidden",
        ))
        .stderr(predicate::str::contains("2 succeeded, 1 failed"));

    let config = env.config();
    assert_eq!(
        after_of(&config, "1.30").as_deref(),
        Some("2024-01-01T00:00:00.000000")
    );
    assert!(after_of(&config, "1.20").is_some());
}

#[test]
fn empty_window_counts_as_success() {
    let env = TestEnv::new("[1]\nname = Guild\n\n[1.40]\nname = quiet\n");

    env.archive()
        .assert()
        .success()
        .stderr(predicate::str::contains("Guild/quiet#40: no new messages"));
    assert!(after_of(&env.config(), "1.40").is_some());
}

#[test]
fn unknown_token_only_fails_that_channel() {
    let env = TestEnv::new(&format!("{}\n[1.50]\ntoken = ghost\n", CONFIG));

    env.archive()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown token `ghost`"));
    assert_eq!(env.calls().len(), 2);
    assert_eq!(after_of(&env.config(), "1.50"), None);
}

#[test]
fn strict_mode_aborts_before_exporting() {
    let env = TestEnv::new(&format!("{}\n[1.50]\ntoken = ghost\n", CONFIG));
    let before = env.config();

    env.archive()
        .arg("--strict")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Aborting run"));
    assert!(env.calls().is_empty());
    assert_eq!(env.config(), before);
}

#[test]
fn malformed_config_fails_fast() {
    let env = TestEnv::new(&format!("{}\n[1.abc]\nname = typo\n", CONFIG));

    env.archive()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Malformed channel section [1.abc]"));
    assert!(env.calls().is_empty());
}

#[test]
fn dry_run_prints_redacted_plan_without_running() {
    let env = TestEnv::new(CONFIG);

    env.archive()
        .arg("--dry-run")
        .assert()
        .success()
        .stdout(predicate::str::contains("--token [REDACTED]"))
        .stdout(predicate::str::contains("main-secret").not())
        .stdout(predicate::str::contains("Guild/bots#20"));
    assert!(env.calls().is_empty());
    assert_eq!(env.config(), CONFIG);
}

#[test]
fn missing_executable_skips_the_rest() {
    let env = TestEnv::new(CONFIG);

    env.archive_with(&env.path().join("not-installed"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to launch"))
        .stderr(predicate::str::contains("skipped: exporter executable is unusable"));
    assert_eq!(env.config(), CONFIG);
}

#[test]
fn preferences_file_supplies_defaults() {
    let env = TestEnv::new(CONFIG);
    let prefs = env.path().join("prefs.toml");
    std::fs::write(&prefs, "jobs = 2\nstrict = true\n").unwrap();
    std::fs::write(
        env.config_path(),
        format!("{}\n[1.50]\ntoken = ghost\n", CONFIG),
    )
    .unwrap();

    env.archive()
        .arg("--preferences")
        .arg(&prefs)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Aborting run"));
    assert!(env.calls().is_empty());
}

#[test]
fn explicit_missing_preferences_is_an_error() {
    let env = TestEnv::new(CONFIG);
    env.archive()
        .arg("--preferences")
        .arg(env.path().join("nope.toml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Preferences file not found"));
}
