//! Shared fixtures for CLI tests.
//!
//! Each `TestEnv` owns a temp directory holding the config, the token store
//! and a fake exporter script that appends its arguments to `calls.log`.

#![allow(dead_code)]

use assert_cmd::Command;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
pub use tempfile::TempDir;

/// Fails for channel 30 and reports an empty window for channel 40.
const FAKE_EXPORTER: &str = r#"#!/bin/sh
echo "$@" >> "$(dirname "$0")/calls.log"
case "$*" in
  *"--channel 30 "*)
    echo "Error: Forbidden" >&2
    exit 1
    ;;
  *"--channel 40 "*)
    echo "Channel 'quiet' of guild 'Guild' contains no messages for the specified period." >&2
    exit 1
    ;;
esac
exit 0
"#;

pub const TOKENS: &str = "\
[main]
token = main-secret

[second-bot]
token = X
bot = True
";

pub struct TestEnv {
    pub dir: TempDir,
}

impl TestEnv {
    pub fn new(config: &str) -> Self {
        let env = Self {
            dir: TempDir::new().unwrap(),
        };
        fs::write(env.config_path(), config).unwrap();
        fs::write(env.path().join("tokens.ini"), TOKENS).unwrap();
        let exe = env.exporter_path();
        fs::write(&exe, FAKE_EXPORTER).unwrap();
        fs::set_permissions(&exe, fs::Permissions::from_mode(0o755)).unwrap();
        env
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn config_path(&self) -> PathBuf {
        self.path().join("config.ini")
    }

    pub fn exporter_path(&self) -> PathBuf {
        self.path().join("exporter.sh")
    }

    pub fn config(&self) -> String {
        fs::read_to_string(self.config_path()).unwrap()
    }

    /// One line per exporter invocation; empty if it never ran.
    pub fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.path().join("calls.log"))
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// The binary wired to this environment's files.
    pub fn archive(&self) -> Command {
        self.archive_with(&self.exporter_path())
    }

    /// Like [`archive`](Self::archive) with a different exporter executable.
    pub fn archive_with(&self, executable: &Path) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_discord-chat-archive"));
        cmd.current_dir(self.path())
            .env("XDG_CONFIG_HOME", self.path().join("xdg"))
            .env_remove("RUST_LOG")
            .arg("--config")
            .arg(self.config_path())
            .arg("--tokens")
            .arg(self.path().join("tokens.ini"))
            .arg("--executable")
            .arg(executable)
            .arg("--out")
            .arg(self.path().join("out"));
        cmd
    }
}

/// The `after` value of one section, if present.
pub fn after_of(config: &str, section: &str) -> Option<String> {
    let header = format!("[{}]", section);
    config
        .lines()
        .skip_while(|l| l.trim() != header)
        .skip(1)
        .take_while(|l| !l.trim_start().starts_with('['))
        .find_map(|l| l.strip_prefix("after = ").map(str::to_string))
}
