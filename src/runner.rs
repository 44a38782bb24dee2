use crate::error::LaunchError;
use crate::planner::InvocationSpec;
use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use crossbeam_channel::bounded;
use wait_timeout::ChildExt;

/// Printed by the exporter when the `after` window is empty.
const NO_MESSAGES_MARKER: &str = "contains no messages for the specified period";

/// How long to wait for stderr to close once the child has exited.
const STDERR_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitState {
    Success,
    /// Non-zero exit; `None` when killed by a signal.
    Failed(Option<i32>),
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub state: ExitState,
    pub stderr: String,
}

impl RunReport {
    pub fn success() -> Self {
        Self {
            state: ExitState::Success,
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            state: ExitState::Failed(Some(code)),
            stderr: stderr.into(),
        }
    }

    /// The exporter refuses to write a file for an empty window and exits
    /// non-zero; that still means the channel is up to date.
    pub fn is_empty_window(&self) -> bool {
        matches!(self.state, ExitState::Failed(_)) && self.stderr.contains(NO_MESSAGES_MARKER)
    }

    /// Last non-empty stderr line, for one-line failure reports.
    pub fn stderr_tail(&self) -> Option<&str> {
        self.stderr.lines().rev().map(str::trim).find(|l| !l.is_empty())
    }
}

/// Runs the external exporter for one planned channel.
pub trait ProcessRunner: Sync {
    fn run(&self, executable: &Path, spec: &InvocationSpec) -> Result<RunReport, LaunchError>;
}

/// Spawns the exporter as a child process.
///
/// Stdout is discarded; stderr is captured on a helper thread so a chatty
/// child cannot block on a full pipe while we wait on it.
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    timeout: Option<Duration>,
}

impl CommandRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl ProcessRunner for CommandRunner {
    fn run(&self, executable: &Path, spec: &InvocationSpec) -> Result<RunReport, LaunchError> {
        let mut cmd = Command::new(executable);
        cmd.args(spec.args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        // Own process group, so a timeout also reaches wrapper grandchildren.
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut cmd, 0);

        let mut child = cmd.spawn().map_err(|source| LaunchError::Spawn {
            executable: executable.to_path_buf(),
            source,
        })?;

        let (stderr_tx, stderr_rx) = bounded::<String>(1);
        if let Some(mut pipe) = child.stderr.take() {
            std::thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf);
                let _ = stderr_tx.send(String::from_utf8_lossy(&buf).into_owned());
            });
        }

        let wait_err = |source: io::Error| LaunchError::Wait {
            executable: executable.to_path_buf(),
            source,
        };

        let status = match self.timeout {
            None => Some(child.wait().map_err(wait_err)?),
            Some(limit) => match child.wait_timeout(limit).map_err(wait_err)? {
                Some(status) => Some(status),
                None => {
                    tracing::warn!(channel = %spec.channel, ?limit, "export timed out, killing");
                    kill_tree(&mut child);
                    child.wait().map_err(wait_err)?;
                    None
                }
            },
        };

        // A descendant that outlives the child can hold the pipe open.
        let stderr = match stderr_rx.recv_timeout(STDERR_GRACE) {
            Ok(stderr) => stderr,
            Err(_) => {
                tracing::debug!(channel = %spec.channel, "stderr still open after exit, not waiting");
                String::new()
            }
        };

        let state = match status {
            None => ExitState::TimedOut,
            Some(s) if s.success() => ExitState::Success,
            Some(s) => ExitState::Failed(s.code()),
        };
        Ok(RunReport { state, stderr })
    }
}

#[cfg(unix)]
fn kill_tree(child: &mut Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let group = Pid::from_raw(child.id() as i32);
    if let Err(errno) = killpg(group, Signal::SIGKILL) {
        tracing::debug!(%errno, "killpg failed, killing the child only");
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) {
    let _ = child.kill();
}
