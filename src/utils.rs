use crate::planner::{InvocationSpec, Rejected};
use crate::runner::{ExitState, ProcessRunner};
use crate::settings::ChannelKey;
use crate::watermark::{Clock, Watermark, WatermarkWriter};
use std::path::{Path, PathBuf};

/// Configuration required to run the exports.
/// This decouples the logic from how the arguments were parsed (CLI/preferences file).
#[derive(Clone, Debug)]
pub struct ExportConfig {
    pub executable: PathBuf,
    pub jobs: usize,
    pub quiet: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Exported,
    /// The exporter found nothing after the watermark. Counts as success.
    NoNewMessages,
    ExportFailed(String),
    TimedOut,
    LaunchFailed(String),
    CredentialFailed(String),
    Skipped(String),
}

impl Outcome {
    pub fn state(&self) -> ChannelState {
        match self {
            Outcome::Exported | Outcome::NoNewMessages => ChannelState::Succeeded,
            Outcome::ExportFailed(_)
            | Outcome::TimedOut
            | Outcome::LaunchFailed(_)
            | Outcome::CredentialFailed(_) => ChannelState::Failed,
            Outcome::Skipped(_) => ChannelState::Skipped,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ChannelReport {
    pub channel: ChannelKey,
    pub label: String,
    pub outcome: Outcome,
    /// Watermark in effect after a successful export.
    pub watermark: Option<Watermark>,
    /// Set when the export succeeded but the watermark could not be saved.
    pub persist_error: Option<String>,
}

impl ChannelReport {
    pub fn new(channel: ChannelKey, label: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            channel,
            label: label.into(),
            outcome,
            watermark: None,
            persist_error: None,
        }
    }

    pub fn skipped(spec: &InvocationSpec, reason: impl Into<String>) -> Self {
        Self::new(
            spec.channel.clone(),
            spec.label.clone(),
            Outcome::Skipped(reason.into()),
        )
    }

    pub fn summary_line(&self) -> String {
        let mut line = match &self.outcome {
            Outcome::Exported => match self.watermark {
                Some(w) => format!("{}: ok (after = {})", self.label, w),
                None => format!("{}: ok", self.label),
            },
            Outcome::NoNewMessages => format!("{}: no new messages", self.label),
            Outcome::ExportFailed(reason)
            | Outcome::LaunchFailed(reason)
            | Outcome::CredentialFailed(reason) => format!("{}: FAILED: {}", self.label, reason),
            Outcome::TimedOut => format!("{}: FAILED: timed out", self.label),
            Outcome::Skipped(reason) => format!("{}: skipped: {}", self.label, reason),
        };
        if let Some(err) = &self.persist_error {
            line.push_str(&format!(" (warning: watermark not saved: {})", err));
        }
        line
    }
}

/// Result of one channel run plus whether the executable proved unusable.
pub struct ChannelRun {
    pub report: ChannelReport,
    pub executable_unusable: bool,
}

/// Drive one channel through `PENDING → RUNNING → {SUCCEEDED, FAILED}`.
///
/// The start time is captured before launch and becomes the new watermark
/// on success. A failed export leaves the watermark alone so the next run
/// retries the same window. A failed write-back is only a warning.
pub fn export_channel<R, C>(
    spec: &InvocationSpec,
    executable: &Path,
    runner: &R,
    clock: &C,
    writer: &WatermarkWriter,
) -> ChannelRun
where
    R: ProcessRunner + ?Sized,
    C: Clock + ?Sized,
{
    let started_at = Watermark::new(clock.now());
    tracing::info!(channel = %spec.channel, label = %spec.label, "exporting");
    tracing::debug!(args = ?spec.redacted_args(), "invoking exporter");

    let mut executable_unusable = false;
    let outcome = match runner.run(executable, spec) {
        Err(e) => {
            executable_unusable = e.is_executable_unusable();
            Outcome::LaunchFailed(e.to_string())
        }
        Ok(report) => match &report.state {
            ExitState::Success => Outcome::Exported,
            ExitState::Failed(_) if report.is_empty_window() => Outcome::NoNewMessages,
            ExitState::Failed(code) => {
                let status = match code {
                    Some(c) => format!("exit code {}", c),
                    None => "terminated by signal".to_string(),
                };
                Outcome::ExportFailed(match report.stderr_tail() {
                    Some(tail) => format!("{}: {}", status, tail),
                    None => status,
                })
            }
            ExitState::TimedOut => Outcome::TimedOut,
        },
    };

    let mut report = ChannelReport::new(spec.channel.clone(), spec.label.clone(), outcome);
    match report.outcome.state() {
        ChannelState::Succeeded => match writer.advance(&spec.channel, spec.after, started_at) {
            Ok(w) => {
                tracing::info!(channel = %spec.channel, after = %w, "export finished");
                report.watermark = Some(w);
            }
            Err(e) => {
                tracing::warn!(
                    channel = %spec.channel,
                    error = %e,
                    "export finished but the watermark was not saved; next run repeats this window"
                );
                report.persist_error = Some(e.to_string());
            }
        },
        _ => {
            tracing::warn!(channel = %spec.channel, outcome = ?report.outcome, "export failed");
        }
    }

    ChannelRun {
        report,
        executable_unusable,
    }
}

/// Per-channel reports for a whole run.
#[derive(Debug, Default)]
pub struct Summary {
    pub reports: Vec<ChannelReport>,
}

impl Summary {
    pub fn new(rejected: Vec<Rejected>, reports: Vec<ChannelReport>) -> Self {
        let mut all: Vec<ChannelReport> = rejected
            .into_iter()
            .map(|r| {
                let outcome = Outcome::CredentialFailed(r.error.to_string());
                ChannelReport::new(r.channel, r.label, outcome)
            })
            .collect();
        all.extend(reports);
        Self { reports: all }
    }

    pub fn count(&self, state: ChannelState) -> usize {
        self.reports
            .iter()
            .filter(|r| r.outcome.state() == state)
            .count()
    }

    pub fn is_success(&self) -> bool {
        self.count(ChannelState::Failed) == 0 && self.count(ChannelState::Skipped) == 0
    }

    pub fn print(&self) {
        for report in &self.reports {
            eprintln!("{}", report.summary_line());
        }
        let mut summary = format!(
            "Done. {} succeeded, {} failed, {} skipped.",
            self.count(ChannelState::Succeeded),
            self.count(ChannelState::Failed),
            self.count(ChannelState::Skipped)
        );
        let unsaved = self
            .reports
            .iter()
            .filter(|r| r.persist_error.is_some())
            .count();
        if unsaved > 0 {
            summary.push_str(&format!(" {} watermark(s) not saved.", unsaved));
        }
        eprintln!("{}", summary);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fakes shared by the coordinator tests.

    use super::*;
    use crate::error::LaunchError;
    use crate::ini::IniDocument;
    use crate::planner::ExportPlanner;
    use crate::runner::RunReport;
    use crate::settings::resolve_channels;
    use crate::tokens::TokenStore;
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::HashMap;
    use std::io;
    use std::sync::Mutex;

    pub struct FixedClock(pub DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    pub fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    pub enum Scripted {
        Report(RunReport),
        NotFound,
    }

    /// Replies per channel id and records every call.
    #[derive(Default)]
    pub struct FakeRunner {
        pub replies: HashMap<String, Scripted>,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeRunner {
        pub fn reply(mut self, channel_id: &str, reply: Scripted) -> Self {
            self.replies.insert(channel_id.to_string(), reply);
            self
        }

        pub fn called(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ProcessRunner for FakeRunner {
        fn run(&self, executable: &Path, spec: &InvocationSpec) -> Result<RunReport, LaunchError> {
            let id = spec.channel.channel_id().to_string();
            self.calls.lock().unwrap().push(id.clone());
            match self.replies.get(&id) {
                None => Ok(RunReport::success()),
                Some(Scripted::Report(r)) => Ok(r.clone()),
                Some(Scripted::NotFound) => Err(LaunchError::Spawn {
                    executable: executable.to_path_buf(),
                    source: io::Error::from(io::ErrorKind::NotFound),
                }),
            }
        }
    }

    pub const TOKENS: &str = "[main]\ntoken = secret\n";

    /// Plan `config` against [`TOKENS`] at [`noon`].
    pub fn plan(config: &str) -> (Vec<InvocationSpec>, WatermarkWriter) {
        let doc = IniDocument::parse(config).unwrap();
        let channels = resolve_channels(&doc).unwrap();
        let tokens = TokenStore::new(IniDocument::parse(TOKENS).unwrap());
        let plan = ExportPlanner::new(Path::new("out"), &tokens)
            .plan_all(&channels, noon(), false)
            .unwrap();
        (plan.specs, WatermarkWriter::in_memory(doc))
    }

    pub fn config(jobs: usize) -> ExportConfig {
        ExportConfig {
            executable: "exporter".into(),
            jobs,
            quiet: true,
        }
    }
}
