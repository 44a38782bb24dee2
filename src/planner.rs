use crate::error::CredentialError;
use crate::settings::{ChannelConfig, ChannelKey, ExportFormat};
use crate::tokens::TokenStore;
use crate::watermark::Watermark;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use thiserror::Error;

const REDACTED: &str = "[REDACTED]";

/// Everything needed to run the exporter once for one channel.
#[derive(Debug)]
pub struct InvocationSpec {
    pub channel: ChannelKey,
    pub label: String,
    pub output: PathBuf,
    token: SecretString,
    pub bot: bool,
    pub format: ExportFormat,
    pub partition: Option<u32>,
    pub dateformat: String,
    pub after: Option<Watermark>,
}

impl InvocationSpec {
    /// Arguments after the executable path.
    pub fn args(&self) -> Vec<OsString> {
        self.build_args(self.token.expose_secret())
    }

    /// Same as [`args`](Self::args) with the token masked; safe to log.
    pub fn redacted_args(&self) -> Vec<String> {
        self.build_args(REDACTED)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    fn build_args(&self, token: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "export".into(),
            "--channel".into(),
            self.channel.channel_id().into(),
            "--token".into(),
            token.into(),
            "--bot".into(),
            self.bot.to_string().into(),
            "--output".into(),
            self.output.clone().into_os_string(),
            "--format".into(),
            self.format.exporter_name().into(),
            "--dateformat".into(),
            self.dateformat.as_str().into(),
        ];
        if let Some(partition) = self.partition {
            args.push("--partition".into());
            args.push(partition.to_string().into());
        }
        if let Some(after) = self.after {
            args.push("--after".into());
            args.push(after.to_string().into());
        }
        args
    }
}

/// Lower bound for the next export: an explicit `after` in the merged
/// settings, else the stored watermark, else none (full history).
pub fn resolve_after(channel: &ChannelConfig) -> Option<Watermark> {
    channel.settings.after.or(channel.watermark)
}

/// `<server>-<channel>-<channel_id>-<unix_ts>.<ext>` under `out_dir`.
///
/// The timestamp is the `after` bound, or the planning time for a first
/// export, so the same inputs always name the same file.
pub fn output_path(out_dir: &Path, channel: &ChannelConfig, stamp: Watermark) -> PathBuf {
    let server = channel
        .server_name
        .as_deref()
        .map(slug::slugify)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| channel.key.server_id().to_string());

    let mut parts = vec![server];
    if let Some(name) = channel
        .name
        .as_deref()
        .map(slug::slugify)
        .filter(|s| !s.is_empty())
    {
        parts.push(name);
    }
    parts.push(channel.key.channel_id().to_string());
    parts.push(stamp.unix_seconds().to_string());

    out_dir.join(format!(
        "{}.{}",
        parts.join("-"),
        channel.settings.format.extension()
    ))
}

#[derive(Error, Debug)]
#[error("Cannot plan {channel}: {source}")]
pub struct PlanningError {
    pub channel: ChannelKey,
    #[source]
    pub source: CredentialError,
}

/// A channel dropped from the run because its credential did not resolve.
#[derive(Debug)]
pub struct Rejected {
    pub channel: ChannelKey,
    pub label: String,
    pub error: CredentialError,
}

#[derive(Debug, Default)]
pub struct Plan {
    pub specs: Vec<InvocationSpec>,
    pub rejected: Vec<Rejected>,
}

pub struct ExportPlanner<'a> {
    out_dir: &'a Path,
    tokens: &'a TokenStore,
}

impl<'a> ExportPlanner<'a> {
    pub fn new(out_dir: &'a Path, tokens: &'a TokenStore) -> Self {
        Self { out_dir, tokens }
    }

    pub fn plan(
        &self,
        channel: &ChannelConfig,
        planned_at: DateTime<Utc>,
    ) -> Result<InvocationSpec, CredentialError> {
        let credential = self.tokens.resolve(&channel.settings.token)?;
        let after = resolve_after(channel);
        let stamp = after.unwrap_or_else(|| Watermark::new(planned_at));

        Ok(InvocationSpec {
            channel: channel.key.clone(),
            label: channel.label(),
            output: output_path(self.out_dir, channel, stamp),
            token: credential.secret,
            bot: credential.bot,
            format: channel.settings.format,
            partition: channel.settings.partition,
            dateformat: channel.settings.dateformat.clone(),
            after,
        })
    }

    /// Plan every channel.
    ///
    /// A credential failure drops just that channel into `rejected`, unless
    /// `strict` is set, in which case the first one aborts planning.
    pub fn plan_all(
        &self,
        channels: &[ChannelConfig],
        planned_at: DateTime<Utc>,
        strict: bool,
    ) -> Result<Plan, PlanningError> {
        let mut plan = Plan::default();
        for channel in channels {
            match self.plan(channel, planned_at) {
                Ok(spec) => plan.specs.push(spec),
                Err(source) if strict => {
                    return Err(PlanningError {
                        channel: channel.key.clone(),
                        source,
                    });
                }
                Err(error) => {
                    tracing::warn!(channel = %channel.key, %error, "skipping channel");
                    plan.rejected.push(Rejected {
                        channel: channel.key.clone(),
                        label: channel.label(),
                        error,
                    });
                }
            }
        }
        Ok(plan)
    }
}
