use clap::Parser;
use discord_chat_archive::ini::IniDocument;
use discord_chat_archive::planner::ExportPlanner;
use discord_chat_archive::runner::CommandRunner;
use discord_chat_archive::tokens::TokenStore;
use discord_chat_archive::utils::{ExportConfig, Summary};
use discord_chat_archive::watermark::{Clock, SystemClock, WatermarkWriter};
use discord_chat_archive::{logging, settings};
use eyre::{Context, Result, eyre};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

const DEFAULT_OUT_DIR: &str = "out";
const DEFAULT_CONFIG: &str = "config.ini";
const DEFAULT_TOKENS: &str = "tokens.ini";

#[cfg(windows)]
const DEFAULT_EXECUTABLE: &str = "bin/DiscordChatExporter.CLI/DiscordChatExporter.Cli.exe";
#[cfg(not(windows))]
const DEFAULT_EXECUTABLE: &str = "bin/DiscordChatExporter.CLI/DiscordChatExporter.Cli";

/// Incrementally archive Discord channels with DiscordChatExporter.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Output directory.
    /// Defaults to ./out if not set in preferences.
    #[arg(short, long, value_name = "DIR")]
    out: Option<PathBuf>,

    /// Channel config (INI). Watermarks are written back into it.
    /// Defaults to ./config.ini.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Token store (INI).
    /// Defaults to ./tokens.ini.
    #[arg(short, long, value_name = "PATH")]
    tokens: Option<PathBuf>,

    /// Path to the DiscordChatExporter CLI executable.
    /// See https://github.com/Tyrrrz/DiscordChatExporter/releases/
    #[arg(short, long, value_name = "PATH")]
    executable: Option<PathBuf>,

    /// Number of exports to run at once.
    #[arg(short, long, value_name = "N")]
    jobs: Option<usize>,

    /// Kill an export that runs longer than this many seconds.
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Abort the whole run if any channel's token cannot be resolved.
    #[arg(long)]
    strict: bool,

    /// Print the planned exporter invocations (tokens redacted) and exit.
    #[arg(long)]
    dry_run: bool,

    /// Path to a preferences file.
    /// Defaults to $XDG_CONFIG_HOME/discord-chat-archive/preferences.toml
    #[arg(long, value_name = "PATH")]
    preferences: Option<PathBuf>,

    /// Debug logging.
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors; no summary.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    out_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    tokens: Option<PathBuf>,
    executable: Option<PathBuf>,
    jobs: Option<usize>,
    timeout_secs: Option<u64>,
    strict: Option<bool>,
}

fn load_file_config(explicit_path: Option<&Path>) -> Result<FileConfig> {
    let path = if let Some(p) = explicit_path {
        if !p.exists() {
            return Err(eyre!("Preferences file not found: {}", p.display()));
        }
        Some(p.to_path_buf())
    } else {
        dirs::config_dir()
            .map(|d| d.join("discord-chat-archive/preferences.toml"))
            .filter(|p| p.exists())
    };

    match path {
        None => Ok(FileConfig::default()),
        Some(p) => {
            let content = fs::read_to_string(&p)
                .wrap_err_with(|| format!("Failed to read preferences: {}", p.display()))?;
            toml::from_str(&content)
                .wrap_err_with(|| format!("Failed to parse preferences: {}", p.display()))
        }
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.quiet);

    // 1. Load preferences (CLI path > default path)
    let prefs = load_file_config(cli.preferences.as_deref())?;

    // 2. Resolve paths and knobs (CLI > Preferences > Default)
    let out_dir = cli
        .out
        .or(prefs.out_dir)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUT_DIR));
    let config_path = cli
        .config
        .or(prefs.config)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let tokens_path = cli
        .tokens
        .or(prefs.tokens)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_TOKENS));
    let executable = cli
        .executable
        .or(prefs.executable)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_EXECUTABLE));
    let jobs = cli.jobs.or(prefs.jobs).unwrap_or(1).max(1);
    let timeout = cli.timeout.or(prefs.timeout_secs).map(Duration::from_secs);
    let strict = cli.strict || prefs.strict.unwrap_or(false);

    // 3. Static configuration; any problem here aborts before exporting
    let document = IniDocument::load(&config_path)
        .wrap_err_with(|| format!("Failed to load config: {}", config_path.display()))?;
    let channels = settings::resolve_channels(&document)
        .wrap_err_with(|| format!("Invalid config: {}", config_path.display()))?;
    let tokens = TokenStore::load(&tokens_path)
        .wrap_err_with(|| format!("Failed to load tokens: {}", tokens_path.display()))?;

    // 4. Plan every channel
    let plan = ExportPlanner::new(&out_dir, &tokens)
        .plan_all(&channels, SystemClock.now(), strict)
        .wrap_err("Aborting run (--strict)")?;

    if cli.dry_run {
        for spec in &plan.specs {
            println!(
                "{}: {} {}",
                spec.label,
                executable.display(),
                spec.redacted_args().join(" ")
            );
        }
        let summary = Summary::new(plan.rejected, Vec::new());
        for report in &summary.reports {
            eprintln!("{}", report.summary_line());
        }
        return Ok(if summary.is_success() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        });
    }

    fs::create_dir_all(&out_dir)
        .wrap_err_with(|| format!("Failed to create output directory: {}", out_dir.display()))?;

    // 5. Run the exports
    let config = ExportConfig {
        executable,
        jobs,
        quiet: cli.quiet,
    };
    let writer = WatermarkWriter::new(document, config_path);
    let runner = CommandRunner::new(timeout);

    #[cfg(feature = "sequential")]
    let reports = discord_chat_archive::sequential::execute(
        &config,
        &plan.specs,
        &runner,
        &SystemClock,
        &writer,
    );

    #[cfg(not(feature = "sequential"))]
    let reports = discord_chat_archive::parallel::execute(
        &config,
        &plan.specs,
        &runner,
        &SystemClock,
        &writer,
    );

    let summary = Summary::new(plan.rejected, reports);
    if !config.quiet {
        summary.print();
    }

    Ok(if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
