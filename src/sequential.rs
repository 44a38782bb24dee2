use crate::planner::InvocationSpec;
use crate::runner::ProcessRunner;
use crate::utils::{ChannelReport, ExportConfig, export_channel};
use crate::watermark::{Clock, WatermarkWriter};
use indicatif::{ProgressBar, ProgressStyle};

/// Run planned channels one at a time behind a progress bar.
pub fn execute<R, C>(
    config: &ExportConfig,
    specs: &[InvocationSpec],
    runner: &R,
    clock: &C,
    writer: &WatermarkWriter,
) -> Vec<ChannelReport>
where
    R: ProcessRunner + ?Sized,
    C: Clock + ?Sized,
{
    let pb = make_bar(specs.len() as u64, config.quiet);
    let mut reports = Vec::with_capacity(specs.len());
    let mut executable_unusable = false;

    for spec in specs {
        if executable_unusable {
            reports.push(ChannelReport::skipped(spec, "exporter executable is unusable"));
            pb.inc(1);
            continue;
        }

        pb.set_message(spec.label.clone());
        let run = export_channel(spec, &config.executable, runner, clock, writer);
        executable_unusable = run.executable_unusable;
        reports.push(run.report);
        pb.inc(1);
    }

    pb.finish_and_clear();
    reports
}

fn make_bar(total: u64, quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(total);
    match ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}") {
        Ok(style) => bar.set_style(style.progress_chars("=>-")),
        Err(e) => tracing::debug!(error = %e, "falling back to default progress style"),
    }
    bar
}
