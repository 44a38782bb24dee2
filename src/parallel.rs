use crate::planner::InvocationSpec;
use crate::runner::ProcessRunner;
use crate::utils::{ChannelReport, ExportConfig, export_channel};
use crate::watermark::{Clock, WatermarkWriter};
use crossbeam_channel::{bounded, unbounded};
use std::sync::atomic::{AtomicBool, Ordering};

/// Run every planned channel on `config.jobs` worker threads.
///
/// Reports come back in plan order. Once a launch shows the executable is
/// unusable, channels not yet started are reported as skipped.
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
    let n_workers = config.jobs.clamp(1, specs.len().max(1));
    let (tx, rx) = bounded::<(usize, &InvocationSpec)>(n_workers * 2);
    let (done_tx, done_rx) = unbounded::<(usize, ChannelReport)>();
    let executable_unusable = AtomicBool::new(false);

    tracing::debug!(channels = specs.len(), workers = n_workers, "starting exports");

    std::thread::scope(|s| {
        for _ in 0..n_workers {
            let rx = rx.clone();
            let done_tx = done_tx.clone();
            let executable_unusable = &executable_unusable;

            s.spawn(move || {
                while let Ok((idx, spec)) = rx.recv() {
                    let report = if executable_unusable.load(Ordering::Relaxed) {
                        ChannelReport::skipped(spec, "exporter executable is unusable")
                    } else {
                        let run = export_channel(spec, &config.executable, runner, clock, writer);
                        if run.executable_unusable {
                            executable_unusable.store(true, Ordering::Relaxed);
                        }
                        run.report
                    };
                    if done_tx.send((idx, report)).is_err() {
                        break;
                    }
                }
            });
        }

        drop(rx);
        drop(done_tx);

        for item in specs.iter().enumerate() {
            if tx.send(item).is_err() {
                break;
            }
        }
        drop(tx);
    });

    let mut reports: Vec<(usize, ChannelReport)> = done_rx.iter().collect();
    reports.sort_by_key(|(idx, _)| *idx);
    reports.into_iter().map(|(_, r)| r).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::RunReport;
    use crate::utils::testing::*;
    use crate::utils::{ChannelState, Outcome};
    use crate::watermark::Watermark;

    const CONFIG: &str = "\
[DEFAULT]
format = json

[1]
name = Guild

[1.10]
name = alpha
after = 2024-05-01T00:00:00.000000

[1.20]
name = beta
after = 2024-05-01T00:00:00.000000

[1.30]
name = gamma
";

    #[test]
    fn failure_is_isolated_to_its_channel() {
        let (specs, writer) = plan(CONFIG);
        let runner = FakeRunner::default()
            .reply("20", Scripted::Report(RunReport::failed(1, "boom")));

        let reports = execute(&config(1), &specs, &runner, &FixedClock(noon()), &writer);

        let states: Vec<_> = reports.iter().map(|r| r.outcome.state()).collect();
        assert_eq!(
            states,
            vec![ChannelState::Succeeded, ChannelState::Failed, ChannelState::Succeeded]
        );

        let prior: Watermark = "2024-05-01T00:00:00".parse().unwrap();
        assert_eq!(writer.current(&specs[0].channel), Some(Watermark::new(noon())));
        assert_eq!(writer.current(&specs[1].channel), Some(prior));
        assert_eq!(writer.current(&specs[2].channel), Some(Watermark::new(noon())));
        assert_eq!(runner.called(), vec!["10", "20", "30"]);
    }

    #[test]
    fn unusable_executable_skips_remaining_channels() {
        let (specs, writer) = plan(CONFIG);
        let runner = FakeRunner::default().reply("10", Scripted::NotFound);

        let reports = execute(&config(1), &specs, &runner, &FixedClock(noon()), &writer);

        assert!(matches!(reports[0].outcome, Outcome::LaunchFailed(_)));
        assert_eq!(reports[1].outcome.state(), ChannelState::Skipped);
        assert_eq!(reports[2].outcome.state(), ChannelState::Skipped);
        assert_eq!(runner.called(), vec!["10"]);
        assert_eq!(writer.current(&specs[2].channel), None);
    }

    #[test]
    fn worker_pool_runs_every_channel_and_keeps_plan_order() {
        let mut text = String::from("[DEFAULT]\nformat = csv\n");
        for c in 1..=24 {
            text.push_str(&format!("\n[7.{}]\nname = c{}\n", c, c));
        }
        let (specs, writer) = plan(&text);
        let runner = FakeRunner::default()
            .reply("5", Scripted::Report(RunReport::failed(2, "nope")));

        let reports = execute(&config(4), &specs, &runner, &FixedClock(noon()), &writer);

        assert_eq!(reports.len(), 24);
        for (c, report) in (1..=24).zip(&reports) {
            assert_eq!(report.channel.channel_id(), c.to_string());
            if c == 5 {
                assert_eq!(report.outcome.state(), ChannelState::Failed);
                assert_eq!(writer.current(&report.channel), None);
            } else {
                assert_eq!(report.outcome, Outcome::Exported);
                assert_eq!(writer.current(&report.channel), Some(Watermark::new(noon())));
            }
        }
        assert_eq!(runner.called().len(), 24);
    }

    #[test]
    fn nothing_planned_is_a_no_op() {
        let (_, writer) = plan(CONFIG);
        let reports = execute(&config(8), &[], &FakeRunner::default(), &FixedClock(noon()), &writer);
        assert!(reports.is_empty());
    }

    #[test]
    fn watermark_never_regresses_on_clock_skew() {
        let (specs, writer) = plan(CONFIG);
        let skewed = "2024-04-01T00:00:00".parse::<Watermark>().unwrap();
        execute(
            &config(1),
            &specs,
            &FakeRunner::default(),
            &FixedClock(skewed.as_datetime()),
            &writer,
        );
        let prior: Watermark = "2024-05-01T00:00:00".parse().unwrap();
        assert_eq!(writer.current(&specs[0].channel), Some(prior));
        assert_eq!(writer.current(&specs[2].channel), Some(skewed));
    }
}
