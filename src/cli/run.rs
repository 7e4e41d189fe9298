use super::ui;
use crate::Service;
use crate::core::jobs::JobKind;
use crate::core::schedule::{RunOutcome, Scheduler};
use anyhow::{Context, Result, bail};
use tracing::info;

/// Runs the service until Ctrl-C, then drains in-flight jobs.
pub async fn run(service: &Service) -> Result<()> {
    info!("Rate monitor starting...");

    // Warm up with fresh rates and an immediate check.
    service.scheduler.run_now(JobKind::Ingest).await;
    service.scheduler.run_now(JobKind::Evaluate).await;

    service.scheduler.start().await;
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutdown requested, waiting for running jobs");
    service.scheduler.stop().await;
    info!("Rate monitor stopped");
    Ok(())
}

/// Runs a single job now and prints its summary.
pub async fn run_once(scheduler: &Scheduler, kind: JobKind) -> Result<()> {
    let spinner = ui::new_spinner(&format!("Running {kind}"));
    let outcome = scheduler.run_now(kind).await;
    spinner.finish_and_clear();

    match outcome {
        RunOutcome::Completed(summary) => {
            let status = if summary.failed == 0 {
                ui::style_text("done", ui::StyleType::Success)
            } else {
                ui::style_text("done with failures", ui::StyleType::Error)
            };
            println!(
                "{kind}: {status} ({} processed, {} failed)",
                summary.processed, summary.failed
            );
            Ok(())
        }
        RunOutcome::Skipped => bail!("Job {kind} was skipped"),
    }
}
