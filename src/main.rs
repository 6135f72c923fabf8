//! stub-bootstrap - Deployment bootstrap for delivered archive trees
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::Parser;
use std::path::Path;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use stub_bootstrap::config::{BootstrapConfig, CliArgs};
use stub_bootstrap::progress::{print_header, print_summary, ProgressReporter};
use stub_bootstrap::runner::{check_dependencies, ArtifactRunner, ShellRunner};
use stub_bootstrap::stub::extract_main_stub;
use stub_bootstrap::{AggregateReport, Scheduler};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether every subdirectory succeeded
fn run() -> Result<bool> {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Setup logging
    setup_logging(args.verbose)?;

    // Validate and create config
    let config = BootstrapConfig::from_args(args).context("Invalid configuration")?;

    // Print header
    if config.show_progress {
        print_header(
            &config.root_dir,
            config.concurrency,
            config.stub_archive.as_deref(),
        );
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create async runtime")?;

    runtime.block_on(run_bootstrap(config))
}

async fn run_bootstrap(config: BootstrapConfig) -> Result<bool> {
    let started_at = Local::now();
    let start = Instant::now();
    info!(
        started_at = %started_at.format("%Y-%m-%d %H:%M:%S"),
        root = %config.root_dir.display(),
        "Bootstrap starting"
    );

    let cancel = CancellationToken::new();

    // First Ctrl+C cancels the run, the second one exits immediately
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            if interrupted.swap(true, Ordering::SeqCst) {
                eprintln!("\nForce shutdown!");
                std::process::exit(130);
            }
            eprintln!("\nInterrupt received, cancelling... (press Ctrl+C again to force)");
            cancel.cancel();
        })
        .context("Failed to set signal handler")?;
    }

    let timeout_task = config.timeout.map(|timeout| {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            warn!(timeout_secs = timeout.as_secs(), "Run timed out, cancelling");
            cancel.cancel();
        })
    });

    if config.check_dependencies {
        check_dependencies([&config.tar_cmd, &config.docker_cmd])
            .context("Dependency check failed")?;
    }

    let runner: Arc<dyn ArtifactRunner> = Arc::new(ShellRunner::new(
        config.tar_cmd.clone(),
        config.docker_cmd.clone(),
    ));

    let progress = config.show_progress.then(ProgressReporter::new);

    if let Some(stub) = &config.stub_archive {
        if let Some(ref p) = progress {
            p.set_status("Extracting stub archive...");
        }
        let extracted = extract_main_stub(runner.as_ref(), stub, &config.root_dir, &cancel).await;
        if let Err(e) = extracted {
            if let Some(ref p) = progress {
                p.finish_and_clear();
            }
            return Err(e).context("Stub extraction failed");
        }
    }

    let root_dir = config.root_dir.clone();
    let report_path = config.report_path.clone();
    let concurrency = config.concurrency;
    let scheduler = Scheduler::new(config, runner).context("Failed to initialize scheduler")?;

    let updater = progress.clone().map(|reporter| {
        let stats = scheduler.stats();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(200));
            loop {
                ticker.tick().await;
                reporter.update(&stats.snapshot(), concurrency);
            }
        })
    });

    let result = scheduler.run(&root_dir, &cancel).await;

    if let Some(handle) = updater {
        handle.abort();
    }
    if let Some(handle) = timeout_task {
        handle.abort();
    }
    if let Some(ref p) = progress {
        p.finish_and_clear();
    }

    let report = result.context("Bootstrap failed")?;
    let duration = start.elapsed();

    if let Some(ref path) = report_path {
        write_report(path, &report, &root_dir, started_at, duration)?;
        info!(path = %path.display(), "Report written");
    }

    if progress.is_some() {
        print_summary(&report, duration, report_path.as_deref());
    }

    if cancel.is_cancelled() {
        info!("Run was cancelled before completion");
    }

    if report.is_success() {
        info!(
            succeeded = report.succeeded,
            elapsed_secs = duration.as_secs_f64(),
            "Bootstrap completed"
        );
        Ok(true)
    } else {
        eprintln!("{}", report);
        Ok(false)
    }
}

fn write_report(
    path: &Path,
    report: &AggregateReport,
    root_dir: &Path,
    started_at: DateTime<Local>,
    duration: Duration,
) -> Result<()> {
    let mut json = report.to_json();
    json["root"] = root_dir.display().to_string().into();
    json["started_at"] = started_at.to_rfc3339().into();
    json["duration_secs"] = duration.as_secs_f64().into();

    let text = serde_json::to_string_pretty(&json).context("Failed to serialize report")?;
    std::fs::write(path, text)
        .with_context(|| format!("Failed to write report to {}", path.display()))?;
    Ok(())
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("stub_bootstrap=debug,warn")
    } else {
        EnvFilter::new("stub_bootstrap=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
