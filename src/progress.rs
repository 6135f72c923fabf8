//! Progress reporting for a bootstrap run
//!
//! Provides a live spinner fed from the scheduler counters and the
//! header/summary printed around the run.

use crate::aggregate::AggregateReport;
use crate::scheduler::BootstrapProgress;
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

/// Progress reporter that displays scheduler status
#[derive(Clone)]
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        if let Ok(spinner) = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
        {
            bar.set_style(spinner.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
        }

        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Update the progress display
    pub fn update(&self, progress: &BootstrapProgress, concurrency: usize) {
        let msg = format!(
            "Dirs: {}/{} | Failed: {} | Images: {} | Payloads: {} | Size: {} | Active: {}/{}",
            format_number(progress.finished()),
            format_number(progress.discovered),
            format_number(progress.failed),
            format_number(progress.images_loaded),
            format_number(progress.extracted),
            format_size(progress.bytes, BINARY),
            progress.in_flight,
            concurrency,
        );

        self.bar.set_message(msg);
    }

    /// Set a status message
    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    /// Finish and clear the progress display
    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a number with thousands separators
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| chunk.iter().rev().map(|&b| b as char).collect::<String>())
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Print a summary of the run
pub fn print_summary(report: &AggregateReport, duration: Duration, report_path: Option<&Path>) {
    let duration_secs = duration.as_secs_f64();
    let title = if report.is_success() {
        style("Bootstrap Complete").green().bold()
    } else {
        style("Bootstrap Finished With Failures").red().bold()
    };

    println!();
    println!("{}", title);
    println!("{}", style("─".repeat(50)).dim());
    println!(
        "  {} {}",
        style("Subdirectories:").bold(),
        format_number(report.total() as u64)
    );
    println!(
        "  {} {}",
        style("Succeeded:").bold(),
        format_number(report.succeeded as u64)
    );
    if !report.is_success() {
        println!(
            "  {} {}",
            style("Failed:").yellow().bold(),
            format_number(report.failures.len() as u64)
        );
    }
    println!(
        "  {} {}",
        style("Images Loaded:").bold(),
        format_number(report.totals.images_loaded)
    );
    println!(
        "  {} {}",
        style("Payloads:").bold(),
        format_number(report.totals.extracted)
    );
    println!(
        "  {} {}",
        style("Archive Size:").bold(),
        format_size(report.totals.bytes, BINARY)
    );
    println!("  {} {:.1}s", style("Duration:").bold(), duration_secs);
    if let Some(path) = report_path {
        println!("  {} {}", style("Report:").bold(), path.display());
    }
    println!();
}

/// Print a header at the start of the run
pub fn print_header(root: &Path, concurrency: usize, stub: Option<&Path>) {
    println!();
    println!(
        "{} {}",
        style("stub-bootstrap").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Root:").bold(), root.display());
    println!("  {} {}", style("Concurrency:").bold(), concurrency);
    match stub {
        Some(path) => println!("  {} {}", style("Stub:").bold(), path.display()),
        None => println!("  {} {}", style("Stub:").bold(), style("skipped").dim()),
    }
    println!();
}
