//! Concurrency-safe collection of task outcomes
//!
//! Every task records exactly one [`TaskOutcome`]. Failures are appended in
//! arrival order under a mutex; the aggregator is consumed by
//! [`ErrorAggregator::finalize`], so the report can only be built once no
//! task holds a handle to it any more.

use crate::error::TaskError;
use crate::task::TaskSummary;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

/// Failure of one work item
#[derive(Debug)]
pub struct TaskFailure {
    /// Directory name of the work item
    pub dir_name: String,

    /// Directory path of the work item
    pub path: PathBuf,

    /// Underlying cause
    pub error: TaskError,
}

/// Outcome of one work item
#[derive(Debug)]
pub enum TaskOutcome {
    Succeeded {
        dir_name: String,
        summary: TaskSummary,
    },
    Failed(TaskFailure),
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Succeeded { .. })
    }

    pub fn dir_name(&self) -> &str {
        match self {
            TaskOutcome::Succeeded { dir_name, .. } => dir_name,
            TaskOutcome::Failed(f) => &f.dir_name,
        }
    }
}

#[derive(Debug, Default)]
struct Records {
    succeeded: usize,
    totals: TaskSummary,
    failures: Vec<TaskFailure>,
}

/// Collects outcomes from concurrently running tasks
#[derive(Debug, Default)]
pub struct ErrorAggregator {
    records: Mutex<Records>,
}

impl ErrorAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one task
    pub fn record(&self, outcome: TaskOutcome) {
        let mut records = self.records.lock();
        match outcome {
            TaskOutcome::Succeeded { summary, .. } => {
                records.succeeded += 1;
                records.totals.extracted += summary.extracted;
                records.totals.images_loaded += summary.images_loaded;
                records.totals.bytes += summary.bytes;
            }
            TaskOutcome::Failed(failure) => records.failures.push(failure),
        }
    }

    /// Number of failures recorded so far
    pub fn failure_count(&self) -> usize {
        self.records.lock().failures.len()
    }

    /// Seal the aggregator into the final report
    pub fn finalize(self) -> AggregateReport {
        let records = self.records.into_inner();
        AggregateReport {
            succeeded: records.succeeded,
            totals: records.totals,
            failures: records.failures,
        }
    }
}

/// Final outcome of a scheduler run
#[derive(Debug, Default)]
pub struct AggregateReport {
    /// Work items that succeeded
    pub succeeded: usize,

    /// Work done by the successful items
    pub totals: TaskSummary,

    /// Failures in arrival order
    pub failures: Vec<TaskFailure>,
}

impl AggregateReport {
    /// True when no work item failed
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Total number of work items reported
    pub fn total(&self) -> usize {
        self.succeeded + self.failures.len()
    }

    /// Names of the failing work items
    pub fn failed_names(&self) -> BTreeSet<&str> {
        self.failures.iter().map(|f| f.dir_name.as_str()).collect()
    }

    /// Machine-readable form of the report
    pub fn to_json(&self) -> serde_json::Value {
        #[derive(Serialize)]
        struct FailureJson<'a> {
            dir: &'a str,
            path: String,
            kind: &'static str,
            error: String,
        }

        let failures: Vec<_> = self
            .failures
            .iter()
            .map(|f| FailureJson {
                dir: &f.dir_name,
                path: f.path.display().to_string(),
                kind: f.error.kind(),
                error: f.error.to_string(),
            })
            .collect();

        serde_json::json!({
            "success": self.is_success(),
            "total": self.total(),
            "succeeded": self.succeeded,
            "failed": self.failures.len(),
            "extracted": self.totals.extracted,
            "images_loaded": self.totals.images_loaded,
            "bytes": self.totals.bytes,
            "failures": failures,
        })
    }
}

impl fmt::Display for AggregateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_success() {
            return write!(f, "all {} subdirectories processed successfully", self.succeeded);
        }
        write!(
            f,
            "{} of {} subdirectories failed:",
            self.failures.len(),
            self.total()
        )?;
        for failure in &self.failures {
            write!(f, "\n  - {}: {}", failure.dir_name, failure.error)?;
        }
        Ok(())
    }
}
