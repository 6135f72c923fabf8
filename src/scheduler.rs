//! Bounded fan-out over the subdirectories of a root
//!
//! The scheduler enumerates the immediate subdirectories of the root and runs
//! one [`TaskUnit`] per subdirectory, at most `concurrency` at a time.
//!
//! ```text
//!            ┌──────────────────────────┐
//!            │   read_dir(root)         │  Enumeration error = fatal
//!            └────────────┬─────────────┘
//!                         │ WorkItem per directory
//!                         ▼
//!            ┌──────────────────────────┐
//!            │  Semaphore (cap permits) │◄── cancel: stop admitting
//!            └────────────┬─────────────┘
//!       ┌─────────────────┼─────────────────┐
//! ┌─────▼─────┐     ┌─────▼─────┐     ┌─────▼─────┐
//! │  Task 1   │     │  Task 2   │ ... │  Task N   │  (JoinSet)
//! │ TaskUnit  │     │ TaskUnit  │     │ TaskUnit  │
//! └─────┬─────┘     └─────┬─────┘     └─────┬─────┘
//!       └─────────────────┼─────────────────┘
//!                         ▼
//!            ┌──────────────────────────┐
//!            │     ErrorAggregator      │  finalized after join
//!            └──────────────────────────┘
//! ```
//!
//! A failing subdirectory never cancels its siblings. Every work item
//! produces exactly one outcome: items that are never admitted because the
//! run was cancelled are reported as cancelled.

use crate::aggregate::{AggregateReport, ErrorAggregator, TaskFailure, TaskOutcome};
use crate::config::BootstrapConfig;
use crate::error::{BootstrapError, Result, TaskError, WorkerError};
use crate::runner::ArtifactRunner;
use crate::task::{TaskUnit, WorkItem};
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Live counters, shared with the progress display
#[derive(Debug, Default)]
pub struct SchedulerStats {
    pub discovered: AtomicU64,
    pub in_flight: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub extracted: AtomicU64,
    pub images_loaded: AtomicU64,
    pub bytes: AtomicU64,
}

impl SchedulerStats {
    fn record_admitted(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    fn record_finished(&self, outcome: &TaskOutcome) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        self.record_outcome(outcome);
    }

    fn record_outcome(&self, outcome: &TaskOutcome) {
        match outcome {
            TaskOutcome::Succeeded { summary, .. } => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                self.extracted.fetch_add(summary.extracted, Ordering::Relaxed);
                self.images_loaded
                    .fetch_add(summary.images_loaded, Ordering::Relaxed);
                self.bytes.fetch_add(summary.bytes, Ordering::Relaxed);
            }
            TaskOutcome::Failed(_) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> BootstrapProgress {
        BootstrapProgress {
            discovered: self.discovered.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            extracted: self.extracted.load(Ordering::Relaxed),
            images_loaded: self.images_loaded.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }
}

/// Progress snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootstrapProgress {
    pub discovered: u64,
    pub in_flight: u64,
    pub completed: u64,
    pub failed: u64,
    pub extracted: u64,
    pub images_loaded: u64,
    pub bytes: u64,
}

impl BootstrapProgress {
    /// Work items with an outcome
    pub fn finished(&self) -> u64 {
        self.completed + self.failed
    }
}

/// Bounded-concurrency fan-out/join controller
pub struct Scheduler {
    config: Arc<BootstrapConfig>,
    unit: TaskUnit,
    stats: Arc<SchedulerStats>,
}

impl Scheduler {
    /// Create a scheduler; the configuration is validated first
    pub fn new(config: BootstrapConfig, runner: Arc<dyn ArtifactRunner>) -> Result<Self> {
        config.validate()?;
        let unit = TaskUnit::new(config.rules.clone(), runner);
        Ok(Self {
            config: Arc::new(config),
            unit,
            stats: Arc::new(SchedulerStats::default()),
        })
    }

    /// Shared counters for progress reporting
    pub fn stats(&self) -> Arc<SchedulerStats> {
        Arc::clone(&self.stats)
    }

    /// Process every subdirectory of `root_dir` and report all failures
    pub async fn run(&self, root_dir: &Path, cancel: &CancellationToken) -> Result<AggregateReport> {
        let items = self.enumerate(root_dir).await?;
        let concurrency = self.config.concurrency;

        info!(
            root = %root_dir.display(),
            work_items = items.len(),
            concurrency = concurrency,
            "Processing subdirectories"
        );
        self.stats
            .discovered
            .store(items.len() as u64, Ordering::Relaxed);

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let aggregator = Arc::new(ErrorAggregator::new());
        let mut join_set = JoinSet::new();
        let mut launched = HashMap::new();
        let mut pending = items.into_iter();

        while let Some(item) = pending.next() {
            // Wait for a free slot unless the run is cancelled first
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
            };

            let Some(permit) = permit else {
                let remaining: Vec<WorkItem> = std::iter::once(item).chain(pending.by_ref()).collect();
                warn!(
                    not_admitted = remaining.len(),
                    failed_so_far = aggregator.failure_count(),
                    "Run cancelled, remaining subdirectories will not be processed"
                );
                for item in remaining {
                    let outcome = TaskOutcome::Failed(TaskFailure {
                        error: TaskError::Cancelled {
                            path: item.path.clone(),
                        },
                        dir_name: item.name,
                        path: item.path,
                    });
                    self.stats.record_outcome(&outcome);
                    aggregator.record(outcome);
                }
                break;
            };

            let unit = self.unit.clone();
            let aggregator = Arc::clone(&aggregator);
            let stats = Arc::clone(&self.stats);
            let cancel = cancel.clone();

            stats.record_admitted();
            debug!(dir = %item.name, "Admitted subdirectory");

            let task_item = item.clone();
            let handle = join_set.spawn(async move {
                // The permit is released when this future ends, whatever the outcome
                let _permit = permit;
                let outcome = run_guarded(&unit, task_item, &cancel).await;
                stats.record_finished(&outcome);
                debug!(
                    dir = outcome.dir_name(),
                    success = outcome.is_success(),
                    "Recorded outcome"
                );
                aggregator.record(outcome);
            });
            launched.insert(handle.id(), item);
        }

        // Join every launched task, regardless of failures
        while let Some(res) = join_set.join_next_with_id().await {
            match res {
                Ok((id, ())) => {
                    launched.remove(&id);
                }
                Err(e) => {
                    error!(error = %e, "Task failed to join");
                    match launched.remove(&e.id()) {
                        Some(item) => {
                            let outcome = join_failure(item, e);
                            self.stats.record_finished(&outcome);
                            aggregator.record(outcome);
                        }
                        None => error!("Join failure for an unknown task"),
                    }
                }
            }
        }

        let aggregator =
            Arc::try_unwrap(aggregator).map_err(|_| WorkerError::AggregatorInUse)?;
        let report = aggregator.finalize();

        info!(
            succeeded = report.succeeded,
            failed = report.failures.len(),
            "Subdirectory processing finished"
        );

        Ok(report)
    }

    /// List the directories directly under `root_dir`, sorted by name
    pub async fn enumerate(&self, root_dir: &Path) -> Result<Vec<WorkItem>> {
        let root = std::path::absolute(root_dir).unwrap_or_else(|_| root_dir.to_path_buf());
        let enum_err = |source| BootstrapError::Enumeration {
            path: root_dir.to_path_buf(),
            source,
        };

        let mut reader = tokio::fs::read_dir(&root).await.map_err(enum_err)?;
        let mut items = Vec::new();

        while let Some(entry) = reader.next_entry().await.map_err(enum_err)? {
            // Symlinks are not followed, only real directories count
            let file_type = entry.file_type().await.map_err(enum_err)?;
            if !file_type.is_dir() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            if self.config.is_excluded(&name) {
                debug!(dir = %name, "Excluded subdirectory");
                continue;
            }

            items.push(WorkItem::new(entry.path(), name));
        }

        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }
}

/// Run one task, turning a panic into a failure of that work item
async fn run_guarded(unit: &TaskUnit, item: WorkItem, cancel: &CancellationToken) -> TaskOutcome {
    let result = AssertUnwindSafe(unit.process(&item, cancel))
        .catch_unwind()
        .await;

    let error = match result {
        Ok(Ok(summary)) => {
            info!(
                dir = %item.name,
                extracted = summary.extracted,
                images = summary.images_loaded,
                "Subdirectory processed"
            );
            return TaskOutcome::Succeeded {
                dir_name: item.name,
                summary,
            };
        }
        Ok(Err(e)) => e,
        Err(panic) => TaskError::Panicked {
            message: panic_message(panic.as_ref()),
        },
    };

    error!(dir = %item.name, error = %error, "Subdirectory failed");
    TaskOutcome::Failed(TaskFailure {
        dir_name: item.name,
        path: item.path,
        error,
    })
}

/// Outcome for a task whose handle failed to join
fn join_failure(item: WorkItem, error: JoinError) -> TaskOutcome {
    let message = match error.try_into_panic() {
        Ok(panic) => panic_message(panic.as_ref()),
        Err(error) => error.to_string(),
    };
    TaskOutcome::Failed(TaskFailure {
        dir_name: item.name,
        path: item.path,
        error: TaskError::Panicked { message },
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
