//! stub-bootstrap - Deployment Bootstrap for Delivered Archive Trees
//!
//! Unpacks a delivered stub archive into a root directory, then processes
//! every immediate subdirectory of that root in parallel: the reserved
//! payload archive is extracted in place, every other archive is loaded as a
//! container image.
//!
//! # Features
//!
//! - **Bounded Fan-Out**: At most `concurrency` subdirectories are processed
//!   at once; a cap of 1 is fully sequential.
//!
//! - **Failure Isolation**: A failing or panicking subdirectory never stops
//!   its siblings. Every subdirectory ends up in the final report exactly
//!   once.
//!
//! - **Complete Reporting**: All failures are collected and reported together
//!   after every task has joined, as text or JSON.
//!
//! - **Cancellation**: Ctrl+C or the run timeout stops admission and kills
//!   in-flight external commands.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Root Directory                            │
//! │                 stub.tar + one dir per service                   │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │
//!                               │ extract stub, read_dir
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Scheduler                                │
//! │            ┌──────────────────────────┐                         │
//! │            │  Semaphore (cap permits) │                         │
//! │            └────────────┬─────────────┘                         │
//! │                         │                                       │
//! │  ┌─────────┐  ┌─────────┐  ┌─────────┐         ┌─────────┐     │
//! │  │TaskUnit │  │TaskUnit │  │TaskUnit │  ...    │TaskUnit │     │
//! │  │ dir 1   │  │ dir 2   │  │ dir 3   │         │ dir N   │     │
//! │  └────┬────┘  └────┬────┘  └────┬────┘         └────┬────┘     │
//! │       │            │            │                    │          │
//! │       │     ArtifactRunner (tar -xvf / docker load)  │          │
//! │       │            │            │                    │          │
//! │       └────────────┼────────────┼────────────────────┘          │
//! │                    ▼            ▼                               │
//! │            ┌──────────────────────────┐                         │
//! │            │     ErrorAggregator      │                         │
//! │            │  - mutex-guarded list    │                         │
//! │            │  - finalized after join  │                         │
//! │            └──────────────────────────┘                         │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//!                    ┌──────────────────┐
//!                    │ AggregateReport  │
//!                    │ (stderr / JSON)  │
//!                    └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Bootstrap the current directory
//! stub-bootstrap
//!
//! # Eight subdirectories at a time, with a JSON report
//! stub-bootstrap /opt/delivery -j 8 --report report.json
//!
//! # Stub already extracted, skip backups
//! stub-bootstrap /opt/delivery --skip-stub --exclude '^backup'
//! ```

pub mod aggregate;
pub mod config;
pub mod error;
pub mod progress;
pub mod runner;
pub mod scheduler;
pub mod stub;
pub mod task;

pub use aggregate::{AggregateReport, ErrorAggregator, TaskFailure, TaskOutcome};
pub use config::{ArchiveRules, BootstrapConfig, CliArgs, FileAction};
pub use error::{BootstrapError, Result, TaskError};
pub use runner::{ArtifactRunner, CommandFailure, CommandResult, ShellRunner};
pub use scheduler::{BootstrapProgress, Scheduler, SchedulerStats};
pub use task::{TaskSummary, TaskUnit, WorkItem};
