//! Error types for stub-bootstrap
//!
//! This module defines the error hierarchy for a bootstrap run:
//! - Fatal run errors (root enumeration, missing tools, delivered archive)
//! - Configuration and CLI errors
//! - Task-local errors, which only ever surface through the aggregate report
//!
//! Design philosophy:
//! - Use thiserror for structured error types in library code
//! - Keep task-local failures separate from errors that abort the whole run
//! - Preserve error chains for debugging

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for a bootstrap run
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// Root directory could not be listed; no task was launched
    #[error("Failed to enumerate '{path}': {source}")]
    Enumeration {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Required external program is not available
    #[error("Required command '{command}' not found in PATH")]
    MissingDependency { command: String },

    /// Delivered archive does not exist
    #[error("Stub archive not found: '{path}'")]
    StubMissing { path: PathBuf },

    /// Delivered archive could not be extracted
    #[error("Failed to extract stub archive '{path}': {reason}, output: {output}")]
    StubExtract {
        path: PathBuf,
        reason: String,
        output: String,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Worker/concurrency errors
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    /// I/O errors (report file, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Report serialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid concurrency cap
    #[error("Invalid concurrency {count}: must be between 1 and {max}")]
    InvalidConcurrency { count: usize, max: usize },

    /// Empty archive suffix
    #[error("Archive suffix must not be empty")]
    EmptySuffix,

    /// Payload name that could never be classified as a payload
    #[error("Invalid payload name '{name}': {reason}")]
    InvalidPayloadName { name: String, reason: String },

    /// Invalid exclude pattern
    #[error("Invalid exclude pattern '{pattern}': {reason}")]
    InvalidExcludePattern { pattern: String, reason: String },

    /// Report path error
    #[error("Invalid report path '{path}': {reason}")]
    InvalidReportPath { path: PathBuf, reason: String },

    /// Empty command name
    #[error("Command for {role} must not be empty")]
    EmptyCommand { role: &'static str },
}

/// Errors local to one subdirectory task
#[derive(Error, Debug)]
pub enum TaskError {
    /// Directory of the work item could not be listed
    #[error("Failed to read directory '{path}': {source}")]
    DirectoryRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Archive extraction or image load failed
    #[error("{command} failed for '{path}': {reason}, output: {output}")]
    ExternalCommand {
        command: String,
        path: PathBuf,
        reason: String,
        output: String,
    },

    /// Run was cancelled before the task was admitted
    #[error("Cancelled before '{path}' was processed")]
    Cancelled { path: PathBuf },

    /// Task panicked
    #[error("Task panicked: {message}")]
    Panicked { message: String },
}

impl TaskError {
    /// Short machine-readable kind, used in the JSON report
    pub fn kind(&self) -> &'static str {
        match self {
            TaskError::DirectoryRead { .. } => "directory_read",
            TaskError::ExternalCommand { .. } => "external_command",
            TaskError::Cancelled { .. } => "cancelled",
            TaskError::Panicked { .. } => "panicked",
        }
    }
}

/// Worker errors
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Aggregator still shared after every task joined
    #[error("Error aggregator still referenced after join")]
    AggregatorInUse,
}

/// Result type alias for BootstrapError
pub type Result<T> = std::result::Result<T, BootstrapError>;

/// Result type alias for TaskError
pub type TaskResult<T> = std::result::Result<T, TaskError>;
