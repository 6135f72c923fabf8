//! Per-subdirectory task
//!
//! A [`TaskUnit`] looks at the immediate files of one work item directory and
//! hands each archive to the runner: the payload archive is extracted in
//! place, every other archive is loaded as an image. The first failing call
//! stops the task; the remaining files of that directory are not attempted.

use crate::config::{ArchiveRules, FileAction};
use crate::error::{TaskError, TaskResult};
use crate::runner::{ArtifactRunner, CommandFailure};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// One subdirectory of the processing root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Absolute path of the directory
    pub path: PathBuf,

    /// Directory name, used to label results
    pub name: String,
}

impl WorkItem {
    pub fn new(path: PathBuf, name: impl Into<String>) -> Self {
        Self {
            path,
            name: name.into(),
        }
    }
}

/// One entry inside a work item directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Display name, used for classification and logging
    pub name: String,

    /// Path as read from the directory, byte-exact
    pub path: PathBuf,

    pub is_file: bool,
}

/// What a successful task did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskSummary {
    /// Payload archives extracted
    pub extracted: u64,

    /// Images loaded
    pub images_loaded: u64,

    /// Bytes of archive input handed to the tools
    pub bytes: u64,
}

/// Processes work items against a runner
#[derive(Clone)]
pub struct TaskUnit {
    rules: ArchiveRules,
    runner: Arc<dyn ArtifactRunner>,
}

impl TaskUnit {
    pub fn new(rules: ArchiveRules, runner: Arc<dyn ArtifactRunner>) -> Self {
        Self { rules, runner }
    }

    /// Process every archive in the work item directory
    pub async fn process(
        &self,
        item: &WorkItem,
        cancel: &CancellationToken,
    ) -> TaskResult<TaskSummary> {
        let entries = list_entries(&item.path).await?;
        let mut summary = TaskSummary::default();

        for entry in entries {
            if !entry.is_file {
                continue;
            }

            let file_path = entry.path;
            match self.rules.classify(&entry.name) {
                FileAction::Skip => continue,
                FileAction::Extract => {
                    let target_dir = file_path.parent().unwrap_or(&item.path).to_path_buf();
                    info!(
                        file = %file_path.display(),
                        target_dir = %target_dir.display(),
                        "Extracting payload archive"
                    );
                    let output = self
                        .runner
                        .extract_archive(&file_path, &target_dir, cancel)
                        .await
                        .map_err(|f| command_error(f, &file_path))?;
                    debug!(file = %file_path.display(), lines = output.lines().count(), "Extracted");
                    summary.extracted += 1;
                }
                FileAction::LoadImage => {
                    info!(file = %file_path.display(), "Loading image");
                    let output = self
                        .runner
                        .load_image(&file_path, cancel)
                        .await
                        .map_err(|f| command_error(f, &file_path))?;
                    debug!(file = %file_path.display(), output = %output.trim(), "Loaded");
                    summary.images_loaded += 1;
                }
            }
            summary.bytes += file_size(&file_path).await;
        }

        Ok(summary)
    }
}

async fn file_size(path: &Path) -> u64 {
    tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}

fn command_error(failure: CommandFailure, path: &Path) -> TaskError {
    TaskError::ExternalCommand {
        command: failure.command,
        path: path.to_path_buf(),
        reason: failure.reason,
        output: failure.output,
    }
}

/// List the immediate entries of a directory, sorted by name
pub async fn list_entries(dir: &Path) -> TaskResult<Vec<FileEntry>> {
    let read_err = |source| TaskError::DirectoryRead {
        path: dir.to_path_buf(),
        source,
    };

    let mut reader = tokio::fs::read_dir(dir).await.map_err(read_err)?;
    let mut entries = Vec::new();

    while let Some(entry) = reader.next_entry().await.map_err(read_err)? {
        let file_type = entry.file_type().await.map_err(read_err)?;
        let is_file = if file_type.is_symlink() {
            // follow links to files; dangling links are not files
            tokio::fs::metadata(entry.path())
                .await
                .map(|m| m.is_file())
                .unwrap_or(false)
        } else {
            file_type.is_file()
        };

        entries.push(FileEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            path: entry.path(),
            is_file,
        });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}
