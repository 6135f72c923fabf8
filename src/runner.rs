//! External collaborators: archive extraction and image loading
//!
//! The scheduler never spawns processes itself. It talks to an
//! [`ArtifactRunner`], which the binary backs with the real `tar` and
//! `docker` programs and tests back with a recording fake.

use crate::error::{BootstrapError, Result};
use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Failure of one external call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    /// Human-readable command, e.g. "docker load"
    pub command: String,

    /// Exit status or invocation error
    pub reason: String,

    /// Whatever the tool printed (stdout followed by stderr)
    pub output: String,
}

/// Combined output on success, diagnostics on failure
pub type CommandResult = std::result::Result<String, CommandFailure>;

/// Capability calls used by the bootstrap
#[async_trait]
pub trait ArtifactRunner: Send + Sync {
    /// Extract `archive` into `destination`
    async fn extract_archive(
        &self,
        archive: &Path,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> CommandResult;

    /// Register the image stored in `image` with the local image store
    async fn load_image(&self, image: &Path, cancel: &CancellationToken) -> CommandResult;
}

/// Runner backed by the `tar` and `docker` command-line tools
#[derive(Debug, Clone)]
pub struct ShellRunner {
    tar_cmd: String,
    docker_cmd: String,
}

impl ShellRunner {
    pub fn new(tar_cmd: impl Into<String>, docker_cmd: impl Into<String>) -> Self {
        Self {
            tar_cmd: tar_cmd.into(),
            docker_cmd: docker_cmd.into(),
        }
    }

    /// Run a command to completion, killing it if `cancel` fires first
    async fn run(&self, label: String, mut cmd: Command, cancel: &CancellationToken) -> CommandResult {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(command = %label, "Spawning external command");

        // Dropping the output future on cancel drops the child, which kills it
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(CommandFailure {
                    command: label,
                    reason: "cancelled".to_string(),
                    output: String::new(),
                });
            }
            res = cmd.output() => res,
        };

        let output = match output {
            Ok(o) => o,
            Err(e) => {
                return Err(CommandFailure {
                    command: label,
                    reason: format!("failed to start: {}", e),
                    output: String::new(),
                });
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            Ok(combined)
        } else {
            Err(CommandFailure {
                command: label,
                reason: output.status.to_string(),
                output: combined,
            })
        }
    }
}

#[async_trait]
impl ArtifactRunner for ShellRunner {
    async fn extract_archive(
        &self,
        archive: &Path,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> CommandResult {
        let mut cmd = Command::new(&self.tar_cmd);
        cmd.arg("-xvf").arg(archive).arg("-C").arg(destination);
        self.run(format!("{} -xvf", self.tar_cmd), cmd, cancel).await
    }

    async fn load_image(&self, image: &Path, cancel: &CancellationToken) -> CommandResult {
        let mut cmd = Command::new(&self.docker_cmd);
        cmd.arg("load").arg("-i").arg(image);
        self.run(format!("{} load", self.docker_cmd), cmd, cancel).await
    }
}

/// Locate a program the way a shell would: explicit paths as-is, bare names via PATH
pub fn find_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|p| is_executable(p))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file() || path.with_extension("exe").is_file()
}

/// Verify that every required program can be found
pub fn check_dependencies<I, S>(programs: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    for program in programs {
        let name = program.as_ref().to_string_lossy().into_owned();
        match find_program(&name) {
            Some(path) => debug!(command = %name, path = %path.display(), "Found dependency"),
            None => return Err(BootstrapError::MissingDependency { command: name }),
        }
    }
    Ok(())
}
