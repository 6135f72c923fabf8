//! Extraction of the delivered stub archive
//!
//! The stub is unpacked into the root before any subdirectory is scheduled.
//! Unlike task failures, a stub failure aborts the run.

use crate::error::{BootstrapError, Result};
use crate::runner::ArtifactRunner;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Extract `stub_path` into `destination`
pub async fn extract_main_stub(
    runner: &dyn ArtifactRunner,
    stub_path: &Path,
    destination: &Path,
    cancel: &CancellationToken,
) -> Result<()> {
    let is_file = tokio::fs::metadata(stub_path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false);
    if !is_file {
        return Err(BootstrapError::StubMissing {
            path: stub_path.to_path_buf(),
        });
    }

    info!(
        stub = %stub_path.display(),
        destination = %destination.display(),
        "Extracting stub archive"
    );

    let output = runner
        .extract_archive(stub_path, destination, cancel)
        .await
        .map_err(|f| BootstrapError::StubExtract {
            path: stub_path.to_path_buf(),
            reason: f.reason,
            output: f.output,
        })?;

    debug!(entries = output.lines().count(), "Stub archive extracted");
    Ok(())
}
