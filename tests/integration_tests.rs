//! Integration tests for stub-bootstrap
//!
//! These tests drive the scheduler over real directory trees built with
//! tempfile, with a recording runner standing in for tar and docker.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stub_bootstrap::runner::{ArtifactRunner, CommandFailure, CommandResult};
use stub_bootstrap::stub::extract_main_stub;
use stub_bootstrap::{BootstrapConfig, BootstrapError, Scheduler, TaskError};
use tempfile::{tempdir, TempDir};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Call {
    Extract(PathBuf, PathBuf),
    Load(PathBuf),
}

/// Records every call; fails loads whose directory is in `failing_dirs`
#[derive(Default)]
struct RecordingRunner {
    calls: Mutex<Vec<Call>>,
    failing_dirs: BTreeSet<String>,
    cancel_on_load: Option<CancellationToken>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Duration,
}

impl RecordingRunner {
    fn failing(dirs: &BTreeSet<String>) -> Self {
        Self {
            failing_dirs: dirs.clone(),
            delay: Duration::from_millis(5),
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn dir_name_of(path: &Path) -> String {
    path.parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[async_trait]
impl ArtifactRunner for RecordingRunner {
    async fn extract_archive(
        &self,
        archive: &Path,
        destination: &Path,
        _cancel: &CancellationToken,
    ) -> CommandResult {
        self.calls
            .lock()
            .push(Call::Extract(archive.to_path_buf(), destination.to_path_buf()));
        self.enter().await;

        // Extracting a stub produces one service directory with an image
        if archive.file_name().is_some_and(|n| n == "stub.tar") {
            let svc = destination.join("from-stub");
            fs::create_dir_all(&svc).map_err(|e| CommandFailure {
                command: "tar -xvf".into(),
                reason: e.to_string(),
                output: String::new(),
            })?;
            fs::write(svc.join("app.tar"), "image").map_err(|e| CommandFailure {
                command: "tar -xvf".into(),
                reason: e.to_string(),
                output: String::new(),
            })?;
        }
        Ok(format!("x {}\n", archive.display()))
    }

    async fn load_image(&self, image: &Path, _cancel: &CancellationToken) -> CommandResult {
        self.calls.lock().push(Call::Load(image.to_path_buf()));
        self.enter().await;

        if let Some(token) = &self.cancel_on_load {
            token.cancel();
        }

        if self.failing_dirs.contains(&dir_name_of(image)) {
            return Err(CommandFailure {
                command: "docker load".into(),
                reason: "exit status: 1".into(),
                output: format!("Error processing tar file {}", image.display()),
            });
        }
        Ok("Loaded image: test:latest\n".into())
    }
}

/// Root with `n` subdirectories, each holding one image and a README
fn fixture(n: usize, failing: &[usize]) -> (TempDir, BTreeSet<String>) {
    let root = tempdir().unwrap();
    for i in 0..n {
        let dir = root.path().join(format!("svc-{i:02}"));
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("image.tar"), "image bytes").unwrap();
        fs::write(dir.join("README.md"), "docs").unwrap();
    }
    let failing = failing.iter().map(|i| format!("svc-{i:02}")).collect();
    (root, failing)
}

fn scheduler(root: &Path, concurrency: usize, runner: Arc<RecordingRunner>) -> Scheduler {
    let mut config = BootstrapConfig::new(root);
    config.concurrency = concurrency;
    Scheduler::new(config, runner).unwrap()
}

fn failed_names(report: &stub_bootstrap::AggregateReport) -> BTreeSet<String> {
    report.failed_names().into_iter().map(String::from).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_k_failures_reported_at_every_cap() {
    let n = 12;
    let (root, failing) = fixture(n, &[1, 4, 5, 11]);

    for cap in [1, 3, n] {
        let runner = Arc::new(RecordingRunner::failing(&failing));
        let report = scheduler(root.path(), cap, runner.clone())
            .run(root.path(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.total(), n, "cap {cap}");
        assert_eq!(report.succeeded, n - failing.len(), "cap {cap}");
        assert_eq!(report.failures.len(), failing.len(), "cap {cap}");
        assert_eq!(failed_names(&report), failing, "cap {cap}");
        assert!(report
            .failures
            .iter()
            .all(|f| matches!(f.error, TaskError::ExternalCommand { .. })));
        assert_eq!(runner.calls().len(), n, "cap {cap}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cap_is_respected() {
    let (root, failing) = fixture(10, &[]);

    for cap in [1, 2, 4] {
        let runner = Arc::new(RecordingRunner::failing(&failing));
        let report = scheduler(root.path(), cap, runner.clone())
            .run(root.path(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.is_success());
        assert!(runner.max_in_flight() <= cap, "cap {cap}");
        assert!(runner.max_in_flight() >= 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sequential_and_parallel_agree() {
    let n = 8;
    let (root, failing) = fixture(n, &[0, 3, 7]);

    let sequential = Arc::new(RecordingRunner::failing(&failing));
    let seq_report = scheduler(root.path(), 1, sequential.clone())
        .run(root.path(), &CancellationToken::new())
        .await
        .unwrap();

    let parallel = Arc::new(RecordingRunner::failing(&failing));
    let par_report = scheduler(root.path(), n, parallel.clone())
        .run(root.path(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(failed_names(&seq_report), failed_names(&par_report));
    assert_eq!(seq_report.succeeded, par_report.succeeded);
    assert_eq!(seq_report.totals, par_report.totals);

    let mut seq_calls = sequential.calls();
    let mut par_calls = parallel.calls();
    seq_calls.sort();
    par_calls.sort();
    assert_eq!(seq_calls, par_calls);
    assert_eq!(sequential.max_in_flight(), 1);
}

#[tokio::test]
async fn test_missing_root_is_fatal() {
    let tmp = tempdir().unwrap();
    let missing = tmp.path().join("does-not-exist");
    let runner = Arc::new(RecordingRunner::default());

    let err = scheduler(&missing, 4, runner.clone())
        .run(&missing, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, BootstrapError::Enumeration { .. }));
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_empty_root_succeeds() {
    let root = tempdir().unwrap();
    let runner = Arc::new(RecordingRunner::default());

    let report = scheduler(root.path(), 4, runner.clone())
        .run(root.path(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.total(), 0);
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_non_archives_only() {
    let root = tempdir().unwrap();
    let dir = root.path().join("docs");
    fs::create_dir(&dir).unwrap();
    fs::write(dir.join("README.md"), "docs").unwrap();
    fs::write(dir.join("image.tar.gz"), "not matched").unwrap();
    // Archives at the root itself are not work items
    fs::write(root.path().join("loose.tar"), "x").unwrap();

    let runner = Arc::new(RecordingRunner::default());
    let report = scheduler(root.path(), 2, runner.clone())
        .run(root.path(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.succeeded, 1);
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_payload_only() {
    let root = tempdir().unwrap();
    let dir = root.path().join("web");
    fs::create_dir(&dir).unwrap();
    fs::write(dir.join("files.tar"), "payload").unwrap();

    let runner = Arc::new(RecordingRunner::default());
    let report = scheduler(root.path(), 2, runner.clone())
        .run(root.path(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.totals.extracted, 1);
    assert_eq!(report.totals.images_loaded, 0);

    let calls = runner.calls();
    assert_eq!(calls.len(), 1);
    match &calls[0] {
        Call::Extract(archive, destination) => {
            assert_eq!(archive.file_name().unwrap(), "files.tar");
            assert_eq!(destination.file_name().unwrap(), "web");
            assert_eq!(archive.parent().unwrap(), destination.as_path());
        }
        other => panic!("unexpected call: {other:?}"),
    }
}

#[tokio::test]
async fn test_first_failure_stops_the_directory() {
    let root = tempdir().unwrap();
    let dir = root.path().join("db");
    fs::create_dir(&dir).unwrap();
    fs::write(dir.join("a.tar"), "a").unwrap();
    fs::write(dir.join("b.tar"), "b").unwrap();

    let failing: BTreeSet<String> = ["db".to_string()].into();
    let runner = Arc::new(RecordingRunner::failing(&failing));
    let report = scheduler(root.path(), 2, runner.clone())
        .run(root.path(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.failures.len(), 1);
    match &report.failures[0].error {
        TaskError::ExternalCommand { path, output, .. } => {
            assert_eq!(path.file_name().unwrap(), "a.tar");
            assert!(output.contains("Error processing tar file"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(runner.calls(), vec![Call::Load(report.failures[0].path.join("a.tar"))]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancellation_reports_unadmitted_items() {
    let (root, failing) = fixture(5, &[]);
    let cancel = CancellationToken::new();
    let runner = Arc::new(RecordingRunner {
        cancel_on_load: Some(cancel.clone()),
        ..RecordingRunner::failing(&failing)
    });

    let report = scheduler(root.path(), 1, runner.clone())
        .run(root.path(), &cancel)
        .await
        .unwrap();

    assert_eq!(report.total(), 5);
    assert_eq!(report.succeeded, 1);
    assert_eq!(runner.calls().len(), 1);

    let cancelled: BTreeSet<String> = report
        .failures
        .iter()
        .filter(|f| matches!(f.error, TaskError::Cancelled { .. }))
        .map(|f| f.dir_name.clone())
        .collect();
    let expected: BTreeSet<String> = (1..5).map(|i| format!("svc-{i:02}")).collect();
    assert_eq!(cancelled, expected);
}

#[tokio::test]
async fn test_excluded_directories_are_not_reported() {
    let (root, failing) = fixture(4, &[2]);
    let runner = Arc::new(RecordingRunner::failing(&failing));

    let mut config = BootstrapConfig::new(root.path());
    config.exclude_patterns = vec![regex::Regex::new("^svc-0[23]$").unwrap()];
    let report = Scheduler::new(config, runner.clone())
        .unwrap()
        .run(root.path(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.total(), 2);
    assert_eq!(runner.calls().len(), 2);
}

#[tokio::test]
async fn test_stub_then_schedule() {
    let root = tempdir().unwrap();
    let stub = root.path().join("stub.tar");
    fs::write(&stub, "stub").unwrap();

    let runner = Arc::new(RecordingRunner::default());
    let cancel = CancellationToken::new();

    extract_main_stub(runner.as_ref(), &stub, root.path(), &cancel)
        .await
        .unwrap();
    let report = scheduler(root.path(), 4, runner.clone())
        .run(root.path(), &cancel)
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.totals.images_loaded, 1);
    assert_eq!(
        runner.calls(),
        vec![
            Call::Extract(stub.clone(), root.path().to_path_buf()),
            Call::Load(root.path().join("from-stub").join("app.tar")),
        ]
    );
}

#[tokio::test]
async fn test_report_output() {
    let (root, failing) = fixture(3, &[2]);
    let runner = Arc::new(RecordingRunner::failing(&failing));
    let report = scheduler(root.path(), 3, runner)
        .run(root.path(), &CancellationToken::new())
        .await
        .unwrap();

    let text = report.to_string();
    assert!(text.starts_with("1 of 3 subdirectories failed:"));
    assert!(text.contains("svc-02"));

    let json = report.to_json();
    assert_eq!(json["success"], false);
    assert_eq!(json["succeeded"], 2);
    assert_eq!(json["images_loaded"], 2);
    assert_eq!(json["failures"][0]["dir"], "svc-02");
    assert_eq!(json["failures"][0]["kind"], "external_command");
}
