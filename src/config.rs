//! Configuration types for stub-bootstrap
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Runtime configuration with validation
//! - The archive filename rules shared by every task

use crate::error::ConfigError;
use clap::Parser;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Maximum reasonable concurrency cap
const MAX_CONCURRENCY: usize = 512;

/// Default concurrency cap
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default archive suffix
pub const DEFAULT_SUFFIX: &str = ".tar";

/// Default reserved payload filename
pub const DEFAULT_PAYLOAD_NAME: &str = "files.tar";

/// Default delivered archive name
pub const DEFAULT_STUB_NAME: &str = "stub.tar";

/// Default whole-run timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Unpack a delivered stub archive and load its images and payloads
#[derive(Parser, Debug, Clone)]
#[command(
    name = "stub-bootstrap",
    version,
    about = "Unpack a delivered stub archive and load its images and payloads",
    long_about = "Extracts the delivered stub archive into the root directory, then processes \
                  every immediate subdirectory in parallel.\n\n\
                  Inside each subdirectory, the payload archive is extracted in place and every \
                  other archive is loaded as a container image.\n\n\
                  Failures in one subdirectory never stop the others; all failures are reported \
                  together at the end.",
    after_help = "EXAMPLES:\n    \
        stub-bootstrap\n    \
        stub-bootstrap /opt/delivery -j 8\n    \
        stub-bootstrap /opt/delivery --skip-stub --exclude '^backup'\n    \
        stub-bootstrap . --report bootstrap-report.json -q"
)]
pub struct CliArgs {
    /// Root directory whose subdirectories are processed
    #[arg(value_name = "ROOT", default_value = ".")]
    pub root: PathBuf,

    /// Delivered archive to extract first (relative to ROOT unless absolute)
    #[arg(long, default_value = DEFAULT_STUB_NAME, value_name = "FILE")]
    pub stub: PathBuf,

    /// Skip extraction of the delivered archive
    #[arg(long)]
    pub skip_stub: bool,

    /// Maximum number of subdirectories processed at once
    #[arg(
        short = 'j',
        long,
        default_value_t = DEFAULT_CONCURRENCY,
        value_name = "NUM"
    )]
    pub concurrency: usize,

    /// Archive suffix; files without it are ignored
    #[arg(long, default_value = DEFAULT_SUFFIX, value_name = "EXT")]
    pub suffix: String,

    /// Reserved payload filename, extracted in place instead of loaded
    #[arg(long, default_value = DEFAULT_PAYLOAD_NAME, value_name = "NAME")]
    pub payload: String,

    /// Program used to extract archives
    #[arg(long, env = "BOOTSTRAP_TAR_CMD", default_value = "tar", value_name = "PROG")]
    pub tar_cmd: String,

    /// Program used to load images
    #[arg(long, env = "BOOTSTRAP_DOCKER_CMD", default_value = "docker", value_name = "PROG")]
    pub docker_cmd: String,

    /// Whole-run timeout in seconds (0 disables it)
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS, value_name = "SECS")]
    pub timeout: u64,

    /// Skip subdirectories whose name matches pattern (can be repeated)
    #[arg(long = "exclude", value_name = "PATTERN", action = clap::ArgAction::Append)]
    pub exclude_patterns: Vec<String>,

    /// Write a JSON report of the run
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Do not check that the tar and docker programs exist
    #[arg(long)]
    pub skip_dependency_check: bool,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

/// What to do with one file inside a work item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    /// Extract in place (the reserved payload archive)
    Extract,
    /// Load as a container image
    LoadImage,
    /// Not an archive, ignore
    Skip,
}

/// Filename classification rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRules {
    /// Suffix that marks a file as an archive
    pub suffix: String,

    /// Exact name of the payload archive
    pub payload_name: String,
}

impl ArchiveRules {
    pub fn new(suffix: impl Into<String>, payload_name: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
            payload_name: payload_name.into(),
        }
    }

    /// Classify a file by its exact name
    pub fn classify(&self, file_name: &str) -> FileAction {
        if !file_name.ends_with(&self.suffix) {
            FileAction::Skip
        } else if file_name == self.payload_name {
            FileAction::Extract
        } else {
            FileAction::LoadImage
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.suffix.is_empty() {
            return Err(ConfigError::EmptySuffix);
        }
        if self.payload_name.contains('/') || self.payload_name.contains('\\') {
            return Err(ConfigError::InvalidPayloadName {
                name: self.payload_name.clone(),
                reason: "must be a bare file name".to_string(),
            });
        }
        if !self.payload_name.ends_with(&self.suffix) {
            return Err(ConfigError::InvalidPayloadName {
                name: self.payload_name.clone(),
                reason: format!("must end with the archive suffix '{}'", self.suffix),
            });
        }
        Ok(())
    }
}

impl Default for ArchiveRules {
    fn default() -> Self {
        Self::new(DEFAULT_SUFFIX, DEFAULT_PAYLOAD_NAME)
    }
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Directory whose subdirectories are processed
    pub root_dir: PathBuf,

    /// Delivered archive to extract first (None = skip)
    pub stub_archive: Option<PathBuf>,

    /// Concurrency cap
    pub concurrency: usize,

    /// Filename classification
    pub rules: ArchiveRules,

    /// Extraction program
    pub tar_cmd: String,

    /// Image loading program
    pub docker_cmd: String,

    /// Whole-run timeout
    pub timeout: Option<Duration>,

    /// Compiled exclude patterns
    pub exclude_patterns: Vec<Regex>,

    /// JSON report destination
    pub report_path: Option<PathBuf>,

    /// Probe PATH for the external programs before running
    pub check_dependencies: bool,

    /// Show progress indicator
    pub show_progress: bool,

    /// Verbose logging
    pub verbose: bool,
}

impl BootstrapConfig {
    /// Configuration with defaults for the given root, no stub and no display
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            stub_archive: None,
            concurrency: DEFAULT_CONCURRENCY,
            rules: ArchiveRules::default(),
            tar_cmd: "tar".to_string(),
            docker_cmd: "docker".to_string(),
            timeout: None,
            exclude_patterns: Vec::new(),
            report_path: None,
            check_dependencies: false,
            show_progress: false,
            verbose: false,
        }
    }

    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        let exclude_patterns = args
            .exclude_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| ConfigError::InvalidExcludePattern {
                    pattern: p.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        // Validate report path
        if let Some(ref report) = args.report {
            if let Some(parent) = report.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    return Err(ConfigError::InvalidReportPath {
                        path: report.clone(),
                        reason: format!("Parent directory '{}' does not exist", parent.display()),
                    });
                }
            }
        }

        let stub_archive = if args.skip_stub {
            None
        } else {
            Some(resolve_against(&args.root, &args.stub))
        };

        let config = Self {
            root_dir: args.root,
            stub_archive,
            concurrency: args.concurrency,
            rules: ArchiveRules::new(args.suffix, args.payload),
            tar_cmd: args.tar_cmd,
            docker_cmd: args.docker_cmd,
            timeout: (args.timeout > 0).then(|| Duration::from_secs(args.timeout)),
            exclude_patterns,
            report_path: args.report,
            check_dependencies: !args.skip_dependency_check,
            show_progress: !args.quiet,
            verbose: args.verbose,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the scheduler relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 || self.concurrency > MAX_CONCURRENCY {
            return Err(ConfigError::InvalidConcurrency {
                count: self.concurrency,
                max: MAX_CONCURRENCY,
            });
        }
        if self.tar_cmd.trim().is_empty() {
            return Err(ConfigError::EmptyCommand { role: "archive extraction" });
        }
        if self.docker_cmd.trim().is_empty() {
            return Err(ConfigError::EmptyCommand { role: "image loading" });
        }
        self.rules.validate()
    }

    /// Check if a subdirectory name should be excluded
    pub fn is_excluded(&self, dir_name: &str) -> bool {
        self.exclude_patterns.iter().any(|re| re.is_match(dir_name))
    }
}

fn resolve_against(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
