//! Error types for gostrap provisioning and step execution.
//!
//! Precondition failures (version gates, platform resolution) are raised
//! directly. Failures inside concurrently run provisioning jobs are collected
//! and surfaced together as [`ProvisionError::Aggregate`] once the whole batch
//! has finished.

use std::error::Error as StdError;
use std::time::Duration;

use gostrap::{BuildStep, ConfigError};
use thiserror::Error;

use crate::artefact::download::DownloadError;
use crate::artefact::extraction::ExtractionError;

/// Errors that can occur while provisioning tools or running build steps.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// A version string is not of the form `MAJOR.MINOR[.PATCH]`.
    #[error("invalid {kind} version \"{value}\": expected MAJOR.MINOR or MAJOR.MINOR.PATCH")]
    InvalidVersion {
        /// Tool the version belongs to.
        kind: String,
        /// The rejected version string.
        value: String,
    },

    /// The requested version is older than the supported minimum.
    #[error("{kind} version ({actual}) not supported; at least {minimum} is required")]
    VersionTooLow {
        /// Tool the version belongs to.
        kind: String,
        /// Normalised requested version.
        actual: String,
        /// Normalised minimum version.
        minimum: String,
    },

    /// The host operating system is not one of the supported families.
    #[error("unsupported platform {os}/{arch}")]
    UnsupportedPlatform {
        /// Host operating system.
        os: String,
        /// Host CPU architecture.
        arch: String,
    },

    /// Downloading a tool archive failed.
    #[error("failed to download {tool}")]
    Download {
        /// Logical tool name.
        tool: String,
        /// Underlying download failure.
        #[source]
        source: DownloadError,
    },

    /// Extracting a tool archive failed.
    #[error("failed to extract {tool}")]
    Extract {
        /// Logical tool name.
        tool: String,
        /// Underlying extraction failure.
        #[source]
        source: ExtractionError,
    },

    /// A downloaded archive does not match its declared digest.
    #[error("checksum mismatch for {tool}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Logical tool name.
        tool: String,
        /// Declared SHA-256 digest.
        expected: String,
        /// Digest of the downloaded file.
        actual: String,
    },

    /// A subprocess could not be started.
    #[error("failed to start {program}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A subprocess exited unsuccessfully.
    #[error("{program} exited with {}: {output}", describe_exit(.exit_code))]
    Subprocess {
        /// Program that failed.
        program: String,
        /// Exit code, or `None` when terminated by a signal.
        exit_code: Option<i32>,
        /// Captured output, trimmed.
        output: String,
    },

    /// A subprocess did not finish within its timeout and was killed.
    #[error("{program} timed out after {} seconds", .timeout.as_secs())]
    SubprocessTimeout {
        /// Program that timed out.
        program: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The step prerequisite table contains a cycle or unknown edge.
    #[error("invalid task graph: {reason}")]
    InvalidGraph {
        /// Description of the violation.
        reason: String,
    },

    /// A step ran before the state it depends on was produced.
    #[error("step {step} requires {requirement}, which has not been prepared")]
    StepNotReady {
        /// Step that could not run.
        step: BuildStep,
        /// The missing prerequisite state.
        requirement: &'static str,
    },

    /// The workspace directory does not lie below the project directory.
    #[error("refusing to delete {root}: the workspace must lie inside {project}")]
    UnsafeWorkspace {
        /// The configured workspace directory.
        root: String,
        /// The project directory.
        project: String,
    },

    /// A provisioning job panicked instead of returning an outcome.
    #[error("job {job} panicked: {message}")]
    JobPanicked {
        /// Job name.
        job: String,
        /// Panic payload rendered as text.
        message: String,
    },

    /// A build step failed.
    #[error("step {step} failed")]
    Step {
        /// The failing step.
        step: BuildStep,
        /// The step's error.
        #[source]
        source: Box<ProvisionError>,
    },

    /// One or more concurrently run jobs failed.
    #[error("{} provisioning job(s) failed: {}", .causes.len(), summarise(.causes))]
    Aggregate {
        /// Every failing job with its cause, in launch order.
        causes: Vec<JobFailure>,
    },

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Test stub received an unexpected or mismatched invocation.
    #[cfg(any(test, feature = "test-support"))]
    #[error("stub mismatch: {message}")]
    StubMismatch {
        /// Description of what was expected versus what was received.
        message: String,
    },
}

/// A failed job inside a provisioning batch.
#[derive(Debug)]
pub struct JobFailure {
    /// Job name.
    pub job: String,
    /// Cause reported by the job.
    pub error: ProvisionError,
}

/// Result type for gostrap installer operations.
pub type Result<T> = std::result::Result<T, ProvisionError>;

impl ProvisionError {
    /// Wrap `self` as the failure of `step`.
    #[must_use]
    pub fn in_step(self, step: BuildStep) -> Self {
        Self::Step {
            step,
            source: Box::new(self),
        }
    }
}

/// Render an error and its `source()` chain as `outer: inner: ...`.
///
/// # Examples
///
/// ```
/// use gostrap::BuildStep;
/// use gostrap_installer::error::{ProvisionError, render_chain};
///
/// let err = ProvisionError::InvalidGraph {
///     reason: "cycle".to_owned(),
/// }
/// .in_step(BuildStep::Env);
/// assert_eq!(render_chain(&err), "step env failed: invalid task graph: cycle");
/// ```
#[must_use]
pub fn render_chain(err: &(dyn StdError + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut current = err.source();
    while let Some(cause) = current {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        current = cause.source();
    }
    rendered
}

fn describe_exit(code: &Option<i32>) -> String {
    code.map_or_else(|| "a signal".to_owned(), |code| format!("exit code {code}"))
}

fn summarise(causes: &[JobFailure]) -> String {
    causes
        .iter()
        .map(|failure| format!("[{}] {}", failure.job, render_chain(&failure.error)))
        .collect::<Vec<_>>()
        .join("; ")
}
