//! User-facing text for the CLI: dry-run plans and run summaries.

use std::fmt::Display;
use std::io::Write;

use camino::Utf8Path;

use crate::graph::{DependencySet, ExecutionPlan};
use crate::orchestrator::{RunSummary, StepStatus};

/// Write one line to `stderr`, ignoring write failures.
pub fn write_stderr_line(stderr: &mut dyn Write, message: impl Display) {
    if writeln!(stderr, "{message}").is_err() {
        // Best-effort output; nothing sensible to do on failure.
    }
}

/// What an invocation would do, shown by `--dry-run`.
///
/// # Example
///
/// ```
/// use camino::Utf8Path;
/// use gostrap::BuildStep;
/// use gostrap_installer::graph::{DependencySet, TaskGraph};
/// use gostrap_installer::output::DryRunInfo;
///
/// let plan = TaskGraph::new()?.plan(BuildStep::Test);
/// let dependencies = DependencySet::merge(&["a".to_owned()], &["c".to_owned()]);
/// let info = DryRunInfo {
///     project_dir: Utf8Path::new("/src/app"),
///     workspace_dir: Utf8Path::new("/src/app/.gostrap"),
///     module_path: "app",
///     go_version: "1.11.4",
///     use_sandbox: true,
///     plan: &plan,
///     dependencies: &dependencies,
/// };
///
/// let text = info.display_text();
/// assert!(text.contains("Dry run"));
/// assert!(text.contains("env -> dep -> grpc -> test"));
/// # Ok::<(), gostrap_installer::error::ProvisionError>(())
/// ```
#[derive(Debug)]
pub struct DryRunInfo<'a> {
    /// The project being built.
    pub project_dir: &'a Utf8Path,
    /// The private workspace directory.
    pub workspace_dir: &'a Utf8Path,
    /// Module path for `go mod init`.
    pub module_path: &'a str,
    /// Required Go version.
    pub go_version: &'a str,
    /// Whether the vendored toolchain is forced.
    pub use_sandbox: bool,
    /// Steps that would run.
    pub plan: &'a ExecutionPlan,
    /// Modules the Dep step would fetch.
    pub dependencies: &'a DependencySet,
}

impl DryRunInfo<'_> {
    /// Format the dry-run information for display.
    #[must_use]
    pub fn display_text(&self) -> String {
        let toolchain = if self.use_sandbox { "vendored" } else { "system, if it matches" };
        let mut lines = vec![
            "Dry run - no files will be modified".to_owned(),
            String::new(),
            format!("Project directory: {}", self.project_dir),
            format!("Workspace directory: {}", self.workspace_dir),
            format!("Module path: {}", self.module_path),
            format!("Go {} ({toolchain})", self.go_version),
            format!(
                "Steps: {}",
                self.plan
                    .iter()
                    .map(|step| step.name())
                    .collect::<Vec<_>>()
                    .join(" -> ")
            ),
            String::new(),
        ];

        if self.dependencies.is_empty() {
            lines.push("Dependencies: none".to_owned());
        } else {
            lines.push("Dependencies:".to_owned());
            lines.extend(self.dependencies.iter().map(|module| format!("  - {module}")));
        }
        lines.join("\n")
    }
}

/// One line per executed step.
#[must_use]
pub fn summary_text(summary: &RunSummary) -> String {
    summary
        .statuses
        .iter()
        .map(|(step, status)| match status {
            StepStatus::Ran => format!("{step}: done"),
            StepStatus::Skipped { reason } => format!("{step}: skipped ({reason})"),
        })
        .collect::<Vec<_>>()
        .join("\n")
}
