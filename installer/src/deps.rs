//! The Dep step: protoc, auxiliary Go tools and the module manifest.
//!
//! The three jobs are independent and run as one fail-together batch on the
//! [`ProvisioningCoordinator`]. The protoc version gate is checked first so a
//! known-bad configuration never starts concurrent work.

use camino::{Utf8Path, Utf8PathBuf};
use gostrap::{DepConfig, GostrapConfig};
use log::{debug, info};

use crate::artefact::acquire::ArtifactAcquirer;
use crate::artefact::extraction::ArchiveKind;
use crate::artefact::spec::{ProbeSpec, ToolSpec};
use crate::coordinator::{BatchReport, JobOutcome, ProvisioningCoordinator, ProvisioningJob};
use crate::environment::{
    EnvLayer, EnvironmentComposer, ExecutionEnvironment, ModuleMode, TransientFlags,
};
use crate::error::Result;
use crate::exec::{CommandExecutor, Invocation, subprocess_error};
use crate::graph::DependencySet;
use crate::layout::PreparedLayout;
use crate::platform::PROTOC_NAMING;
use crate::toolchain::ToolchainReady;

/// Release archive location for protoc.
pub const PROTOC_URL_TEMPLATE: &str = "https://github.com/google/protobuf/releases/download/v{version}/protoc-{version}-{os}-{arch}.zip";

/// Repository the versioned swag generator is cloned from.
pub const SWAG_REPOSITORY: &str = "https://github.com/swaggo/swag.git";

/// Import path of the swag command.
pub const SWAG_COMMAND: &str = "github.com/swaggo/swag/cmd/swag";

/// Job names, as they appear in aggregate failures.
pub const PROTOC_JOB: &str = "protoc";
/// See [`PROTOC_JOB`].
pub const TOOLS_JOB: &str = "go-tools";
/// See [`PROTOC_JOB`].
pub const MANIFEST_JOB: &str = "module-manifest";

/// `go mod init` exit code meaning `go.mod` already exists.
const MANIFEST_EXISTS_EXIT: i32 = 1;

/// The protoc executable inside the workspace.
#[must_use]
pub fn protoc_binary(layout: &PreparedLayout) -> Utf8PathBuf {
    layout.proto().join("bin").join("protoc")
}

/// Acquisition description of protoc.
#[must_use]
pub fn protoc_spec(layout: &PreparedLayout, dep: &DepConfig, base: &ExecutionEnvironment) -> ToolSpec {
    ToolSpec {
        name: PROTOC_JOB.to_owned(),
        version: dep.proto_version.clone(),
        min_version: dep.min_proto_version.clone(),
        url_template: PROTOC_URL_TEMPLATE.to_owned(),
        naming: PROTOC_NAMING,
        probe: Some(ProbeSpec {
            binary: protoc_binary(layout),
            args: vec!["--version".to_owned()],
            expected: format!("libprotoc {}", dep.proto_version),
            env: base.clone(),
        }),
        destination: layout.proto(),
        archive: ArchiveKind::Zip,
        replaces: None,
        sha256: dep.proto_sha256.clone(),
    }
}

/// Everything the Dep jobs share. Borrowed, so jobs on scoped threads can
/// read it concurrently.
#[derive(Clone, Copy)]
pub struct DependencyContext<'a> {
    /// Proof the workspace directories exist.
    pub layout: &'a PreparedLayout,
    /// Proof the Go toolchain is available.
    pub toolchain: &'a ToolchainReady,
    /// Project configuration.
    pub config: &'a GostrapConfig,
    /// Module path passed to `go mod init`.
    pub module_path: &'a str,
    /// Modules fetched into the manifest.
    pub dependencies: &'a DependencySet,
    /// Inherited process environment.
    pub base_env: &'a ExecutionEnvironment,
    /// Subprocess runner.
    pub executor: &'a dyn CommandExecutor,
    /// Tool downloader.
    pub acquirer: &'a ArtifactAcquirer<'a>,
}

impl DependencyContext<'_> {
    fn environment(&self, step: &EnvLayer, mode: ModuleMode) -> Result<ExecutionEnvironment> {
        let toolchain = self.toolchain.layer(self.base_env)?;
        Ok(EnvironmentComposer::compose_with(
            self.base_env,
            &toolchain,
            step,
            TransientFlags::module_mode(mode),
        ))
    }

    fn go(&self, env: &ExecutionEnvironment) -> Invocation {
        Invocation::new(self.toolchain.go_binary().as_str()).env(env.clone())
    }
}

/// Gate protoc, then run the Dep jobs concurrently.
///
/// # Errors
///
/// Returns the protoc gate's error without starting any job, or
/// [`crate::error::ProvisionError::Aggregate`] when one or more jobs fail.
pub fn resolve_dependencies(ctx: &DependencyContext<'_>) -> Result<BatchReport> {
    let spec = protoc_spec(ctx.layout, &ctx.config.dep, ctx.base_env);
    spec.gate()?;

    ProvisioningCoordinator.run_all(vec![
        ProvisioningJob::new(PROTOC_JOB, move || acquire_protoc(ctx, &spec)),
        ProvisioningJob::new(TOOLS_JOB, move || install_tools(ctx)),
        ProvisioningJob::new(MANIFEST_JOB, move || write_manifest(ctx)),
    ])
}

fn acquire_protoc(ctx: &DependencyContext<'_>, spec: &ToolSpec) -> Result<JobOutcome> {
    let acquired = ctx.acquirer.acquire(spec)?;
    if acquired.from_cache {
        return Ok(JobOutcome::AlreadySatisfied {
            detail: format!("protoc {} found in {}", spec.version, acquired.destination),
        });
    }
    Ok(JobOutcome::Completed)
}

/// `go get -u` the auxiliary tools in GOPATH mode, then install the pinned
/// swag release from a versioned checkout.
fn install_tools(ctx: &DependencyContext<'_>) -> Result<JobOutcome> {
    let env = ctx.environment(&EnvLayer::new(), ModuleMode::Off)?;
    let tools = &ctx.config.dep.tools;

    if tools.is_empty() {
        debug!("no auxiliary go tools configured");
    } else {
        info!("installing go tools: {}", tools.join(", "));
        let get = ctx.go(&env).args(["get", "-u"]).args(tools.iter().cloned());
        ctx.executor.run_checked(&get)?;
    }

    let swaggo_dir = swaggo_checkout_dir(ctx.toolchain.gopath());
    std::fs::create_dir_all(&swaggo_dir)?;
    let tag = format!("v{}", ctx.config.dep.swaggo_version);
    info!("installing swag {tag}");

    // An existing checkout makes the clone fail; the go commands below work
    // from whatever is there.
    let clone = Invocation::new(env.resolve_program("git"))
        .args(["clone", "-b", tag.as_str(), SWAG_REPOSITORY])
        .env(env.clone())
        .current_dir(swaggo_dir.clone())
        .ignore_exit_value();
    ctx.executor.run_checked(&clone)?;

    for action in [["get", "-d"].as_slice(), ["install"].as_slice()] {
        let invocation = ctx
            .go(&env)
            .args(action.iter().copied())
            .arg(SWAG_COMMAND)
            .current_dir(swaggo_dir.clone());
        ctx.executor.run_checked(&invocation)?;
    }
    Ok(JobOutcome::Completed)
}

fn swaggo_checkout_dir(gopath: &Utf8Path) -> Utf8PathBuf {
    gopath.join("src").join("github.com").join("swaggo")
}

/// `go mod init`, then fetch the dependency set in module mode.
fn write_manifest(ctx: &DependencyContext<'_>) -> Result<JobOutcome> {
    let project_dir = ctx.layout.project_dir();
    let plain = ctx.environment(&EnvLayer::new(), ModuleMode::On)?;

    let init = ctx
        .go(&plain)
        .args(["mod", "init", ctx.module_path])
        .current_dir(project_dir.to_owned())
        .ignore_exit_value();
    let output = ctx.executor.run_checked(&init)?;
    let existed = match output.status.code() {
        Some(0) => {
            info!("created go.mod for {}", ctx.module_path);
            false
        }
        Some(MANIFEST_EXISTS_EXIT) => {
            debug!("go.mod already exists in {project_dir}");
            true
        }
        _ => return Err(subprocess_error(&init, &output)),
    };

    if ctx.dependencies.is_empty() {
        return Ok(if existed {
            JobOutcome::AlreadySatisfied {
                detail: "go.mod exists and no dependencies are declared".to_owned(),
            }
        } else {
            JobOutcome::Completed
        });
    }

    let options = ctx.config.step_options(gostrap::BuildStep::Dep);
    let env = ctx.environment(&EnvLayer::from(options.extra_env), ModuleMode::On)?;
    info!("fetching {} module(s)", ctx.dependencies.len());
    let fetch = ctx
        .go(&env)
        .args(["get", "-d"])
        .args(options.extra_args.iter().cloned())
        .args(ctx.dependencies.iter())
        .current_dir(project_dir.to_owned());
    ctx.executor.run_checked(&fetch)?;
    Ok(JobOutcome::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artefact::extraction::DefaultExtractor;
    use crate::error::ProvisionError;
    use crate::layout::WorkspaceLayout;
    use crate::platform::HostFacts;
    use crate::test_utils::{
        ExpectedCall, StubDownloader, StubExecutor, failure_output, sandbox_toolchain,
        success_output,
    };
    use std::io::Write;
    use tempfile::TempDir;

    struct Project {
        _dir: TempDir,
        prepared: PreparedLayout,
        toolchain: ToolchainReady,
        config: GostrapConfig,
    }

    fn project(tools: &[&str]) -> Project {
        let dir = tempfile::tempdir().expect("temp dir");
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).expect("utf-8 path");
        let prepared = WorkspaceLayout::new(root, Utf8Path::new(".gostrap"))
            .prepare()
            .expect("prepare");
        let toolchain = sandbox_toolchain(&prepared, "1.11.4");
        let mut config = GostrapConfig::default();
        config.dep.tools = tools.iter().map(|tool| (*tool).to_owned()).collect();
        Project {
            _dir: dir,
            prepared,
            toolchain,
            config,
        }
    }

    #[test]
    fn protoc_spec_carries_the_pinned_digest() {
        let mut project = project(&[]);
        project.config.dep.proto_sha256 = Some("ab".repeat(32));

        let spec = protoc_spec(
            &project.prepared,
            &project.config.dep,
            &ExecutionEnvironment::default(),
        );

        assert_eq!(spec.sha256, project.config.dep.proto_sha256);
    }

    fn protoc_zip() -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default().unix_permissions(0o755);
        writer.start_file("bin/protoc", options).expect("start");
        writer.write_all(b"#!/bin/sh\n").expect("write");
        writer.finish().expect("finish").into_inner()
    }

    fn tool_calls() -> Vec<ExpectedCall> {
        vec![
            ExpectedCall::new("go", &["get", "-u", "golang.org/x/lint/golint"], Ok(success_output())),
            ExpectedCall::new(
                "git",
                &["clone", "-b", "v1.3.2", SWAG_REPOSITORY],
                Ok(failure_output(128, "already exists")),
            ),
            ExpectedCall::new("go", &["get", "-d", SWAG_COMMAND], Ok(success_output())),
            ExpectedCall::new("go", &["install", SWAG_COMMAND], Ok(success_output())),
        ]
    }

    fn run(
        project: &Project,
        downloader: &StubDownloader,
        executor: &StubExecutor,
        dependencies: &DependencySet,
    ) -> Result<BatchReport> {
        let base = ExecutionEnvironment::default();
        let acquirer = ArtifactAcquirer::new(
            downloader,
            &DefaultExtractor,
            executor,
            HostFacts::new("linux", "x86_64"),
            project.prepared.cache(),
        );
        resolve_dependencies(&DependencyContext {
            layout: &project.prepared,
            toolchain: &project.toolchain,
            config: &project.config,
            module_path: "example.com/app",
            dependencies,
            base_env: &base,
            executor,
            acquirer: &acquirer,
        })
    }

    #[test]
    fn all_three_jobs_complete() {
        let project = project(&["golang.org/x/lint/golint"]);
        let downloader = StubDownloader::serving(protoc_zip());
        let mut calls = tool_calls();
        calls.push(ExpectedCall::new(
            "go",
            &["mod", "init", "example.com/app"],
            Ok(failure_output(1, "go.mod already exists")),
        ));
        calls.push(ExpectedCall::new("go", &["get", "-d", "a", "c"], Ok(success_output())));
        let executor = StubExecutor::unordered(calls);
        let deps = DependencySet::merge(&["a".to_owned()], &["c".to_owned()]);

        let report = run(&project, &downloader, &executor, &deps).expect("batch succeeds");

        assert_eq!(report.outcome(PROTOC_JOB), Some(&JobOutcome::Completed));
        assert_eq!(report.outcome(MANIFEST_JOB), Some(&JobOutcome::Completed));
        assert!(protoc_binary(&project.prepared).is_file());
        assert_eq!(
            downloader.urls(),
            vec![
                "https://github.com/google/protobuf/releases/download/v3.6.1/protoc-3.6.1-linux-x86_64.zip"
                    .to_owned()
            ]
        );
        executor.assert_finished();
    }

    #[test]
    fn module_mode_is_toggled_per_call() {
        let project = project(&["golang.org/x/lint/golint"]);
        let downloader = StubDownloader::serving(protoc_zip());
        let mut calls = tool_calls();
        calls.push(ExpectedCall::new(
            "go",
            &["mod", "init", "example.com/app"],
            Ok(success_output()),
        ));
        let executor = StubExecutor::unordered(calls);

        run(&project, &downloader, &executor, &DependencySet::default()).expect("batch");

        for invocation in executor.invocations() {
            let expected = if invocation.arguments().first().map(String::as_str) == Some("mod") {
                "on"
            } else {
                "off"
            };
            assert_eq!(
                invocation.environment().get("GO111MODULE"),
                Some(expected),
                "{}",
                invocation.command_line()
            );
        }
    }

    #[test]
    fn failures_are_reported_together() {
        let project = project(&["golang.org/x/lint/golint"]);
        let downloader = StubDownloader::failing_with(404);
        let mut calls = tool_calls();
        calls.push(ExpectedCall::new(
            "go",
            &["mod", "init", "example.com/app"],
            Ok(failure_output(2, "malformed module path")),
        ));
        let executor = StubExecutor::unordered(calls);

        let err = run(&project, &downloader, &executor, &DependencySet::default())
            .expect_err("two jobs fail");

        let ProvisionError::Aggregate { causes } = err else {
            panic!("expected aggregate error");
        };
        let jobs: Vec<_> = causes.iter().map(|failure| failure.job.as_str()).collect();
        assert_eq!(jobs, [PROTOC_JOB, MANIFEST_JOB]);
        // The tools job still ran to completion.
        executor.assert_finished();
    }

    #[test]
    fn protoc_gate_fails_before_any_job() {
        let mut project = project(&[]);
        project.config.dep.proto_version = "3.5".to_owned();
        let downloader = StubDownloader::serving(Vec::new());
        let executor = StubExecutor::unordered(Vec::new());

        let err = run(&project, &downloader, &executor, &DependencySet::default())
            .expect_err("gate fails");

        assert!(matches!(err, ProvisionError::VersionTooLow { .. }));
        assert!(executor.invocations().is_empty());
        assert_eq!(downloader.calls(), 0);
    }
}
