//! The action behind every [`BuildStep`].
//!
//! Env produces a [`PreparedLayout`] and a [`ToolchainReady`] token; every
//! later step requires them and fails with
//! [`ProvisionError::StepNotReady`] when run out of order. Each subprocess
//! gets a freshly composed environment.

use std::sync::OnceLock;

use camino::Utf8Path;
use gostrap::{BuildStep, GostrapConfig};
use log::{debug, info};

use crate::artefact::acquire::ArtifactAcquirer;
use crate::artefact::download::ArtefactDownloader;
use crate::artefact::extraction::ArchiveExtractor;
use crate::codegen::{GrpcGeneration, generate_swagger};
use crate::coordinator::JobOutcome;
use crate::deps::{DependencyContext, protoc_binary, resolve_dependencies};
use crate::environment::{EnvLayer, EnvironmentComposer, ExecutionEnvironment};
use crate::error::{ProvisionError, Result};
use crate::exec::{CommandExecutor, Invocation, subprocess_error};
use crate::graph::{ExecutionPlan, dependencies_for_plan};
use crate::layout::{PreparedLayout, WorkspaceLayout};
use crate::orchestrator::{StepRunner, StepStatus};
use crate::platform::HostFacts;
use crate::toolchain::{GoToolchain, ToolchainReady};

/// Marker `go list` prints when a pattern matches nothing.
const NO_PACKAGES: &str = "no package";

/// Runs gostrap's steps against a real project.
pub struct GoStepRunner<'a> {
    config: &'a GostrapConfig,
    layout: WorkspaceLayout,
    module_path: String,
    base_env: ExecutionEnvironment,
    host: HostFacts,
    executor: &'a dyn CommandExecutor,
    downloader: &'a dyn ArtefactDownloader,
    extractor: &'a dyn ArchiveExtractor,
    prepared: OnceLock<PreparedLayout>,
    toolchain: OnceLock<ToolchainReady>,
}

impl<'a> GoStepRunner<'a> {
    /// A runner for the project in `project_dir`.
    ///
    /// The module path defaults to the project directory's name, and the base
    /// environment to the current process environment.
    #[must_use]
    pub fn new(
        config: &'a GostrapConfig,
        project_dir: &Utf8Path,
        executor: &'a dyn CommandExecutor,
        downloader: &'a dyn ArtefactDownloader,
        extractor: &'a dyn ArchiveExtractor,
    ) -> Self {
        let module_path = config
            .module_path_or(project_dir.file_name().unwrap_or_default())
            .to_owned();
        Self {
            config,
            layout: WorkspaceLayout::new(project_dir, &config.workspace.dir),
            module_path,
            base_env: ExecutionEnvironment::from_process(),
            host: HostFacts::current(),
            executor,
            downloader,
            extractor,
            prepared: OnceLock::new(),
            toolchain: OnceLock::new(),
        }
    }

    /// Replace the inherited base environment.
    #[must_use]
    pub fn with_base_env(mut self, base_env: ExecutionEnvironment) -> Self {
        self.base_env = base_env;
        self
    }

    /// Replace the host facts used for platform resolution.
    #[must_use]
    pub fn with_host(mut self, host: HostFacts) -> Self {
        self.host = host;
        self
    }

    /// The module path handed to `go mod init`.
    #[must_use]
    pub fn module_path(&self) -> &str {
        &self.module_path
    }

    fn acquirer(&self, prepared: &PreparedLayout) -> ArtifactAcquirer<'a> {
        ArtifactAcquirer::new(
            self.downloader,
            self.extractor,
            self.executor,
            self.host.clone(),
            prepared.cache(),
        )
    }

    fn ready(&self, step: BuildStep) -> Result<(&PreparedLayout, &ToolchainReady)> {
        let prepared = self.prepared.get().ok_or(ProvisionError::StepNotReady {
            step,
            requirement: "a prepared workspace",
        })?;
        let toolchain = self.toolchain.get().ok_or(ProvisionError::StepNotReady {
            step,
            requirement: "a Go toolchain",
        })?;
        Ok((prepared, toolchain))
    }

    fn environment(&self, toolchain: &ToolchainReady, step: BuildStep) -> Result<ExecutionEnvironment> {
        let layer = toolchain.layer(&self.base_env)?;
        let overrides = EnvLayer::from(self.config.step_options(step).extra_env);
        Ok(EnvironmentComposer::compose(&self.base_env, &layer, &overrides))
    }

    fn go(&self, toolchain: &ToolchainReady, env: &ExecutionEnvironment) -> Invocation {
        Invocation::new(toolchain.go_binary().as_str())
            .env(env.clone())
            .current_dir(self.layout.project_dir().to_owned())
    }

    fn prepare_env(&self) -> Result<StepStatus> {
        let prepared = self.layout.prepare()?;
        let prepared = self.prepared.get_or_init(|| prepared);
        let ready = GoToolchain::new(prepared, &self.config.env).ensure(
            &self.acquirer(prepared),
            self.executor,
            &self.base_env,
        )?;
        let ready = self.toolchain.get_or_init(|| ready);
        if ready.installed() {
            Ok(StepStatus::Ran)
        } else {
            Ok(StepStatus::Skipped {
                reason: format!("Go {} already available in {}", ready.version(), ready.root()),
            })
        }
    }

    fn resolve_deps(&self, plan: &ExecutionPlan) -> Result<StepStatus> {
        let (prepared, toolchain) = self.ready(BuildStep::Dep)?;
        let dependencies = dependencies_for_plan(
            plan,
            &self.config.dependencies.build,
            &self.config.dependencies.test,
        );
        let acquirer = self.acquirer(prepared);
        let report = resolve_dependencies(&DependencyContext {
            layout: prepared,
            toolchain,
            config: self.config,
            module_path: &self.module_path,
            dependencies: &dependencies,
            base_env: &self.base_env,
            executor: self.executor,
            acquirer: &acquirer,
        })?;

        let satisfied = report
            .outcomes
            .iter()
            .all(|(_, outcome)| matches!(outcome, JobOutcome::AlreadySatisfied { .. }));
        if satisfied && !report.outcomes.is_empty() {
            return Ok(StepStatus::Skipped {
                reason: "all dependencies already present".to_owned(),
            });
        }
        Ok(StepStatus::Ran)
    }

    fn generate_grpc(&self) -> Result<StepStatus> {
        let (prepared, toolchain) = self.ready(BuildStep::Grpc)?;
        let env = self.environment(toolchain, BuildStep::Grpc)?;
        let protoc = protoc_binary(prepared);
        let proto_dir = self.layout.project_dir().join(&self.config.grpc.proto_dir);
        let generated = GrpcGeneration {
            protoc: &protoc,
            proto_dir: &proto_dir,
            gopath: toolchain.gopath(),
            project_dir: self.layout.project_dir(),
        }
        .run(self.executor, &env)?;
        if generated == 0 {
            return Ok(StepStatus::Skipped {
                reason: format!("no .proto files under {proto_dir}"),
            });
        }
        Ok(StepStatus::Ran)
    }

    fn generate_swag(&self) -> Result<StepStatus> {
        let (_, toolchain) = self.ready(BuildStep::Swag)?;
        let env = self.environment(toolchain, BuildStep::Swag)?;
        generate_swagger(self.executor, &env, self.layout.project_dir())?;
        Ok(StepStatus::Ran)
    }

    fn run_tests(&self) -> Result<StepStatus> {
        let (prepared, toolchain) = self.ready(BuildStep::Test)?;
        let env = self.environment(toolchain, BuildStep::Test)?;
        let test = &self.config.test;

        let Some(packages) = self.test_packages(toolchain, &env)? else {
            return Ok(StepStatus::Skipped {
                reason: "no packages to test".to_owned(),
            });
        };

        let reports = prepared.reports();
        let cover_out = reports.join("cover.out");
        let cover_json = reports.join("cover.json");
        let cover_xml = reports.join("cover.xml");

        info!("testing {} package(s)", packages.len());
        let go_test = self
            .go(toolchain, &env)
            .args(["test", "-coverprofile", cover_out.as_str()])
            .args(test.cmd_args.iter().cloned())
            .args(packages)
            .inherit_output();
        self.executor.run_checked(&go_test)?;

        let convert = Invocation::new(env.resolve_program("gocov"))
            .args(["convert", cover_out.as_str()])
            .env(env.clone())
            .current_dir(self.layout.project_dir().to_owned());
        write_stdout(self.executor, &convert, &cover_json)?;

        let to_xml = Invocation::new(env.resolve_program("gocov-xml"))
            .env(env.clone())
            .stdin_file(cover_json)
            .current_dir(self.layout.project_dir().to_owned());
        write_stdout(self.executor, &to_xml, &cover_xml)?;
        info!("coverage report written to {cover_xml}");
        Ok(StepStatus::Ran)
    }

    /// Packages `go list` reports for the configured patterns, minus ignored
    /// directories. `None` when nothing is left to test.
    fn test_packages(
        &self,
        toolchain: &ToolchainReady,
        env: &ExecutionEnvironment,
    ) -> Result<Option<Vec<String>>> {
        let list = self
            .go(toolchain, env)
            .arg("list")
            .args(self.config.test.packages.iter().cloned())
            .ignore_exit_value();
        let output = self.executor.run_checked(&list)?;
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        if text.contains(NO_PACKAGES) {
            debug!("go list found no packages: {}", text.trim());
            return Ok(None);
        }
        if !output.status.success() {
            return Err(subprocess_error(&list, &output));
        }

        let ignored: Vec<String> = self
            .config
            .test
            .ignored_dirs
            .iter()
            .map(|dir| format!("{}/{dir}", self.module_path))
            .collect();
        let packages: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !ignored.iter().any(|dir| dir == line))
            .map(str::to_owned)
            .collect();
        Ok((!packages.is_empty()).then_some(packages))
    }

    fn build(&self) -> Result<StepStatus> {
        let (_, toolchain) = self.ready(BuildStep::Build)?;
        let env = self.environment(toolchain, BuildStep::Build)?;
        let build = &self.config.build;
        info!("building {}", build.packages.join(" "));
        let invocation = self
            .go(toolchain, &env)
            .arg("build")
            .args(build.cmd_args.iter().cloned())
            .args(build.packages.iter().cloned())
            .inherit_output();
        self.executor.run_checked(&invocation)?;
        Ok(StepStatus::Ran)
    }

    fn clean(&self) -> Result<StepStatus> {
        let root = self.layout.root();
        if !self.layout.is_inside_project() {
            return Err(ProvisionError::UnsafeWorkspace {
                root: root.to_string(),
                project: self.layout.project_dir().to_string(),
            });
        }
        if !root.exists() {
            return Ok(StepStatus::Skipped {
                reason: format!("{root} does not exist"),
            });
        }
        info!("removing {root}");
        std::fs::remove_dir_all(root)?;
        Ok(StepStatus::Ran)
    }
}

impl std::fmt::Debug for GoStepRunner<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoStepRunner")
            .field("layout", &self.layout)
            .field("module_path", &self.module_path)
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

impl StepRunner for GoStepRunner<'_> {
    fn run_step(&self, step: BuildStep, plan: &ExecutionPlan) -> Result<StepStatus> {
        match step {
            BuildStep::Env => self.prepare_env(),
            BuildStep::Dep => self.resolve_deps(plan),
            BuildStep::Grpc => self.generate_grpc(),
            BuildStep::Swag => self.generate_swag(),
            BuildStep::Test => self.run_tests(),
            BuildStep::Build => self.build(),
            BuildStep::Clean => self.clean(),
        }
    }
}

/// Run `invocation` and write its stdout to `destination`.
fn write_stdout(
    executor: &dyn CommandExecutor,
    invocation: &Invocation,
    destination: &Utf8Path,
) -> Result<()> {
    let output = executor.run_checked(invocation)?;
    std::fs::write(destination, &output.stdout)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artefact::extraction::DefaultExtractor;
    use crate::graph::TaskGraph;
    use camino::Utf8PathBuf;
    use crate::test_utils::{
        ExpectedCall, StubDownloader, StubExecutor, failure_output, output_with_stdout,
        sandbox_toolchain, success_output,
    };
    use tempfile::TempDir;

    struct Project {
        _dir: TempDir,
        root: Utf8PathBuf,
        config: GostrapConfig,
    }

    fn project() -> Project {
        let dir = tempfile::tempdir().expect("temp dir");
        let root = Utf8PathBuf::try_from(dir.path().join("app")).expect("utf-8 path");
        std::fs::create_dir_all(&root).expect("mkdir project");
        Project {
            _dir: dir,
            root,
            config: GostrapConfig::default(),
        }
    }

    /// A runner whose Env state was produced without touching the network.
    fn primed<'a>(
        project: &'a Project,
        executor: &'a StubExecutor,
        downloader: &'a StubDownloader,
    ) -> GoStepRunner<'a> {
        let runner = GoStepRunner::new(
            &project.config,
            &project.root,
            executor,
            downloader,
            &DefaultExtractor,
        )
        .with_base_env(ExecutionEnvironment::default());
        let prepared = runner.layout.prepare().expect("prepare");
        let toolchain = sandbox_toolchain(&prepared, "1.11.4");
        runner.prepared.get_or_init(|| prepared);
        runner.toolchain.get_or_init(|| toolchain);
        runner
    }

    fn plan(target: BuildStep) -> ExecutionPlan {
        TaskGraph::new().expect("graph").plan(target)
    }

    #[test]
    fn steps_after_env_require_its_tokens() {
        let project = project();
        let executor = StubExecutor::new(Vec::new());
        let downloader = StubDownloader::serving(Vec::new());
        let runner = GoStepRunner::new(
            &project.config,
            &project.root,
            &executor,
            &downloader,
            &DefaultExtractor,
        );

        let err = runner
            .run_step(BuildStep::Build, &plan(BuildStep::Build))
            .expect_err("not ready");

        assert!(matches!(
            err,
            ProvisionError::StepNotReady {
                step: BuildStep::Build,
                ..
            }
        ));
    }

    #[test]
    fn module_path_defaults_to_directory_name() {
        let project = project();
        let executor = StubExecutor::new(Vec::new());
        let downloader = StubDownloader::serving(Vec::new());
        let runner = GoStepRunner::new(
            &project.config,
            &project.root,
            &executor,
            &downloader,
            &DefaultExtractor,
        );
        assert_eq!(runner.module_path(), "app");
    }

    #[test]
    fn test_step_filters_ignored_dirs_and_writes_reports() {
        let mut project = project();
        project.config.test.ignored_dirs = vec!["mocks".to_owned()];
        project.config.test.envs.insert("CGO_ENABLED".to_owned(), "0".to_owned());
        let downloader = StubDownloader::serving(Vec::new());
        let reports = project.root.join(".gostrap/reports");
        let cover_out = reports.join("cover.out");
        let executor = StubExecutor::new(vec![
            ExpectedCall::new(
                "go",
                &["list", "./..."],
                Ok(output_with_stdout(0, "app\napp/mocks\napp/server\n")),
            ),
            ExpectedCall::new(
                "go",
                &["test", "-coverprofile", cover_out.as_str(), "app", "app/server"],
                Ok(success_output()),
            ),
            ExpectedCall::new(
                "gocov",
                &["convert", cover_out.as_str()],
                Ok(output_with_stdout(0, "{\"Packages\":[]}")),
            ),
            ExpectedCall::new("gocov-xml", &[], Ok(output_with_stdout(0, "<coverage/>"))),
        ]);
        let runner = primed(&project, &executor, &downloader);

        let status = runner
            .run_step(BuildStep::Test, &plan(BuildStep::Test))
            .expect("test step");

        assert_eq!(status, StepStatus::Ran);
        assert_eq!(
            std::fs::read_to_string(reports.join("cover.xml")).expect("xml"),
            "<coverage/>"
        );
        let invocations = executor.invocations();
        let go_test = invocations.get(1).expect("go test call");
        assert_eq!(go_test.environment().get("CGO_ENABLED"), Some("0"));
        let to_xml = invocations.get(3).expect("gocov-xml call");
        assert_eq!(
            to_xml.stdin_path().map(Utf8Path::as_str),
            Some(reports.join("cover.json").as_str())
        );
        executor.assert_finished();
    }

    #[test]
    fn test_step_is_skipped_without_packages() {
        let project = project();
        let downloader = StubDownloader::serving(Vec::new());
        let executor = StubExecutor::new(vec![ExpectedCall::new(
            "go",
            &["list", "./..."],
            Ok(failure_output(1, "go: warning: \"./...\" matched no packages")),
        )]);
        let runner = primed(&project, &executor, &downloader);

        let status = runner
            .run_step(BuildStep::Test, &plan(BuildStep::Test))
            .expect("skip");

        assert!(matches!(status, StepStatus::Skipped { .. }));
        executor.assert_finished();
    }

    #[test]
    fn build_passes_args_and_envs() {
        let mut project = project();
        project.config.build.cmd_args = vec!["-o".to_owned(), "bin/app".to_owned()];
        project.config.build.envs.insert("GOOS".to_owned(), "windows".to_owned());
        let downloader = StubDownloader::serving(Vec::new());
        let executor = StubExecutor::new(vec![ExpectedCall::new(
            "go",
            &["build", "-o", "bin/app", "./..."],
            Ok(success_output()),
        )]);
        let runner = primed(&project, &executor, &downloader);

        runner
            .run_step(BuildStep::Build, &plan(BuildStep::Build))
            .expect("build");

        let build = executor.invocations().pop().expect("build call");
        assert_eq!(build.environment().get("GOOS"), Some("windows"));
        assert_eq!(build.working_dir(), Some(project.root.as_path()));
    }

    #[test]
    fn clean_removes_the_workspace() {
        let project = project();
        let downloader = StubDownloader::serving(Vec::new());
        let executor = StubExecutor::new(Vec::new());
        let runner = primed(&project, &executor, &downloader);
        assert!(project.root.join(".gostrap").is_dir());

        let first = runner
            .run_step(BuildStep::Clean, &plan(BuildStep::Clean))
            .expect("clean");
        let second = runner
            .run_step(BuildStep::Clean, &plan(BuildStep::Clean))
            .expect("clean again");

        assert_eq!(first, StepStatus::Ran);
        assert!(matches!(second, StepStatus::Skipped { .. }));
        assert!(!project.root.join(".gostrap").exists());
    }

    #[test]
    fn clean_refuses_a_workspace_outside_the_project() {
        let mut project = project();
        project.config.workspace.dir = Utf8PathBuf::from("..");
        let downloader = StubDownloader::serving(Vec::new());
        let executor = StubExecutor::new(Vec::new());
        let runner = GoStepRunner::new(
            &project.config,
            &project.root,
            &executor,
            &downloader,
            &DefaultExtractor,
        );

        let err = runner
            .run_step(BuildStep::Clean, &plan(BuildStep::Clean))
            .expect_err("unsafe workspace");

        assert!(matches!(err, ProvisionError::UnsafeWorkspace { .. }));
        assert!(project.root.is_dir());
    }

    #[test]
    fn env_downloads_the_toolchain_for_the_configured_host() {
        let project = project();
        let downloader = StubDownloader::serving(go_archive());
        let executor = StubExecutor::new(Vec::new());
        let runner = GoStepRunner::new(
            &project.config,
            &project.root,
            &executor,
            &downloader,
            &DefaultExtractor,
        )
        .with_base_env(ExecutionEnvironment::default())
        .with_host(HostFacts::new("macos", "aarch64"));

        let status = runner
            .run_step(BuildStep::Env, &plan(BuildStep::Env))
            .expect("env");

        assert_eq!(status, StepStatus::Ran);
        assert_eq!(
            downloader.urls(),
            vec!["https://dl.google.com/go/go1.11.4.darwin-arm64.tar.gz".to_owned()]
        );
        assert!(project.root.join(".gostrap/env/go/bin/go").is_file());
        assert!(project.root.join(".gostrap/env/go/gopath").is_dir());
    }

    fn go_archive() -> Vec<u8> {
        let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let mut header = tar::Header::new_gnu();
        header.set_size(3);
        header.set_mode(0o755);
        builder
            .append_data(&mut header, "go/bin/go", &b"bin"[..])
            .expect("append");
        builder
            .into_inner()
            .expect("tar finish")
            .finish()
            .expect("gzip finish")
    }

    #[test]
    fn grpc_without_proto_dir_is_skipped() {
        let project = project();
        let downloader = StubDownloader::serving(Vec::new());
        let executor = StubExecutor::new(Vec::new());
        let runner = primed(&project, &executor, &downloader);

        let status = runner
            .run_step(BuildStep::Grpc, &plan(BuildStep::Grpc))
            .expect("grpc");

        assert!(matches!(status, StepStatus::Skipped { .. }));
    }
}
