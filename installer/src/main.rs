//! gostrap CLI entrypoint.
//!
//! Loads `gostrap.toml`, plans the requested step, and runs it with the real
//! subprocess, download and extraction collaborators.

use std::io::Write;

use clap::Parser;
use gostrap::GostrapConfig;
use gostrap_installer::artefact::download::HttpDownloader;
use gostrap_installer::artefact::extraction::DefaultExtractor;
use gostrap_installer::cli::Cli;
use gostrap_installer::error::{Result, render_chain};
use gostrap_installer::exec::SystemCommandExecutor;
use gostrap_installer::graph::dependencies_for_plan;
use gostrap_installer::orchestrator::BuildOrchestrator;
use gostrap_installer::output::{DryRunInfo, summary_text, write_stderr_line};
use gostrap_installer::steps::GoStepRunner;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_level());
    let mut stderr = std::io::stderr();
    let run_result = run(&cli, &mut stderr);
    let exit_code = exit_code_for_run_result(run_result, &mut stderr);
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

/// Route `log` records through a stderr fmt subscriber. `RUST_LOG` wins over
/// the level implied by `-v`/`-q`.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("gostrap={level},gostrap_installer={level}")));
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
    if installed.is_err() {
        // A global subscriber is already set; keep it.
    }
}

fn run(cli: &Cli, stderr: &mut dyn Write) -> Result<()> {
    let config = load_config(cli)?;
    let project_dir = cli.project_dir.canonicalize_utf8()?;
    let orchestrator = BuildOrchestrator::new()?;

    let executor = SystemCommandExecutor;
    let downloader = HttpDownloader::default();
    let runner = GoStepRunner::new(
        &config,
        &project_dir,
        &executor,
        &downloader,
        &DefaultExtractor,
    );

    if cli.dry_run {
        let plan = orchestrator.plan(cli.step);
        let dependencies = dependencies_for_plan(
            &plan,
            &config.dependencies.build,
            &config.dependencies.test,
        );
        let workspace_dir = project_dir.join(&config.workspace.dir);
        let info = DryRunInfo {
            project_dir: &project_dir,
            workspace_dir: &workspace_dir,
            module_path: runner.module_path(),
            go_version: &config.env.version,
            use_sandbox: config.env.use_sandbox,
            plan: &plan,
            dependencies: &dependencies,
        };
        write_stderr_line(stderr, info.display_text());
        return Ok(());
    }

    let summary = orchestrator.run(cli.step, &runner)?;
    if !cli.quiet {
        write_stderr_line(stderr, summary_text(&summary));
    }
    Ok(())
}

/// An explicit `--config` must exist; the implicit project file may not.
fn load_config(cli: &Cli) -> Result<GostrapConfig> {
    let path = cli.config_path();
    let mut config = if cli.config.is_some() {
        GostrapConfig::load(&path)?
    } else {
        GostrapConfig::load_or_default(&path)?
    };
    if cli.no_sandbox {
        config.env.use_sandbox = false;
    }
    Ok(config)
}

fn exit_code_for_run_result(result: Result<()>, stderr: &mut dyn Write) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) => {
            write_stderr_line(stderr, format!("error: {}", render_chain(&err)));
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gostrap::BuildStep;
    use gostrap_installer::error::ProvisionError;

    #[test]
    fn exit_code_for_run_result_returns_zero_on_success() {
        let mut stderr = Vec::new();
        let exit_code = exit_code_for_run_result(Ok(()), &mut stderr);
        assert_eq!(exit_code, 0);
        assert!(stderr.is_empty());
    }

    #[test]
    fn exit_code_for_run_result_prints_cause_chain_and_returns_one() {
        let err = ProvisionError::VersionTooLow {
            kind: "Go".to_owned(),
            actual: "1.11.0".to_owned(),
            minimum: "1.11.4".to_owned(),
        }
        .in_step(BuildStep::Env);

        let mut stderr = Vec::new();
        let exit_code = exit_code_for_run_result(Err(err), &mut stderr);
        assert_eq!(exit_code, 1);

        let stderr_text = String::from_utf8(stderr).expect("stderr was not UTF-8");
        assert_eq!(
            stderr_text,
            "error: step env failed: Go version (1.11.0) not supported; at least 1.11.4 is required\n"
        );
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let cli = Cli::parse_from(["gostrap", "--config", "/nonexistent/gostrap.toml", "env"]);
        let err = load_config(&cli).expect_err("missing explicit config");
        assert!(matches!(err, ProvisionError::Config(_)));
    }

    #[test]
    fn no_sandbox_overrides_the_config_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let project = dir.path().to_str().expect("utf-8 path");
        let cli = Cli::parse_from(["gostrap", "--no-sandbox", "-C", project, "env"]);
        let config = load_config(&cli).expect("defaults");
        assert!(!config.env.use_sandbox);
    }

    #[test]
    fn dry_run_prints_plan_without_touching_the_project() {
        let dir = tempfile::tempdir().expect("temp dir");
        let project = dir.path().to_str().expect("utf-8 path");
        let cli = Cli::parse_from(["gostrap", "--dry-run", "-C", project, "test"]);

        let mut stderr = Vec::new();
        run(&cli, &mut stderr).expect("dry run");

        let text = String::from_utf8(stderr).expect("utf-8");
        assert!(text.contains("env -> dep -> grpc -> test"));
        assert!(!dir.path().join(".gostrap").exists());
    }
}
