//! CLI argument definitions for gostrap.
//!
//! Kept apart from the entrypoint so the binary stays focused on wiring
//! collaborators together.

use camino::Utf8PathBuf;
use clap::Parser;
use gostrap::BuildStep;

/// Provision a Go toolchain and run a project's build steps.
#[derive(Parser, Debug, Clone)]
#[command(name = "gostrap")]
#[command(version, about)]
#[command(long_about = concat!(
    "Provision a Go toolchain and run a project's build steps.\n\n",
    "gostrap downloads the pinned Go release and protoc into a private ",
    "workspace directory, installs the auxiliary code generators, and then ",
    "runs the requested step together with every step it depends on.",
))]
#[command(after_help = concat!(
    "STEPS:\n",
    "  env     Prepare the workspace and the Go toolchain\n",
    "  dep     Install protoc, Go tools and module dependencies\n",
    "  grpc    Generate gRPC, gateway and swagger sources\n",
    "  swag    Generate swagger documentation with swag\n",
    "  test    Run tests with coverage reports\n",
    "  build   Build the project's packages\n",
    "  clean   Delete the workspace directory\n\n",
    "EXAMPLES:\n",
    "  Build with the vendored toolchain:\n",
    "    $ gostrap build\n\n",
    "  Test using the system Go installation:\n",
    "    $ gostrap --no-sandbox test\n\n",
    "  Show what a build would run:\n",
    "    $ gostrap --dry-run build",
))]
pub struct Cli {
    /// Step to run, together with its prerequisites.
    #[arg(value_name = "STEP")]
    pub step: BuildStep,

    /// Configuration file [default: <PROJECT_DIR>/gostrap.toml].
    #[arg(long, value_name = "FILE")]
    pub config: Option<Utf8PathBuf>,

    /// Project directory.
    #[arg(short = 'C', long, value_name = "DIR", default_value = ".")]
    pub project_dir: Utf8PathBuf,

    /// Use a system Go installation when it reports the required version.
    #[arg(long)]
    pub no_sandbox: bool,

    /// Print the step plan and dependency set, then exit.
    #[arg(long)]
    pub dry_run: bool,

    /// Increase log verbosity (repeatable: -v, -vv).
    #[arg(
        short,
        long = "verbose",
        action = clap::ArgAction::Count,
        conflicts_with = "quiet"
    )]
    pub verbosity: u8,

    /// Suppress progress output (errors still shown).
    #[arg(short, long, conflicts_with = "verbosity")]
    pub quiet: bool,
}

impl Cli {
    /// The configuration file to load.
    ///
    /// # Examples
    ///
    /// ```
    /// use clap::Parser;
    /// use gostrap_installer::cli::Cli;
    ///
    /// let cli = Cli::parse_from(["gostrap", "-C", "/src/app", "build"]);
    /// assert_eq!(cli.config_path(), "/src/app/gostrap.toml");
    /// ```
    #[must_use]
    pub fn config_path(&self) -> Utf8PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| self.project_dir.join(gostrap::CONFIG_FILE_NAME))
    }

    /// Log filter directive implied by `-v` and `-q`.
    #[must_use]
    pub const fn log_level(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
