//! Subprocess invocation with composed environments and timeouts.
//!
//! Every external command gostrap runs (the Go toolchain, protoc, git, the
//! coverage converters) goes through [`CommandExecutor`], so step logic can be
//! exercised against a stub without spawning processes.

use std::fs::File;
use std::io::Read;
use std::process::{Command, Output, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use log::debug;
use wait_timeout::ChildExt;

use crate::environment::ExecutionEnvironment;
use crate::error::{ProvisionError, Result};

/// Default timeout for a single subprocess (30 minutes).
///
/// Module downloads and full test runs are legitimately slow, so the bound
/// only guards against a hung child.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Where a subprocess's stdout and stderr go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Capture both streams into the returned [`Output`].
    #[default]
    Capture,
    /// Stream both to the parent's terminal.
    Inherit,
}

/// A fully described subprocess call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
    env: ExecutionEnvironment,
    cwd: Option<Utf8PathBuf>,
    stdin: Option<Utf8PathBuf>,
    output: OutputMode,
    ignore_exit_value: bool,
    timeout: Duration,
}

impl Invocation {
    /// Start describing a call to `program` with an empty environment.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: ExecutionEnvironment::default(),
            cwd: None,
            stdin: None,
            output: OutputMode::Capture,
            ignore_exit_value: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Use `env` as the complete child environment.
    #[must_use]
    pub fn env(mut self, env: ExecutionEnvironment) -> Self {
        self.env = env;
        self
    }

    /// Run in `dir`.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Feed the contents of `path` to the child's stdin.
    #[must_use]
    pub fn stdin_file(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.stdin = Some(path.into());
        self
    }

    /// Stream output to the terminal instead of capturing it.
    #[must_use]
    pub fn inherit_output(mut self) -> Self {
        self.output = OutputMode::Inherit;
        self
    }

    /// Treat any exit status as success in [`CommandExecutor::run_checked`].
    #[must_use]
    pub fn ignore_exit_value(mut self) -> Self {
        self.ignore_exit_value = true;
        self
    }

    /// Override the timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Program to run.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments, in order.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Child environment.
    #[must_use]
    pub fn environment(&self) -> &ExecutionEnvironment {
        &self.env
    }

    /// Working directory, if set.
    #[must_use]
    pub fn working_dir(&self) -> Option<&Utf8Path> {
        self.cwd.as_deref()
    }

    /// Stdin source file, if set.
    #[must_use]
    pub fn stdin_path(&self) -> Option<&Utf8Path> {
        self.stdin.as_deref()
    }

    /// Output handling mode.
    #[must_use]
    pub fn output_mode(&self) -> OutputMode {
        self.output
    }

    /// Whether a non-zero exit is tolerated.
    #[must_use]
    pub fn ignores_exit_value(&self) -> bool {
        self.ignore_exit_value
    }

    /// Timeout after which the child is killed.
    #[must_use]
    pub fn timeout_duration(&self) -> Duration {
        self.timeout
    }

    /// Render as a shell-like command line for logs.
    ///
    /// # Examples
    ///
    /// ```
    /// use gostrap_installer::exec::Invocation;
    ///
    /// let invocation = Invocation::new("go").args(["get", "-d", "example.com/m"]);
    /// assert_eq!(invocation.command_line(), "go get -d example.com/m");
    /// ```
    #[must_use]
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Abstraction for running external commands.
pub trait CommandExecutor: Send + Sync {
    /// Run `invocation` and return its output whatever the exit status.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Spawn`] when the program cannot start,
    /// [`ProvisionError::SubprocessTimeout`] when it exceeds its timeout, and
    /// I/O errors from stdin or output handling.
    fn run(&self, invocation: &Invocation) -> Result<Output>;

    /// Run `invocation`, mapping a non-zero exit to an error.
    ///
    /// # Errors
    ///
    /// As [`CommandExecutor::run`], plus [`ProvisionError::Subprocess`] for a
    /// non-zero exit unless the invocation ignores its exit value.
    fn run_checked(&self, invocation: &Invocation) -> Result<Output> {
        let output = self.run(invocation)?;
        if output.status.success() || invocation.ignores_exit_value() {
            return Ok(output);
        }
        Err(subprocess_error(invocation, &output))
    }
}

/// Build a [`ProvisionError::Subprocess`] from a finished call.
#[must_use]
pub fn subprocess_error(invocation: &Invocation, output: &Output) -> ProvisionError {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    ProvisionError::Subprocess {
        program: invocation.program().to_owned(),
        exit_code: output.status.code(),
        output: text.trim().to_owned(),
    }
}

/// Executes commands on the host system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandExecutor;

type Reader = Option<JoinHandle<std::io::Result<Vec<u8>>>>;

impl CommandExecutor for SystemCommandExecutor {
    fn run(&self, invocation: &Invocation) -> Result<Output> {
        debug!("running: {}", invocation.command_line());

        let mut cmd = Command::new(invocation.program());
        cmd.args(invocation.arguments())
            .env_clear()
            .envs(invocation.environment().iter());
        if let Some(dir) = invocation.working_dir() {
            cmd.current_dir(dir.as_std_path());
        }
        match invocation.stdin_path() {
            Some(path) => {
                cmd.stdin(Stdio::from(File::open(path)?));
            }
            None => {
                cmd.stdin(Stdio::null());
            }
        }
        match invocation.output_mode() {
            OutputMode::Capture => cmd.stdout(Stdio::piped()).stderr(Stdio::piped()),
            OutputMode::Inherit => cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit()),
        };

        let mut child = cmd.spawn().map_err(|source| ProvisionError::Spawn {
            program: invocation.program().to_owned(),
            source,
        })?;

        // Pipes are drained concurrently so a chatty child cannot block on a
        // full pipe while we wait for it.
        let stdout_reader = drain(child.stdout.take());
        let stderr_reader = drain(child.stderr.take());

        let Some(status) = child.wait_timeout(invocation.timeout_duration())? else {
            if child.kill().is_err() {
                debug!("{} exited before it could be killed", invocation.program());
            }
            child.wait()?;
            return Err(ProvisionError::SubprocessTimeout {
                program: invocation.program().to_owned(),
                timeout: invocation.timeout_duration(),
            });
        };

        Ok(Output {
            status,
            stdout: collect(stdout_reader)?,
            stderr: collect(stderr_reader)?,
        })
    }
}

fn drain<R: Read + Send + 'static>(stream: Option<R>) -> Reader {
    stream.map(|mut stream| {
        thread::spawn(move || {
            let mut buffer = Vec::new();
            stream.read_to_end(&mut buffer).map(|_| buffer)
        })
    })
}

fn collect(reader: Reader) -> Result<Vec<u8>> {
    let Some(handle) = reader else {
        return Ok(Vec::new());
    };
    let bytes = handle
        .join()
        .map_err(|_| std::io::Error::other("output reader thread panicked"))??;
    Ok(bytes)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str) -> Invocation {
        let mut env = ExecutionEnvironment::default();
        env.set("PATH", "/usr/bin:/bin");
        env.set("GOSTRAP_PROBE", "layered");
        Invocation::new("/bin/sh").args(["-c", script]).env(env)
    }

    #[test]
    fn captures_output_with_the_composed_environment_only() {
        let output = SystemCommandExecutor
            .run_checked(&shell("echo \"$GOSTRAP_PROBE\"; echo \"${HOME:-unset}\" >&2"))
            .expect("shell runs");
        assert_eq!(String::from_utf8_lossy(&output.stdout), "layered\n");
        assert_eq!(String::from_utf8_lossy(&output.stderr), "unset\n");
    }

    #[test]
    fn non_zero_exit_is_a_subprocess_error() {
        let err = SystemCommandExecutor
            .run_checked(&shell("echo nope >&2; exit 3"))
            .expect_err("exit 3 fails");
        assert!(matches!(
            err,
            ProvisionError::Subprocess { exit_code: Some(3), ref output, .. } if output == "nope"
        ));
    }

    #[test]
    fn ignored_exit_value_returns_the_output() {
        let output = SystemCommandExecutor
            .run_checked(&shell("exit 1").ignore_exit_value())
            .expect("exit ignored");
        assert_eq!(output.status.code(), Some(1));
    }

    #[test]
    fn stdin_file_is_fed_to_the_child() {
        let dir = tempfile::tempdir().expect("temp dir");
        let input = Utf8PathBuf::try_from(dir.path().join("in.json")).expect("utf-8 path");
        std::fs::write(&input, "{\"packages\":[]}").expect("write input");

        let output = SystemCommandExecutor
            .run_checked(&shell("cat").stdin_file(input))
            .expect("cat runs");
        assert_eq!(String::from_utf8_lossy(&output.stdout), "{\"packages\":[]}");
    }

    #[test]
    fn hung_child_is_killed_after_timeout() {
        let err = SystemCommandExecutor
            .run(&shell("sleep 5").timeout(Duration::from_millis(100)))
            .expect_err("times out");
        assert!(matches!(err, ProvisionError::SubprocessTimeout { .. }));
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let err = SystemCommandExecutor
            .run(&Invocation::new("/nonexistent/gostrap-tool"))
            .expect_err("cannot spawn");
        assert!(matches!(err, ProvisionError::Spawn { .. }));
    }
}
