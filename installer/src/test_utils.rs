//! Shared test utilities for the installer crate.
//!
//! Stubs here are `Send + Sync` so they can back concurrently running
//! provisioning jobs.

use std::collections::VecDeque;
use std::path::Path;
use std::process::{ExitStatus, Output};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use gostrap::EnvConfig;

use crate::artefact::acquire::ArtifactAcquirer;
use crate::artefact::download::{ArtefactDownloader, DownloadError};
use crate::artefact::extraction::DefaultExtractor;
use crate::environment::ExecutionEnvironment;
use crate::error::{ProvisionError, Result};
use crate::exec::{CommandExecutor, Invocation};
use crate::layout::PreparedLayout;
use crate::platform::HostFacts;
use crate::toolchain::{GoToolchain, ToolchainReady};

/// Creates an `ExitStatus` from an exit code (Unix implementation).
#[cfg(unix)]
#[must_use]
pub fn exit_status(code: i32) -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;

    ExitStatus::from_raw(code << 8)
}

/// Creates an `ExitStatus` from an exit code (Windows implementation).
#[cfg(windows)]
#[must_use]
pub fn exit_status(code: i32) -> ExitStatus {
    use std::os::windows::process::ExitStatusExt;

    ExitStatus::from_raw(code as u32)
}

/// Creates a successful command `Output` with empty stdout and stderr.
#[must_use]
pub fn success_output() -> Output {
    output_with_stdout(0, "")
}

/// Creates a command `Output` with the given exit code and stdout.
#[must_use]
pub fn output_with_stdout(code: i32, stdout: &str) -> Output {
    Output {
        status: exit_status(code),
        stdout: stdout.as_bytes().to_vec(),
        stderr: Vec::new(),
    }
}

/// Creates a command `Output` with the given exit code and stderr.
#[must_use]
pub fn failure_output(code: i32, stderr: &str) -> Output {
    Output {
        status: exit_status(code),
        stdout: Vec::new(),
        stderr: stderr.as_bytes().to_vec(),
    }
}

/// Represents an expected command invocation for testing.
#[derive(Debug)]
pub struct ExpectedCall {
    /// Program name; matches the invocation's program or its file name.
    pub program: String,
    /// The arguments to pass to the command.
    pub args: Vec<String>,
    /// The result to return when this command is invoked.
    pub result: Result<Output>,
}

impl ExpectedCall {
    /// Describe an expected call and its canned result.
    #[must_use]
    pub fn new(program: &str, args: &[&str], result: Result<Output>) -> Self {
        Self {
            program: program.to_owned(),
            args: args.iter().map(|arg| (*arg).to_owned()).collect(),
            result,
        }
    }

    fn matches(&self, invocation: &Invocation) -> bool {
        let program = invocation.program();
        let file_name = program.rsplit('/').next().unwrap_or(program);
        (self.program == program || self.program == file_name)
            && self.args.as_slice() == invocation.arguments()
    }
}

/// A stub implementation of `CommandExecutor` for testing.
///
/// Returns predefined results for expected invocations and records every
/// invocation it receives. Ordered stubs require calls in sequence;
/// unordered stubs accept the expected calls in any order, which suits
/// concurrently running jobs.
#[derive(Debug)]
pub struct StubExecutor {
    expected: Mutex<VecDeque<ExpectedCall>>,
    received: Mutex<Vec<Invocation>>,
    ordered: bool,
}

impl StubExecutor {
    /// Creates a stub that expects `expected` in order.
    #[must_use]
    pub fn new(expected: Vec<ExpectedCall>) -> Self {
        Self {
            expected: Mutex::new(expected.into()),
            received: Mutex::new(Vec::new()),
            ordered: true,
        }
    }

    /// Creates a stub that accepts `expected` in any order.
    #[must_use]
    pub fn unordered(expected: Vec<ExpectedCall>) -> Self {
        Self {
            ordered: false,
            ..Self::new(expected)
        }
    }

    /// Every invocation received so far, in arrival order.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn invocations(&self) -> Vec<Invocation> {
        self.received.lock().expect("stub lock").clone()
    }

    /// Asserts that all expected command invocations have been consumed.
    ///
    /// # Panics
    ///
    /// Panics if there are remaining expected calls that were not invoked.
    pub fn assert_finished(&self) {
        let remaining = self.expected.lock().expect("stub lock");
        assert!(
            remaining.is_empty(),
            "expected no further command invocations, {} remaining: {:?}",
            remaining.len(),
            remaining
                .iter()
                .map(|call| format!("{} {}", call.program, call.args.join(" ")))
                .collect::<Vec<_>>()
        );
    }
}

impl CommandExecutor for StubExecutor {
    fn run(&self, invocation: &Invocation) -> Result<Output> {
        self.received
            .lock()
            .expect("stub lock")
            .push(invocation.clone());

        let mut expected = self.expected.lock().expect("stub lock");
        let position = if self.ordered {
            expected
                .front()
                .filter(|call| call.matches(invocation))
                .map(|_| 0)
        } else {
            expected.iter().position(|call| call.matches(invocation))
        };

        position
            .and_then(|index| expected.remove(index))
            .map(|call| call.result)
            .unwrap_or_else(|| {
                Err(ProvisionError::StubMismatch {
                    message: format!("unexpected invocation: {}", invocation.command_line()),
                })
            })
    }
}

#[derive(Debug)]
enum StubDownload {
    Serve(Vec<u8>),
    Fail(u16),
}

/// A stub `ArtefactDownloader` that serves canned bytes or fails.
#[derive(Debug)]
pub struct StubDownloader {
    behaviour: StubDownload,
    calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl StubDownloader {
    /// Write `bytes` to the destination of every download.
    #[must_use]
    pub fn serving(bytes: Vec<u8>) -> Self {
        Self::with(StubDownload::Serve(bytes))
    }

    /// Fail every download with HTTP `status`, after writing a partial file.
    #[must_use]
    pub fn failing_with(status: u16) -> Self {
        Self::with(StubDownload::Fail(status))
    }

    fn with(behaviour: StubDownload) -> Self {
        Self {
            behaviour,
            calls: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
        }
    }

    /// Number of downloads attempted.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// URLs requested, in order.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().expect("stub lock").clone()
    }
}

impl ArtefactDownloader for StubDownloader {
    fn download(&self, url: &str, dest: &Path) -> std::result::Result<(), DownloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().expect("stub lock").push(url.to_owned());
        match &self.behaviour {
            StubDownload::Serve(bytes) => {
                std::fs::write(dest, bytes)?;
                Ok(())
            }
            StubDownload::Fail(status) => {
                std::fs::write(dest, b"partial")?;
                Err(DownloadError::Status {
                    url: url.to_owned(),
                    status: *status,
                    message: "stubbed failure".to_owned(),
                })
            }
        }
    }
}

/// A sandbox toolchain token for `prepared`, backed by a placeholder `go`
/// binary that the local probe accepts.
///
/// # Panics
///
/// Panics if the placeholder cannot be written or the probe is rejected.
#[must_use]
pub fn sandbox_toolchain(prepared: &PreparedLayout, version: &str) -> ToolchainReady {
    let config = EnvConfig {
        use_sandbox: true,
        version: version.to_owned(),
        min_version: version.to_owned(),
        sha256: None,
    };
    let toolchain = GoToolchain::new(prepared, &config);
    let binary = toolchain.sandbox_binary();
    if let Some(parent) = binary.parent() {
        std::fs::create_dir_all(parent).expect("create toolchain bin dir");
    }
    std::fs::write(&binary, b"#!/bin/sh\n").expect("write placeholder go");

    let executor = StubExecutor::new(vec![ExpectedCall::new(
        "go",
        &["version"],
        Ok(output_with_stdout(
            0,
            &format!("go version go{version} linux/amd64\n"),
        )),
    )]);
    let downloader = StubDownloader::serving(Vec::new());
    let acquirer = ArtifactAcquirer::new(
        &downloader,
        &DefaultExtractor,
        &executor,
        HostFacts::new("linux", "x86_64"),
        prepared.cache(),
    );
    toolchain
        .ensure(&acquirer, &executor, &ExecutionEnvironment::default())
        .expect("placeholder toolchain is accepted")
}
