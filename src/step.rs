//! Build step vocabulary shared by configuration and the installer.
//!
//! The set of steps is closed: every invocation names exactly one
//! [`BuildStep`], and the installer derives the prerequisite steps from a
//! fixed table. Steps parse from their short CLI names (`env`, `dep`, ...)
//! and from the legacy task names (`goEnv`, `goDep`, ...).

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// A named unit of work in a gostrap invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BuildStep {
    /// Provision the Go toolchain and workspace directories.
    Env,
    /// Resolve library dependencies and auxiliary tools.
    Dep,
    /// Generate gRPC and Protobuf stubs.
    Grpc,
    /// Generate Swagger documents for Gin projects.
    Swag,
    /// Compile the project packages.
    Build,
    /// Run the test suite with coverage reports.
    Test,
    /// Delete the gostrap workspace directory.
    Clean,
}

/// Error returned when a step name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown build step \"{name}\"; expected one of: {expected}")]
pub struct UnknownStep {
    /// The rejected name.
    pub name: String,
    /// Comma-separated list of accepted names.
    pub expected: String,
}

impl BuildStep {
    /// Every step, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::Env,
        Self::Dep,
        Self::Grpc,
        Self::Swag,
        Self::Build,
        Self::Test,
        Self::Clean,
    ];

    /// Short lowercase name used on the command line.
    ///
    /// # Examples
    ///
    /// ```
    /// use gostrap::BuildStep;
    ///
    /// assert_eq!(BuildStep::Grpc.name(), "grpc");
    /// ```
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Env => "env",
            Self::Dep => "dep",
            Self::Grpc => "grpc",
            Self::Swag => "swag",
            Self::Build => "build",
            Self::Test => "test",
            Self::Clean => "clean",
        }
    }

    /// One-line description shown in help output and dry runs.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Env => "Set up the Go environment",
            Self::Dep => "Resolve Go library and third-party tool dependencies",
            Self::Grpc => "Generate gRPC and Protobuf code",
            Self::Swag => "Generate Swagger files for Gin projects",
            Self::Build => "Build the Go project",
            Self::Test => "Test the Go project",
            Self::Clean => "Clean the gostrap workspace",
        }
    }

    fn legacy_name(self) -> &'static str {
        match self {
            Self::Env => "goenv",
            Self::Dep => "godep",
            Self::Grpc => "gogrpc",
            Self::Swag => "goswag",
            Self::Build => "gobuild",
            Self::Test => "gotest",
            Self::Clean => "goclean",
        }
    }
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BuildStep {
    type Err = UnknownStep;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let lowered = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|step| step.name() == lowered || step.legacy_name() == lowered)
            .ok_or_else(|| UnknownStep {
                name: value.to_owned(),
                expected: Self::ALL
                    .iter()
                    .map(|step| step.name())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}
