//! Project configuration loaded from `gostrap.toml`.
//!
//! Every section is optional and falls back to the defaults the toolchain
//! bootstrapper has always used, so an empty file (or no file at all, via
//! [`GostrapConfig::load_or_default`]) yields a working setup. Values are
//! treated as opaque: version strings are only shape-checked later, when
//! the installer gates on them.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use log::debug;
use serde::Deserialize;
use thiserror::Error;

use crate::step::BuildStep;

/// Name of the configuration file looked up in the project directory.
pub const CONFIG_FILE_NAME: &str = "gostrap.toml";

/// Module paths installed with `go get -u` in GOPATH mode by default.
pub const DEFAULT_TOOLS: &[&str] = &[
    "github.com/grpc-ecosystem/grpc-gateway/protoc-gen-grpc-gateway",
    "github.com/grpc-ecosystem/grpc-gateway/protoc-gen-swagger",
    "github.com/golang/protobuf/protoc-gen-go",
    "google.golang.org/grpc",
    "github.com/wadey/gocovmerge",
    "github.com/axw/gocov/gocov",
    "github.com/AlekSi/gocov-xml",
];

static EMPTY_ENV: BTreeMap<String, String> = BTreeMap::new();

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("configuration file not found: {path}")]
    NotFound {
        /// Path that was looked up.
        path: Utf8PathBuf,
    },

    /// The configuration file could not be read.
    #[error("failed to read {path}")]
    Read {
        /// Path of the unreadable file.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for this schema.
    #[error("invalid configuration: {reason}")]
    Parse {
        /// Description of the parse failure.
        reason: String,
    },
}

/// Top-level configuration for one project.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct GostrapConfig {
    /// Workspace directory and module identity.
    pub workspace: WorkspaceConfig,
    /// Go toolchain selection.
    pub env: EnvConfig,
    /// Dependency resolution and auxiliary tools.
    pub dep: DepConfig,
    /// gRPC code generation.
    pub grpc: GrpcConfig,
    /// Test step options.
    pub test: TestConfig,
    /// Build step options.
    pub build: BuildConfig,
    /// Library module paths to resolve.
    pub dependencies: DependenciesConfig,
}

/// Location of the private work directory and the module path.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct WorkspaceConfig {
    /// Work directory relative to the project directory.
    pub dir: Utf8PathBuf,
    /// Module path passed to `go mod init`; defaults to the project name.
    pub module_path: Option<String>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            dir: Utf8PathBuf::from(".gostrap"),
            module_path: None,
        }
    }
}

/// Go toolchain selection.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EnvConfig {
    /// Use the vendored toolchain copy instead of the system one.
    pub use_sandbox: bool,
    /// Required Go version.
    pub version: String,
    /// Lowest Go version gostrap supports (module support starts at 1.11).
    pub min_version: String,
    /// Expected SHA-256 of the Go release archive; unchecked when absent.
    pub sha256: Option<String>,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            use_sandbox: true,
            version: "1.11.4".to_owned(),
            min_version: "1.11.4".to_owned(),
            sha256: None,
        }
    }
}

/// Options for the dependency step.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DepConfig {
    /// Extra arguments passed to `go get -d`.
    pub cmd_args: Vec<String>,
    /// Extra environment variables for `go get -d`.
    pub envs: BTreeMap<String, String>,
    /// Required protoc version.
    pub proto_version: String,
    /// Lowest supported protoc version.
    pub min_proto_version: String,
    /// Expected SHA-256 of the protoc archive; unchecked when absent.
    pub proto_sha256: Option<String>,
    /// swag release installed into GOPATH.
    pub swaggo_version: String,
    /// Tools installed with `go get -u` in GOPATH mode.
    pub tools: Vec<String>,
}

impl Default for DepConfig {
    fn default() -> Self {
        Self {
            cmd_args: Vec::new(),
            envs: BTreeMap::new(),
            proto_version: "3.6.1".to_owned(),
            min_proto_version: "3.6.1".to_owned(),
            proto_sha256: None,
            swaggo_version: "1.3.2".to_owned(),
            tools: DEFAULT_TOOLS.iter().map(|tool| (*tool).to_owned()).collect(),
        }
    }
}

/// Options for gRPC code generation.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct GrpcConfig {
    /// Directory scanned for `.proto` files, relative to the project.
    pub proto_dir: Utf8PathBuf,
}

impl Default for GrpcConfig {
    fn default() -> Self {
        Self {
            proto_dir: Utf8PathBuf::from("proto"),
        }
    }
}

/// Options for the test step.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct TestConfig {
    /// Package patterns passed to `go list`.
    pub packages: Vec<String>,
    /// Extra arguments passed to `go test`.
    pub cmd_args: Vec<String>,
    /// Extra environment variables for `go test`.
    pub envs: BTreeMap<String, String>,
    /// Directories (relative to the module path) excluded from testing.
    pub ignored_dirs: Vec<String>,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            packages: vec!["./...".to_owned()],
            cmd_args: Vec::new(),
            envs: BTreeMap::new(),
            ignored_dirs: Vec::new(),
        }
    }
}

/// Options for the build step.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Package patterns passed to `go build`.
    pub packages: Vec<String>,
    /// Extra arguments passed to `go build`.
    pub cmd_args: Vec<String>,
    /// Extra environment variables, e.g. `GOOS`/`GOARCH` for cross builds.
    pub envs: BTreeMap<String, String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            packages: vec!["./...".to_owned()],
            cmd_args: Vec::new(),
            envs: BTreeMap::new(),
        }
    }
}

/// Declared library dependencies.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DependenciesConfig {
    /// Module paths always resolved.
    pub build: Vec<String>,
    /// Module paths resolved only when tests are scheduled.
    pub test: Vec<String>,
}

/// Per-step view of the explicit environment and argument overrides.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepOptions<'a> {
    /// Environment variables the step layers over the toolchain layer.
    pub extra_env: &'a BTreeMap<String, String>,
    /// Extra arguments appended to the step's primary command.
    pub extra_args: &'a [String],
}

impl GostrapConfig {
    /// Parse configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the text is not valid TOML or
    /// contains unknown keys.
    ///
    /// # Examples
    ///
    /// ```
    /// use gostrap::GostrapConfig;
    ///
    /// let config = GostrapConfig::from_toml_str("[env]\nuse_sandbox = false\n")
    ///     .expect("valid configuration");
    /// assert!(!config.env.use_sandbox);
    /// assert_eq!(config.env.version, "1.11.4");
    /// ```
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })
    }

    /// Load configuration from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] when the file is missing, and the
    /// read or parse errors otherwise.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_owned(),
            });
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        debug!("loaded configuration from {path}");
        Self::from_toml_str(&contents)
    }

    /// Load configuration from `path`, using defaults when it is missing.
    ///
    /// # Errors
    ///
    /// Returns read or parse errors for a file that exists.
    pub fn load_or_default(path: &Utf8Path) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::NotFound { .. }) => {
                debug!("no configuration at {path}; using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Return the overrides declared for `step`.
    ///
    /// Steps without configurable overrides get empty views.
    #[must_use]
    pub fn step_options(&self, step: BuildStep) -> StepOptions<'_> {
        match step {
            BuildStep::Dep => StepOptions {
                extra_env: &self.dep.envs,
                extra_args: &self.dep.cmd_args,
            },
            BuildStep::Test => StepOptions {
                extra_env: &self.test.envs,
                extra_args: &self.test.cmd_args,
            },
            BuildStep::Build => StepOptions {
                extra_env: &self.build.envs,
                extra_args: &self.build.cmd_args,
            },
            BuildStep::Env | BuildStep::Grpc | BuildStep::Swag | BuildStep::Clean => StepOptions {
                extra_env: &EMPTY_ENV,
                extra_args: &[],
            },
        }
    }

    /// Return the configured module path, or `fallback` when unset.
    #[must_use]
    pub fn module_path_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.workspace
            .module_path
            .as_deref()
            .map(str::trim)
            .filter(|path| !path.is_empty())
            .unwrap_or(fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn empty_document_uses_defaults() {
        let config = GostrapConfig::from_toml_str("").expect("empty config parses");
        assert_eq!(config, GostrapConfig::default());
        assert!(config.env.use_sandbox);
        assert_eq!(config.dep.proto_version, "3.6.1");
        assert_eq!(config.test.packages, vec!["./...".to_owned()]);
        assert_eq!(config.dep.tools.len(), DEFAULT_TOOLS.len());
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = GostrapConfig::from_toml_str("[env]\nsandbox = true\n")
            .expect_err("unknown key should be rejected");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[rstest]
    #[case::dep(BuildStep::Dep, "GOPROXY", "-v")]
    #[case::test(BuildStep::Test, "CGO_ENABLED", "-race")]
    #[case::build(BuildStep::Build, "GOOS", "-o")]
    fn step_options_come_from_matching_section(
        #[case] step: BuildStep,
        #[case] key: &str,
        #[case] arg: &str,
    ) {
        let config = GostrapConfig::from_toml_str(
            r#"
[dep]
cmd_args = ["-v"]
envs = { GOPROXY = "direct" }

[test]
cmd_args = ["-race"]
envs = { CGO_ENABLED = "1" }

[build]
cmd_args = ["-o"]
envs = { GOOS = "linux" }
"#,
        )
        .expect("valid configuration");

        let options = config.step_options(step);
        assert!(options.extra_env.contains_key(key));
        assert_eq!(options.extra_args, [arg.to_owned()]);
    }

    #[rstest]
    #[case::env(BuildStep::Env)]
    #[case::clean(BuildStep::Clean)]
    fn steps_without_overrides_return_empty_views(#[case] step: BuildStep) {
        let config = GostrapConfig::default();
        let options = config.step_options(step);
        assert!(options.extra_env.is_empty());
        assert!(options.extra_args.is_empty());
    }

    #[rstest]
    #[case::unset(None, "fallback")]
    #[case::blank(Some("  "), "fallback")]
    #[case::set(Some("example.com/app"), "example.com/app")]
    fn module_path_falls_back_when_blank(#[case] configured: Option<&str>, #[case] expected: &str) {
        let config = GostrapConfig {
            workspace: WorkspaceConfig {
                module_path: configured.map(str::to_owned),
                ..WorkspaceConfig::default()
            },
            ..GostrapConfig::default()
        };
        assert_eq!(config.module_path_or("fallback"), expected);
    }

    #[test]
    fn load_or_default_tolerates_missing_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = Utf8PathBuf::try_from(dir.path().join(CONFIG_FILE_NAME)).expect("utf-8 path");
        let config = GostrapConfig::load_or_default(&path).expect("defaults");
        assert_eq!(config, GostrapConfig::default());
        assert!(matches!(
            GostrapConfig::load(&path),
            Err(ConfigError::NotFound { .. })
        ));
    }
}
