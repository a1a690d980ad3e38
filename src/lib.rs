//! Declarative configuration surface for gostrap.
//!
//! gostrap provisions a Go toolchain and its auxiliary tools, then runs the
//! project's build steps in dependency order. This crate holds the parts that
//! describe a project rather than act on it: the [`BuildStep`] vocabulary and
//! the `gostrap.toml` schema. The `gostrap-installer` crate consumes both.

pub mod config;
pub mod step;

pub use config::{
    BuildConfig, CONFIG_FILE_NAME, ConfigError, DEFAULT_TOOLS, DepConfig, DependenciesConfig,
    EnvConfig, GostrapConfig, GrpcConfig, StepOptions, TestConfig, WorkspaceConfig,
};
pub use step::{BuildStep, UnknownStep};
