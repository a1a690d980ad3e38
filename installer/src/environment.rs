//! Layered environment composition for tool invocations.
//!
//! Every subprocess receives an environment rebuilt from scratch as
//! `base → toolchain layer → step overrides → transient flags`, with later
//! layers winning key by key. Nothing is persisted between invocations.

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use camino::Utf8Path;
use log::debug;

use crate::error::{ProvisionError, Result};

/// Name of the Go module-mode toggle.
pub const MODULE_MODE_VAR: &str = "GO111MODULE";

/// A complete environment mapping for one subprocess.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionEnvironment {
    vars: BTreeMap<String, String>,
}

impl ExecutionEnvironment {
    /// Capture the current process environment.
    ///
    /// Variables whose name or value is not valid UTF-8 are skipped.
    #[must_use]
    pub fn from_process() -> Self {
        env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
            .collect()
    }

    /// Look up a variable.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Set a variable, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Iterate over variables in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Whether the environment is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    fn apply(&mut self, layer: &EnvLayer) {
        for (key, value) in &layer.vars {
            self.vars.insert(key.clone(), value.clone());
        }
    }

    /// Resolve `program` against this environment's `PATH`.
    ///
    /// The OS searches the parent's `PATH` when spawning, so programs meant to
    /// be found through a composed `PATH` must be resolved up front. Returns
    /// `program` unchanged when it already contains a path separator or no
    /// candidate exists.
    #[must_use]
    pub fn resolve_program(&self, program: &str) -> String {
        if program.contains('/') {
            return program.to_owned();
        }
        self.get("PATH")
            .into_iter()
            .flat_map(env::split_paths)
            .map(|dir| dir.join(program))
            .find(|candidate| candidate.is_file())
            .and_then(|candidate| candidate.to_str().map(str::to_owned))
            .unwrap_or_else(|| program.to_owned())
    }
}

impl FromIterator<(String, String)> for ExecutionEnvironment {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().collect(),
        }
    }
}

/// A set of variables contributed by one composition layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvLayer {
    vars: BTreeMap<String, String>,
}

impl EnvLayer {
    /// An empty layer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a variable, builder style.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Look up a variable in this layer.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }
}

impl From<&BTreeMap<String, String>> for EnvLayer {
    fn from(vars: &BTreeMap<String, String>) -> Self {
        Self { vars: vars.clone() }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnvLayer {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Whether dependency resolution uses `go.mod` or the legacy GOPATH layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleMode {
    /// Manifest-based resolution (`GO111MODULE=on`).
    On,
    /// Legacy global workspace (`GO111MODULE=off`).
    Off,
}

impl ModuleMode {
    /// Value assigned to [`MODULE_MODE_VAR`].
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
        }
    }
}

/// Per-call flags applied after every declared layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransientFlags {
    /// Module-mode toggle for this call only.
    pub module_mode: Option<ModuleMode>,
}

impl TransientFlags {
    /// Flags that only toggle module mode.
    #[must_use]
    pub const fn module_mode(mode: ModuleMode) -> Self {
        Self {
            module_mode: Some(mode),
        }
    }
}

/// Builds the environment for a single tool invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvironmentComposer;

impl EnvironmentComposer {
    /// Compose `base`, then `toolchain`, then `step_overrides`.
    ///
    /// # Examples
    ///
    /// ```
    /// use gostrap_installer::environment::{EnvLayer, EnvironmentComposer, ExecutionEnvironment};
    ///
    /// let base: ExecutionEnvironment = [("PATH".to_owned(), "/usr/bin".to_owned())]
    ///     .into_iter()
    ///     .collect();
    /// let toolchain = EnvLayer::new().with("PATH", "/tool/bin:/usr/bin");
    /// let step = EnvLayer::new().with("GOOS", "windows");
    ///
    /// let env = EnvironmentComposer::compose(&base, &toolchain, &step);
    /// assert_eq!(env.get("PATH"), Some("/tool/bin:/usr/bin"));
    /// assert_eq!(env.get("GOOS"), Some("windows"));
    /// ```
    #[must_use]
    pub fn compose(
        base: &ExecutionEnvironment,
        toolchain: &EnvLayer,
        step_overrides: &EnvLayer,
    ) -> ExecutionEnvironment {
        Self::compose_with(base, toolchain, step_overrides, TransientFlags::default())
    }

    /// Compose every layer and finally the transient `flags`.
    #[must_use]
    pub fn compose_with(
        base: &ExecutionEnvironment,
        toolchain: &EnvLayer,
        step_overrides: &EnvLayer,
        flags: TransientFlags,
    ) -> ExecutionEnvironment {
        let mut composed = base.clone();
        composed.apply(toolchain);
        composed.apply(step_overrides);
        if let Some(mode) = flags.module_mode {
            composed.set(MODULE_MODE_VAR, mode.as_str());
        }
        debug!(
            "composed environment: {:?}",
            composed
                .iter()
                .filter(|(key, _)| is_toolchain_key(key))
                .collect::<Vec<_>>()
        );
        composed
    }
}

fn is_toolchain_key(key: &str) -> bool {
    key == "PATH" || key.starts_with("GO")
}

/// Prepend `dirs` to an existing search path.
///
/// # Errors
///
/// Returns [`ProvisionError::Io`] when a directory contains the platform's
/// path separator.
///
/// # Examples
///
/// ```
/// use camino::Utf8Path;
/// use gostrap_installer::environment::prepend_search_path;
///
/// let path = prepend_search_path(&[Utf8Path::new("/go/bin")], "/usr/bin:/bin")?;
/// assert_eq!(path, "/go/bin:/usr/bin:/bin");
/// # Ok::<(), gostrap_installer::error::ProvisionError>(())
/// ```
pub fn prepend_search_path(dirs: &[&Utf8Path], existing: &str) -> Result<String> {
    let entries: Vec<PathBuf> = dirs
        .iter()
        .map(|dir| dir.as_std_path().to_path_buf())
        .chain(env::split_paths(Path::new(existing).as_os_str()))
        .collect();
    let joined = env::join_paths(entries).map_err(|e| {
        ProvisionError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
    })?;
    Ok(joined.to_string_lossy().into_owned())
}
