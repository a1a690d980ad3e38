//! The Go toolchain: version gate, sandbox or system selection, and the
//! environment layer every later subprocess runs under.

use std::sync::OnceLock;

use camino::{Utf8Path, Utf8PathBuf};
use gostrap::EnvConfig;
use log::{debug, info, warn};

use crate::artefact::acquire::{ArtifactAcquirer, reports_version};
use crate::artefact::extraction::ArchiveKind;
use crate::artefact::spec::{ProbeSpec, ToolSpec};
use crate::environment::{EnvLayer, ExecutionEnvironment, prepend_search_path};
use crate::error::Result;
use crate::exec::{CommandExecutor, Invocation};
use crate::layout::PreparedLayout;
use crate::platform::GO_NAMING;
use crate::version::ToolVersion;

/// Release archive location for Go distributions.
pub const GO_URL_TEMPLATE: &str = "https://dl.google.com/go/go{version}.{os}-{arch}.tar.gz";

const GO_TOOL_NAME: &str = "Go";

/// Where the active toolchain came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolchainSource {
    /// The copy vendored under the workspace `env/` directory.
    Sandbox,
    /// A pre-installed toolchain found on `PATH`.
    System,
}

/// Proof that a usable toolchain exists, with the paths needed to use it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainReady {
    source: ToolchainSource,
    installed: bool,
    version: ToolVersion,
    root: Utf8PathBuf,
    go_binary: Utf8PathBuf,
    gopath: Utf8PathBuf,
}

impl ToolchainReady {
    /// Whether the sandbox or the system toolchain is active.
    #[must_use]
    pub const fn source(&self) -> ToolchainSource {
        self.source
    }

    /// Whether this invocation downloaded the toolchain.
    #[must_use]
    pub const fn installed(&self) -> bool {
        self.installed
    }

    /// The gated toolchain version.
    #[must_use]
    pub fn version(&self) -> &ToolVersion {
        &self.version
    }

    /// `GOROOT`.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// The `go` executable.
    #[must_use]
    pub fn go_binary(&self) -> &Utf8Path {
        &self.go_binary
    }

    /// `GOPATH`.
    #[must_use]
    pub fn gopath(&self) -> &Utf8Path {
        &self.gopath
    }

    /// `GOBIN`, where `go get` and `go install` place binaries.
    #[must_use]
    pub fn gobin(&self) -> Utf8PathBuf {
        self.gopath.join("bin")
    }

    /// The toolchain environment layer on top of `base`.
    ///
    /// Sets `GOROOT`, `GOPATH` and `GOBIN`. When the root exists and `base`
    /// has a `PATH`, the toolchain and workspace binary directories are
    /// prepended so they shadow system copies.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ProvisionError::Io`] when a directory cannot
    /// be placed on the search path.
    pub fn layer(&self, base: &ExecutionEnvironment) -> Result<EnvLayer> {
        let gobin = self.gobin();
        let mut layer = EnvLayer::new()
            .with("GOROOT", self.root.as_str())
            .with("GOPATH", self.gopath.as_str())
            .with("GOBIN", gobin.as_str());

        if let Some(existing) = base.get("PATH") {
            if self.root.is_dir() {
                let root_bin = self.root.join("bin");
                let path = prepend_search_path(&[&root_bin, &gobin], existing)?;
                layer = layer.with("PATH", path);
            }
        }
        Ok(layer)
    }
}

/// Resolves and, when needed, provisions the Go toolchain.
#[derive(Debug)]
pub struct GoToolchain {
    env_dir: Utf8PathBuf,
    version: String,
    min_version: String,
    use_sandbox: bool,
    sha256: Option<String>,
    system_root: OnceLock<Utf8PathBuf>,
}

impl GoToolchain {
    /// Toolchain for the prepared workspace, configured by `[env]`.
    #[must_use]
    pub fn new(layout: &PreparedLayout, config: &EnvConfig) -> Self {
        Self {
            env_dir: layout.env(),
            version: config.version.clone(),
            min_version: config.min_version.clone(),
            use_sandbox: config.use_sandbox,
            sha256: config.sha256.clone(),
            system_root: OnceLock::new(),
        }
    }

    /// Root of the vendored copy.
    #[must_use]
    pub fn sandbox_root(&self) -> Utf8PathBuf {
        self.env_dir.join("go")
    }

    /// `go` inside the vendored copy.
    #[must_use]
    pub fn sandbox_binary(&self) -> Utf8PathBuf {
        self.sandbox_root().join("bin").join("go")
    }

    /// `GOPATH`, always inside the workspace.
    #[must_use]
    pub fn gopath(&self) -> Utf8PathBuf {
        self.sandbox_root().join("gopath")
    }

    /// Output a matching `go version` must contain.
    #[must_use]
    pub fn expected_version_output(&self) -> String {
        format!("go version go{}", self.version)
    }

    /// Acquisition description of the vendored copy.
    #[must_use]
    pub fn tool_spec(&self, base: &ExecutionEnvironment) -> ToolSpec {
        ToolSpec {
            name: GO_TOOL_NAME.to_owned(),
            version: self.version.clone(),
            min_version: self.min_version.clone(),
            url_template: GO_URL_TEMPLATE.to_owned(),
            naming: GO_NAMING,
            probe: Some(ProbeSpec {
                binary: self.sandbox_binary(),
                args: vec!["version".to_owned()],
                expected: self.expected_version_output(),
                env: base.clone(),
            }),
            destination: self.env_dir.clone(),
            archive: ArchiveKind::TarGz,
            replaces: Some(self.sandbox_root()),
            sha256: self.sha256.clone(),
        }
    }

    /// Gate the configured version and make a matching toolchain available.
    ///
    /// With `use_sandbox = false` a system toolchain reporting the required
    /// version is used as is; otherwise, or when the system toolchain is
    /// missing or mismatched, the vendored copy is probed and downloaded if
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ProvisionError::VersionTooLow`] or
    /// [`crate::error::ProvisionError::InvalidVersion`] before any other work,
    /// and acquisition or subprocess errors afterwards.
    pub fn ensure(
        &self,
        acquirer: &ArtifactAcquirer<'_>,
        executor: &dyn CommandExecutor,
        base: &ExecutionEnvironment,
    ) -> Result<ToolchainReady> {
        let spec = self.tool_spec(base);
        let version = spec.gate()?;

        if !self.use_sandbox {
            if let Some(ready) = self.system_toolchain(executor, base, &version)? {
                return Ok(ready);
            }
        }

        let acquired = acquirer.acquire(&spec)?;
        let gopath = self.gopath();
        std::fs::create_dir_all(&gopath)?;
        if acquired.from_cache {
            info!("using vendored Go {version} in {}", self.sandbox_root());
        } else {
            info!("installed Go {version} into {}", self.sandbox_root());
        }

        Ok(ToolchainReady {
            source: ToolchainSource::Sandbox,
            installed: !acquired.from_cache,
            version,
            root: self.sandbox_root(),
            go_binary: self.sandbox_binary(),
            gopath,
        })
    }

    fn system_toolchain(
        &self,
        executor: &dyn CommandExecutor,
        base: &ExecutionEnvironment,
        version: &ToolVersion,
    ) -> Result<Option<ToolchainReady>> {
        let program = base.resolve_program("go");
        let probe = Invocation::new(program.as_str())
            .arg("version")
            .env(base.clone());
        let reported = match executor.run(&probe) {
            Ok(output) if output.status.success() => {
                String::from_utf8_lossy(&output.stdout).into_owned()
            }
            Ok(output) => {
                warn!("system go exited with {}; using the vendored toolchain", output.status);
                return Ok(None);
            }
            Err(err) => {
                warn!("system go is unavailable ({err}); using the vendored toolchain");
                return Ok(None);
            }
        };
        if !reports_version(&reported, &self.expected_version_output()) {
            warn!(
                "system go reports `{}`, expected Go {version}; using the vendored toolchain",
                reported.trim()
            );
            return Ok(None);
        }

        let root = self.system_root(executor, &program, base)?;
        let gopath = self.gopath();
        std::fs::create_dir_all(&gopath)?;
        info!("using system Go {version} in {root}");
        Ok(Some(ToolchainReady {
            source: ToolchainSource::System,
            installed: false,
            version: version.clone(),
            go_binary: Utf8PathBuf::from(program),
            root,
            gopath,
        }))
    }

    /// `go env GOROOT` of the system toolchain, asked once per invocation.
    fn system_root(
        &self,
        executor: &dyn CommandExecutor,
        program: &str,
        base: &ExecutionEnvironment,
    ) -> Result<Utf8PathBuf> {
        if let Some(root) = self.system_root.get() {
            return Ok(root.clone());
        }
        let invocation = Invocation::new(program)
            .args(["env", "GOROOT"])
            .env(base.clone());
        let output = executor.run_checked(&invocation)?;
        let root = Utf8PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
        debug!("system GOROOT is {root}");
        Ok(self.system_root.get_or_init(|| root).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artefact::extraction::DefaultExtractor;
    use crate::error::ProvisionError;
    use crate::layout::WorkspaceLayout;
    use crate::platform::HostFacts;
    use crate::test_utils::{ExpectedCall, StubDownloader, StubExecutor, output_with_stdout};
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        prepared: PreparedLayout,
    }

    #[fixture]
    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("temp dir");
        let project = Utf8PathBuf::try_from(dir.path().to_path_buf()).expect("utf-8 path");
        let prepared = WorkspaceLayout::new(project, Utf8Path::new(".gostrap"))
            .prepare()
            .expect("prepare");
        Fixture {
            _dir: dir,
            prepared,
        }
    }

    fn env_config(use_sandbox: bool, version: &str) -> EnvConfig {
        EnvConfig {
            use_sandbox,
            version: version.to_owned(),
            min_version: "1.11.4".to_owned(),
            sha256: None,
        }
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

    fn ensure_with(
        toolchain: &GoToolchain,
        fixture: &Fixture,
        downloader: &StubDownloader,
        executor: &StubExecutor,
    ) -> Result<ToolchainReady> {
        let acquirer = ArtifactAcquirer::new(
            downloader,
            &DefaultExtractor,
            executor,
            HostFacts::new("linux", "x86_64"),
            fixture.prepared.cache(),
        );
        toolchain.ensure(&acquirer, executor, &ExecutionEnvironment::default())
    }

    #[rstest]
    fn version_below_minimum_fails_before_any_work(fixture: Fixture) {
        let toolchain = GoToolchain::new(&fixture.prepared, &env_config(true, "1.11"));
        let downloader = StubDownloader::serving(Vec::new());
        let executor = StubExecutor::new(Vec::new());

        let err = ensure_with(&toolchain, &fixture, &downloader, &executor).expect_err("too low");

        assert!(matches!(err, ProvisionError::VersionTooLow { .. }));
        assert_eq!(downloader.calls(), 0);
        assert!(executor.invocations().is_empty());
    }

    #[rstest]
    fn sandbox_download_installs_toolchain_and_gopath(fixture: Fixture) {
        let toolchain = GoToolchain::new(&fixture.prepared, &env_config(true, "1.11.4"));
        let downloader = StubDownloader::serving(go_archive());
        let executor = StubExecutor::new(Vec::new());

        let ready = ensure_with(&toolchain, &fixture, &downloader, &executor).expect("ensure");

        assert_eq!(ready.source(), ToolchainSource::Sandbox);
        assert!(ready.installed());
        assert_eq!(
            downloader.urls(),
            vec!["https://dl.google.com/go/go1.11.4.linux-amd64.tar.gz".to_owned()]
        );
        assert!(ready.go_binary().is_file());
        assert!(ready.gopath().is_dir());
    }

    #[rstest]
    fn matching_system_toolchain_is_used_and_root_memoised(fixture: Fixture) {
        let toolchain = GoToolchain::new(&fixture.prepared, &env_config(false, "1.11.4"));
        let downloader = StubDownloader::serving(Vec::new());
        let version = || Ok(output_with_stdout(0, "go version go1.11.4 linux/amd64\n"));
        let executor = StubExecutor::new(vec![
            ExpectedCall::new("go", &["version"], version()),
            ExpectedCall::new("go", &["env", "GOROOT"], Ok(output_with_stdout(0, "/usr/local/go\n"))),
            ExpectedCall::new("go", &["version"], version()),
        ]);

        let first = ensure_with(&toolchain, &fixture, &downloader, &executor).expect("first");
        let second = ensure_with(&toolchain, &fixture, &downloader, &executor).expect("second");

        assert_eq!(first.source(), ToolchainSource::System);
        assert_eq!(first.root(), "/usr/local/go");
        assert_eq!(first, second);
        assert_eq!(downloader.calls(), 0);
        executor.assert_finished();
    }

    #[rstest]
    fn mismatched_system_toolchain_falls_back_to_sandbox(fixture: Fixture) {
        let toolchain = GoToolchain::new(&fixture.prepared, &env_config(false, "1.11.4"));
        let downloader = StubDownloader::serving(go_archive());
        let executor = StubExecutor::new(vec![ExpectedCall::new(
            "go",
            &["version"],
            Ok(output_with_stdout(0, "go version go1.10.8 linux/amd64\n")),
        )]);

        let ready = ensure_with(&toolchain, &fixture, &downloader, &executor).expect("ensure");

        assert_eq!(ready.source(), ToolchainSource::Sandbox);
        assert_eq!(downloader.calls(), 1);
    }

    #[rstest]
    fn pinned_digest_mismatch_rejects_the_archive(fixture: Fixture) {
        let config = EnvConfig {
            sha256: Some("0".repeat(64)),
            ..env_config(true, "1.11.4")
        };
        let toolchain = GoToolchain::new(&fixture.prepared, &config);
        let downloader = StubDownloader::serving(go_archive());
        let executor = StubExecutor::new(Vec::new());

        let err = ensure_with(&toolchain, &fixture, &downloader, &executor).expect_err("mismatch");

        assert!(matches!(err, ProvisionError::ChecksumMismatch { ref tool, .. } if tool == "Go"));
        assert!(!toolchain.sandbox_binary().exists());
    }

    #[rstest]
    fn pinned_digest_match_installs_the_toolchain(fixture: Fixture) {
        use sha2::{Digest, Sha256};

        let archive = go_archive();
        let config = EnvConfig {
            sha256: Some(format!("{:X}", Sha256::digest(&archive))),
            ..env_config(true, "1.11.4")
        };
        let toolchain = GoToolchain::new(&fixture.prepared, &config);
        let downloader = StubDownloader::serving(archive);
        let executor = StubExecutor::new(Vec::new());

        let ready = ensure_with(&toolchain, &fixture, &downloader, &executor).expect("ensure");

        assert!(ready.go_binary().is_file());
    }

    #[rstest]
    fn layer_prepends_binaries_when_root_exists(fixture: Fixture) {
        let toolchain = GoToolchain::new(&fixture.prepared, &env_config(true, "1.11.4"));
        let downloader = StubDownloader::serving(go_archive());
        let executor = StubExecutor::new(Vec::new());
        let ready = ensure_with(&toolchain, &fixture, &downloader, &executor).expect("ensure");

        let mut base = ExecutionEnvironment::default();
        base.set("PATH", "/usr/bin");
        let layer = ready.layer(&base).expect("layer");

        let root = toolchain.sandbox_root();
        assert_eq!(layer.get("GOROOT"), Some(root.as_str()));
        assert_eq!(layer.get("GOBIN"), Some(ready.gobin().as_str()));
        assert_eq!(
            layer.get("PATH").map(str::to_owned),
            Some(format!("{root}/bin:{}:/usr/bin", ready.gobin()))
        );

        let without_path = ready
            .layer(&ExecutionEnvironment::default())
            .expect("layer");
        assert_eq!(without_path.get("PATH"), None);
    }
}
