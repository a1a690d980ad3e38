//! Descriptions of provisionable tools.

use camino::Utf8PathBuf;

use super::extraction::ArchiveKind;
use crate::environment::ExecutionEnvironment;
use crate::error::Result;
use crate::platform::{NamingRules, PlatformArch};
use crate::version::{ToolVersion, VersionGate};

/// A local check that a tool is already installed at the right version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSpec {
    /// Executable to run; the probe is skipped when it does not exist.
    pub binary: Utf8PathBuf,
    /// Arguments that make the tool print its version.
    pub args: Vec<String>,
    /// Token the output must contain, e.g. `go version go1.11.4`.
    pub expected: String,
    /// Environment for the probe call.
    pub env: ExecutionEnvironment,
}

/// A provisionable tool, built once per invocation from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSpec {
    /// Logical name used in logs and errors.
    pub name: String,
    /// Required version.
    pub version: String,
    /// Lowest supported version.
    pub min_version: String,
    /// URL with `{version}`, `{os}` and `{arch}` placeholders.
    pub url_template: String,
    /// Tool-specific platform renames.
    pub naming: NamingRules,
    /// Local probe that makes acquisition idempotent.
    pub probe: Option<ProbeSpec>,
    /// Directory the archive is extracted into.
    pub destination: Utf8PathBuf,
    /// Archive container format.
    pub archive: ArchiveKind,
    /// Stale installation removed before a fresh download.
    pub replaces: Option<Utf8PathBuf>,
    /// Expected lowercase hex SHA-256 of the archive, when pinned.
    pub sha256: Option<String>,
}

impl ToolSpec {
    /// Gate the required version against the minimum.
    ///
    /// # Errors
    ///
    /// Propagates [`VersionGate::check`] failures.
    pub fn gate(&self) -> Result<ToolVersion> {
        VersionGate::check(&self.name, &self.version, &self.min_version)
    }

    /// Cache entry name for the archive downloaded from `url`.
    ///
    /// The last path segment of the URL, ignoring any query or fragment.
    /// A URL without a usable segment falls back to
    /// `<name>-<version>.<extension>`.
    #[must_use]
    pub fn archive_file_name(&self, url: &str) -> String {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        match path.rsplit('/').next() {
            Some(segment) if !matches!(segment, "" | "." | "..") => segment.to_owned(),
            _ => format!("{}-{}.{}", self.name, self.version, self.archive.extension()),
        }
    }

    /// Expand the URL template for `platform`.
    ///
    /// The platform passed in is canonical; this spec's naming rules are
    /// applied here.
    ///
    /// # Examples
    ///
    /// ```
    /// use camino::Utf8PathBuf;
    /// use gostrap_installer::artefact::extraction::ArchiveKind;
    /// use gostrap_installer::artefact::spec::ToolSpec;
    /// use gostrap_installer::platform::{HostFacts, PROTOC_NAMING, PlatformArch};
    ///
    /// let spec = ToolSpec {
    ///     name: "protoc".to_owned(),
    ///     version: "3.6.1".to_owned(),
    ///     min_version: "3.6.1".to_owned(),
    ///     url_template: "https://example.test/v{version}/protoc-{version}-{os}-{arch}.zip".to_owned(),
    ///     naming: PROTOC_NAMING,
    ///     probe: None,
    ///     destination: Utf8PathBuf::from("proto"),
    ///     archive: ArchiveKind::Zip,
    ///     replaces: None,
    ///     sha256: None,
    /// };
    /// let platform = PlatformArch::resolve(&HostFacts::new("macos", "x86_64"))?;
    /// assert_eq!(
    ///     spec.download_url(&platform),
    ///     "https://example.test/v3.6.1/protoc-3.6.1-osx-x86_64.zip"
    /// );
    /// # Ok::<(), gostrap_installer::error::ProvisionError>(())
    /// ```
    #[must_use]
    pub fn download_url(&self, platform: &PlatformArch) -> String {
        let renamed = platform.renamed(&self.naming);
        self.url_template
            .replace("{version}", &self.version)
            .replace("{os}", &renamed.os)
            .replace("{arch}", &renamed.arch)
    }
}
