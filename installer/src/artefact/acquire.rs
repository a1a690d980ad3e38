//! Idempotent tool acquisition: probe, download, verify, extract.
//!
//! A tool whose local probe already reports the required version is left
//! alone and no network request is made. Otherwise the archive for the
//! resolved platform is downloaded into the cache directory and extracted.
//! Failures are terminal; nothing is retried.

use std::io::Read;

use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, info, warn};
use regex::Regex;
use sha2::{Digest, Sha256};

use super::download::ArtefactDownloader;
use super::extraction::ArchiveExtractor;
use super::spec::{ProbeSpec, ToolSpec};
use crate::error::{ProvisionError, Result};
use crate::exec::{CommandExecutor, Invocation};
use crate::platform::{HostFacts, PlatformArch};

/// Outcome of a successful [`ArtifactAcquirer::acquire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquired {
    /// The local probe matched and nothing was downloaded.
    pub from_cache: bool,
    /// Downloaded archive, when a download happened.
    pub archive: Option<Utf8PathBuf>,
    /// Directory holding the extracted tool.
    pub destination: Utf8PathBuf,
}

/// Downloads and extracts tools described by [`ToolSpec`]s.
///
/// Collaborators are borrowed trait objects so one acquirer can be shared by
/// concurrently running provisioning jobs.
pub struct ArtifactAcquirer<'a> {
    downloader: &'a dyn ArtefactDownloader,
    extractor: &'a dyn ArchiveExtractor,
    executor: &'a dyn CommandExecutor,
    host: HostFacts,
    cache_dir: Utf8PathBuf,
}

impl<'a> ArtifactAcquirer<'a> {
    /// Create an acquirer that caches archives under `cache_dir`.
    #[must_use]
    pub fn new(
        downloader: &'a dyn ArtefactDownloader,
        extractor: &'a dyn ArchiveExtractor,
        executor: &'a dyn CommandExecutor,
        host: HostFacts,
        cache_dir: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            downloader,
            extractor,
            executor,
            host,
            cache_dir: cache_dir.into(),
        }
    }

    /// Make `spec`'s tool available in its destination directory.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::UnsupportedPlatform`] for an unsupported
    /// host, [`ProvisionError::Download`] when the download fails (the partial
    /// archive is removed), [`ProvisionError::ChecksumMismatch`] for a pinned
    /// digest that does not match, and [`ProvisionError::Extract`] when the
    /// archive cannot be unpacked.
    pub fn acquire(&self, spec: &ToolSpec) -> Result<Acquired> {
        if let Some(probe) = &spec.probe {
            if self.probe_satisfied(probe) {
                info!("{} found locally ({})", spec.name, spec.version);
                return Ok(Acquired {
                    from_cache: true,
                    archive: None,
                    destination: spec.destination.clone(),
                });
            }
        }

        let platform = PlatformArch::resolve(&self.host)?;
        let url = spec.download_url(&platform);

        std::fs::create_dir_all(&self.cache_dir)?;
        std::fs::create_dir_all(&spec.destination)?;

        if let Some(stale) = &spec.replaces {
            if stale.exists() {
                info!("deleting previously downloaded {} files in {stale}", spec.name);
                std::fs::remove_dir_all(stale)?;
            }
        }

        let archive = self.cache_dir.join(spec.archive_file_name(&url));
        info!(
            "downloading {} from {url} because it was not found or did not match locally",
            spec.name
        );
        if let Err(source) = self.downloader.download(&url, archive.as_std_path()) {
            discard(&archive);
            return Err(ProvisionError::Download {
                tool: spec.name.clone(),
                source,
            });
        }

        if let Some(expected) = &spec.sha256 {
            verify_digest(&spec.name, &archive, expected)?;
        }

        self.extractor
            .extract(
                spec.archive,
                archive.as_std_path(),
                spec.destination.as_std_path(),
            )
            .map_err(|source| ProvisionError::Extract {
                tool: spec.name.clone(),
                source,
            })?;

        Ok(Acquired {
            from_cache: false,
            archive: Some(archive),
            destination: spec.destination.clone(),
        })
    }

    fn probe_satisfied(&self, probe: &ProbeSpec) -> bool {
        if !probe.binary.is_file() {
            return false;
        }
        let invocation = Invocation::new(probe.binary.as_str())
            .args(probe.args.iter().cloned())
            .env(probe.env.clone());
        match self.executor.run(&invocation) {
            Ok(output) if output.status.success() => {
                let text = String::from_utf8_lossy(&output.stdout);
                let matched = reports_version(&text, &probe.expected);
                if !matched {
                    info!(
                        "{} found locally but does not match `{}`: {}",
                        probe.binary,
                        probe.expected,
                        text.trim()
                    );
                }
                matched
            }
            Ok(output) => {
                debug!("probe {} exited with {}", probe.binary, output.status);
                false
            }
            Err(err) => {
                debug!("probe {} failed: {err}", probe.binary);
                false
            }
        }
    }
}

/// Whether `output` reports exactly the version token `expected`.
///
/// The token must not be immediately followed by further version digits, so
/// `go1.11` does not match a toolchain reporting `go1.11.4`.
///
/// # Examples
///
/// ```
/// use gostrap_installer::artefact::acquire::reports_version;
///
/// assert!(reports_version("libprotoc 3.6.1\n", "libprotoc 3.6.1"));
/// assert!(!reports_version("go version go1.11.4 linux/amd64", "go version go1.11"));
/// ```
#[must_use]
pub fn reports_version(output: &str, expected: &str) -> bool {
    let pattern = format!(
        r"{}(?:$|[^0-9.]|\.(?:$|[^0-9]))",
        regex::escape(expected)
    );
    match Regex::new(&pattern) {
        Ok(re) => re.is_match(output),
        Err(err) => {
            warn!("could not build version probe pattern: {err}");
            false
        }
    }
}

/// Compute the lowercase hex SHA-256 digest of a file.
///
/// # Errors
///
/// Returns any I/O error from reading the file.
pub fn compute_sha256(path: &Utf8Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn verify_digest(tool: &str, archive: &Utf8Path, expected: &str) -> Result<()> {
    let actual = compute_sha256(archive)?;
    if actual.eq_ignore_ascii_case(expected.trim()) {
        return Ok(());
    }
    discard(archive);
    Err(ProvisionError::ChecksumMismatch {
        tool: tool.to_owned(),
        expected: expected.to_owned(),
        actual,
    })
}

fn discard(path: &Utf8Path) {
    if path.exists() {
        if let Err(err) = std::fs::remove_file(path) {
            warn!("could not remove partial download {path}: {err}");
        }
    }
}
