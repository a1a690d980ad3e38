//! Tool archive download over HTTP.
//!
//! Provides a trait-based abstraction for fetching release archives, so
//! acquisition logic can be tested without network access. Requests are not
//! retried: a non-success status or a timeout is terminal for that download.

use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use log::info;

/// Overall timeout for a single archive download, body included.
///
/// Go release archives are over 100 MiB, so the bound is generous; it exists
/// to turn a stalled transfer into an error instead of a hang.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Timeout for establishing the connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Trait for downloading archive files.
///
/// # Examples
///
/// ```no_run
/// use gostrap_installer::artefact::download::{ArtefactDownloader, HttpDownloader};
/// use std::path::Path;
///
/// let downloader = HttpDownloader::default();
/// downloader.download(
///     "https://dl.google.com/go/go1.11.4.linux-amd64.tar.gz",
///     Path::new("/tmp/go1.11.4.linux-amd64.tar.gz"),
/// )?;
/// # Ok::<(), gostrap_installer::artefact::download::DownloadError>(())
/// ```
pub trait ArtefactDownloader: Send + Sync {
    /// Download `url` into the file at `dest`, replacing it.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Status`] for a non-success response,
    /// [`DownloadError::Timeout`] when the transfer exceeds its timeout, and
    /// transport or I/O errors otherwise.
    fn download(&self, url: &str, dest: &Path) -> Result<(), DownloadError>;
}

/// Errors arising from archive downloads.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// The server answered with a non-success status.
    #[error("HTTP {status} {message} from {url}")]
    Status {
        /// The URL that was requested.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Status reason phrase.
        message: String,
    },

    /// The transfer did not complete within the configured timeout.
    #[error("download of {url} timed out")]
    Timeout {
        /// The URL that was requested.
        url: String,
    },

    /// The request failed before a response was received.
    #[error("download failed for {url}: {reason}")]
    Transport {
        /// The URL that was requested.
        url: String,
        /// A human-readable description of the failure.
        reason: String,
    },

    /// I/O error writing the downloaded file.
    #[error("I/O error writing download: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    /// HTTP status code, when the failure was a status response.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Timeout { .. } | Self::Transport { .. } | Self::Io(_) => None,
        }
    }
}

/// HTTP downloader using a `ureq` agent with a global timeout.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    agent: ureq::Agent,
}

impl HttpDownloader {
    /// Build a downloader whose requests time out after `timeout`.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .timeout_connect(Some(CONNECT_TIMEOUT.min(timeout)))
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
        }
    }
}

impl Default for HttpDownloader {
    fn default() -> Self {
        Self::with_timeout(DOWNLOAD_TIMEOUT)
    }
}

impl ArtefactDownloader for HttpDownloader {
    fn download(&self, url: &str, dest: &Path) -> Result<(), DownloadError> {
        info!("downloading {url}");
        let response = self
            .agent
            .get(url)
            .call()
            .map_err(|e| map_ureq_error(url, &e))?;
        let mut file = std::fs::File::create(dest)?;
        std::io::copy(&mut response.into_body().as_reader(), &mut file).map_err(|e| {
            if e.kind() == ErrorKind::TimedOut {
                DownloadError::Timeout {
                    url: url.to_owned(),
                }
            } else {
                DownloadError::Io(e)
            }
        })?;
        Ok(())
    }
}

/// Map a ureq error to a [`DownloadError`].
fn map_ureq_error(url: &str, err: &ureq::Error) -> DownloadError {
    match err {
        ureq::Error::StatusCode(status) => DownloadError::Status {
            url: url.to_owned(),
            status: *status,
            message: reason_phrase(*status),
        },
        ureq::Error::Timeout(_) => DownloadError::Timeout {
            url: url.to_owned(),
        },
        other => DownloadError::Transport {
            url: url.to_owned(),
            reason: other.to_string(),
        },
    }
}

fn reason_phrase(status: u16) -> String {
    ureq::http::StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .unwrap_or("Unknown Status")
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::not_found(404, "Not Found")]
    #[case::server_error(500, "Internal Server Error")]
    fn status_codes_keep_code_and_reason(#[case] code: u16, #[case] reason: &str) {
        let mapped = map_ureq_error("https://example.test/go.tar.gz", &ureq::Error::StatusCode(code));
        assert_eq!(mapped.status(), Some(code));
        assert!(mapped.to_string().contains(reason));
    }

    #[test]
    fn timeouts_are_a_distinct_cause() {
        let err = ureq::Error::Timeout(ureq::Timeout::Global);
        let mapped = map_ureq_error("https://example.test/go.tar.gz", &err);
        assert!(matches!(mapped, DownloadError::Timeout { .. }));
        assert_eq!(mapped.status(), None);
    }

    #[test]
    fn other_failures_are_transport_errors() {
        let err = ureq::Error::HostNotFound;
        let mapped = map_ureq_error("https://example.test/go.tar.gz", &err);
        assert!(matches!(mapped, DownloadError::Transport { .. }));
    }
}
