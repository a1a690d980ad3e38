//! Archive extraction for downloaded tool releases.
//!
//! Supports `.zip` (protoc) and `.tar.gz` (Go) archives. Every entry path is
//! validated against traversal before anything is written, and entries are
//! unpacked into a staging directory inside the destination. Top-level
//! entries are moved into place only once the whole archive has been read,
//! so a failed extraction leaves the destination untouched.

use std::fs;
use std::io;
use std::path::{Component, Path};

use log::{debug, info};

/// Archive container formats understood by the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    /// A zip archive.
    Zip,
    /// A gzip-compressed tarball.
    TarGz,
}

impl ArchiveKind {
    /// Conventional file extension, without a leading dot.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::TarGz => "tar.gz",
        }
    }
}

/// Trait for extracting archives, enabling test doubles.
pub trait ArchiveExtractor: Send + Sync {
    /// Extract the `kind` archive at `archive_path` into `dest_dir`.
    ///
    /// Returns the names of the top-level entries placed in `dest_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractionError::PathTraversal`] if any entry attempts to
    /// escape the destination, [`ExtractionError::EmptyArchive`] if no entries
    /// are found, and I/O or zip errors otherwise.
    fn extract(
        &self,
        kind: ArchiveKind,
        archive_path: &Path,
        dest_dir: &Path,
    ) -> Result<Vec<String>, ExtractionError>;
}

/// Errors arising from archive extraction.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    /// I/O error during extraction.
    #[error("extraction I/O error: {0}")]
    Io(#[from] io::Error),

    /// A path in the archive attempts to traverse outside the destination.
    #[error("path traversal detected: {path}")]
    PathTraversal {
        /// The offending path from the archive entry.
        path: String,
    },

    /// The archive contains no entries.
    #[error("archive contains no entries")]
    EmptyArchive,

    /// The zip container is malformed.
    #[error("invalid zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Default extractor backed by `zip`, `flate2` and `tar`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultExtractor;

impl ArchiveExtractor for DefaultExtractor {
    fn extract(
        &self,
        kind: ArchiveKind,
        archive_path: &Path,
        dest_dir: &Path,
    ) -> Result<Vec<String>, ExtractionError> {
        info!(
            "extracting {} into {}",
            archive_path.display(),
            dest_dir.display()
        );
        fs::create_dir_all(dest_dir)?;
        let staging = tempfile::Builder::new()
            .prefix(".gostrap-extract-")
            .tempdir_in(dest_dir)?;

        let entries = match kind {
            ArchiveKind::Zip => unpack_zip(archive_path, staging.path())?,
            ArchiveKind::TarGz => unpack_tar_gz(archive_path, staging.path())?,
        };
        if entries == 0 {
            return Err(ExtractionError::EmptyArchive);
        }
        debug!("unpacked {entries} entries from {}", archive_path.display());

        promote(staging.path(), dest_dir)
    }
}

fn unpack_tar_gz(archive_path: &Path, staging: &Path) -> Result<usize, ExtractionError> {
    let file = fs::File::open(archive_path)?;
    let decoder = flate2::read::GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);
    let mut count = 0;

    for entry_result in archive.entries()? {
        let mut entry = entry_result?;
        let entry_path = entry.path()?.into_owned();

        validate_entry_path(&entry_path)?;

        let dest_path = staging.join(&entry_path);
        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent)?;
        }

        entry.unpack(&dest_path)?;
        count += 1;
    }

    Ok(count)
}

fn unpack_zip(archive_path: &Path, staging: &Path) -> Result<usize, ExtractionError> {
    let file = fs::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let entry_path = Path::new(entry.name()).to_path_buf();

        validate_entry_path(&entry_path)?;

        let dest_path = staging.join(&entry_path);
        if entry.is_dir() {
            fs::create_dir_all(&dest_path)?;
            continue;
        }
        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut output = fs::File::create(&dest_path)?;
        io::copy(&mut entry, &mut output)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&dest_path, fs::Permissions::from_mode(mode))?;
        }
    }

    Ok(archive.len())
}

/// Move every top-level entry of `staging` into `dest_dir`, replacing
/// same-named entries.
fn promote(staging: &Path, dest_dir: &Path) -> Result<Vec<String>, ExtractionError> {
    let mut promoted = Vec::new();
    for entry in fs::read_dir(staging)? {
        let entry = entry?;
        let target = dest_dir.join(entry.file_name());
        remove_existing(&target)?;
        fs::rename(entry.path(), &target)?;
        promoted.push(entry.file_name().to_string_lossy().into_owned());
    }
    promoted.sort();
    Ok(promoted)
}

fn remove_existing(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Validate that an entry path does not escape the destination directory
/// via `..` components or absolute paths.
fn validate_entry_path(path: &Path) -> Result<(), ExtractionError> {
    let escapes = path.is_absolute()
        || path
            .components()
            .any(|component| matches!(component, Component::ParentDir | Component::RootDir));
    if escapes {
        return Err(ExtractionError::PathTraversal {
            path: path.display().to_string(),
        });
    }
    Ok(())
}
