//! Tool version parsing and minimum-version gating.
//!
//! Versions are dotted numeric strings with two or three components. A
//! two-component version is normalised by appending `.0` before comparison,
//! so `1.11` compares equal to `1.11.0` and below `1.11.4`.

use std::fmt;

use log::debug;
use semver::Version;

use crate::error::{ProvisionError, Result};

/// A normalised `major.minor.patch` tool version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ToolVersion(Version);

impl ToolVersion {
    /// Parse a two- or three-component version string for tool `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InvalidVersion`] when the string has the
    /// wrong number of components or a component is not a decimal integer.
    ///
    /// # Examples
    ///
    /// ```
    /// use gostrap_installer::version::ToolVersion;
    ///
    /// let version = ToolVersion::parse("Go", "1.11")?;
    /// assert_eq!(version.to_string(), "1.11.0");
    /// # Ok::<(), gostrap_installer::error::ProvisionError>(())
    /// ```
    pub fn parse(kind: &str, raw: &str) -> Result<Self> {
        let invalid = || ProvisionError::InvalidVersion {
            kind: kind.to_owned(),
            value: raw.to_owned(),
        };
        let normalised = normalize(raw).ok_or_else(invalid)?;
        let mut parts = normalised.split('.').map(str::parse::<u64>);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(Ok(major)), Some(Ok(minor)), Some(Ok(patch))) => {
                Ok(Self(Version::new(major, minor, patch)))
            }
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Normalise a dotted version string to three components.
///
/// Exactly one dot gains a `.0` suffix; exactly two dots are kept as-is.
/// Anything else, including empty or non-numeric components, yields `None`.
/// Normalisation is idempotent.
///
/// # Examples
///
/// ```
/// use gostrap_installer::version::normalize;
///
/// assert_eq!(normalize("3.6").as_deref(), Some("3.6.0"));
/// assert_eq!(normalize("3.6.1").as_deref(), Some("3.6.1"));
/// assert_eq!(normalize("3"), None);
/// ```
#[must_use]
pub fn normalize(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let components: Vec<&str> = trimmed.split('.').collect();
    let numeric = components
        .iter()
        .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()));
    if !numeric {
        return None;
    }
    match components.len() {
        2 => Some(format!("{trimmed}.0")),
        3 => Some(trimmed.to_owned()),
        _ => None,
    }
}

/// Rejects tool versions below a supported minimum.
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionGate;

impl VersionGate {
    /// Check that `actual` is at least `minimum` for tool `kind`.
    ///
    /// Returns the parsed `actual` version on success.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InvalidVersion`] for malformed input and
    /// [`ProvisionError::VersionTooLow`] when `actual < minimum`.
    ///
    /// # Examples
    ///
    /// ```
    /// use gostrap_installer::error::ProvisionError;
    /// use gostrap_installer::version::VersionGate;
    ///
    /// assert!(VersionGate::check("Go", "1.11.4", "1.11.4").is_ok());
    /// assert!(matches!(
    ///     VersionGate::check("Go", "1.11", "1.11.4"),
    ///     Err(ProvisionError::VersionTooLow { .. })
    /// ));
    /// ```
    pub fn check(kind: &str, actual: &str, minimum: &str) -> Result<ToolVersion> {
        debug!("checking {kind} version {actual} against minimum {minimum}");
        let actual_version = ToolVersion::parse(kind, actual)?;
        let minimum_version = ToolVersion::parse(kind, minimum)?;
        if actual_version < minimum_version {
            return Err(ProvisionError::VersionTooLow {
                kind: kind.to_owned(),
                actual: actual_version.to_string(),
                minimum: minimum_version.to_string(),
            });
        }
        Ok(actual_version)
    }
}
