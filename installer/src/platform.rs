//! Host platform resolution and per-tool naming rules.
//!
//! Upstream release archives spell the same platform differently: Go
//! publishes `darwin-amd64` while protoc publishes `osx-x86_64`. The host is
//! resolved once into canonical Go-style tokens, then each tool applies its
//! own rename table.

use std::fmt;

use crate::error::{ProvisionError, Result};

/// Raw operating system and architecture facts for the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFacts {
    /// Operating system as reported by `std::env::consts::OS`.
    pub os: String,
    /// CPU architecture as reported by `std::env::consts::ARCH`.
    pub arch: String,
}

impl HostFacts {
    /// Facts for the running host.
    #[must_use]
    pub fn current() -> Self {
        Self::new(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Facts for an explicit host.
    #[must_use]
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }
}

impl Default for HostFacts {
    fn default() -> Self {
        Self::current()
    }
}

/// A resolved `(os, arch)` pair used to build download URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformArch {
    /// Operating system token.
    pub os: String,
    /// Architecture token.
    pub arch: String,
}

impl PlatformArch {
    /// Resolve canonical tokens (`linux`/`darwin`, `amd64`/`arm64`/`386`).
    ///
    /// Unknown architectures pass through unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::UnsupportedPlatform`] unless the host is
    /// Linux or macOS.
    ///
    /// # Examples
    ///
    /// ```
    /// use gostrap_installer::platform::{HostFacts, PlatformArch};
    ///
    /// let platform = PlatformArch::resolve(&HostFacts::new("macos", "x86_64"))?;
    /// assert_eq!(platform.to_string(), "darwin-amd64");
    /// # Ok::<(), gostrap_installer::error::ProvisionError>(())
    /// ```
    pub fn resolve(host: &HostFacts) -> Result<Self> {
        let os = match host.os.as_str() {
            "linux" => "linux",
            "macos" | "darwin" => "darwin",
            _ => {
                return Err(ProvisionError::UnsupportedPlatform {
                    os: host.os.clone(),
                    arch: host.arch.clone(),
                });
            }
        };
        let arch = match host.arch.as_str() {
            "x86_64" | "amd64" => "amd64",
            "aarch64" | "arm64" => "arm64",
            "x86" | "i386" | "i686" => "386",
            other => other,
        };
        Ok(Self {
            os: os.to_owned(),
            arch: arch.to_owned(),
        })
    }

    /// Apply a tool-specific rename table.
    #[must_use]
    pub fn renamed(&self, rules: &NamingRules) -> Self {
        Self {
            os: NamingRules::lookup(rules.os, &self.os),
            arch: NamingRules::lookup(rules.arch, &self.arch),
        }
    }
}

impl fmt::Display for PlatformArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os, self.arch)
    }
}

/// Static rename tables for one tool's release naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamingRules {
    /// `(canonical, tool-specific)` OS renames.
    pub os: &'static [(&'static str, &'static str)],
    /// `(canonical, tool-specific)` architecture renames.
    pub arch: &'static [(&'static str, &'static str)],
}

impl NamingRules {
    fn lookup(table: &[(&str, &str)], token: &str) -> String {
        table
            .iter()
            .find(|(canonical, _)| *canonical == token)
            .map_or(token, |(_, renamed)| *renamed)
            .to_owned()
    }
}

/// Go release archives use the canonical tokens.
pub const GO_NAMING: NamingRules = NamingRules { os: &[], arch: &[] };

/// protoc release archives use `osx` and explicit bit widths.
pub const PROTOC_NAMING: NamingRules = NamingRules {
    os: &[("darwin", "osx")],
    arch: &[("amd64", "x86_64"), ("386", "x86_32"), ("arm64", "aarch_64")],
};
