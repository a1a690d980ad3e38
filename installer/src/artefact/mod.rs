//! Tool archive acquisition.
//!
//! # Sub-modules
//!
//! - [`acquire`] - Probe, download, verify and extract a [`spec::ToolSpec`].
//! - [`download`] - Download trait and `ureq` implementation.
//! - [`extraction`] - Zip and tar+gzip extraction with traversal protection.
//! - [`spec`] - Tool and probe descriptions.

pub mod acquire;
pub mod download;
pub mod extraction;
pub mod spec;
