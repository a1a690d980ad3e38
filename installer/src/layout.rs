//! Directory layout of the private work directory.

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use log::debug;

use crate::error::Result;

/// Paths under the workspace directory, derived from the project directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLayout {
    project_dir: Utf8PathBuf,
    root: Utf8PathBuf,
}

impl WorkspaceLayout {
    /// Layout for `project_dir` with the workspace at `dir`, which may be
    /// relative to the project directory.
    #[must_use]
    pub fn new(project_dir: impl Into<Utf8PathBuf>, dir: &Utf8Path) -> Self {
        let project_dir = project_dir.into();
        let root = if dir.is_absolute() {
            dir.to_owned()
        } else {
            project_dir.join(dir)
        };
        Self { project_dir, root }
    }

    /// The project being built.
    #[must_use]
    pub fn project_dir(&self) -> &Utf8Path {
        &self.project_dir
    }

    /// The workspace directory itself.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Whether the workspace lies strictly below the project directory.
    ///
    /// `.` and `..` are resolved lexically, so `""`, `".."` and absolute
    /// paths elsewhere are all outside.
    ///
    /// # Examples
    ///
    /// ```
    /// use camino::Utf8Path;
    /// use gostrap_installer::layout::WorkspaceLayout;
    ///
    /// assert!(WorkspaceLayout::new("/src/app", Utf8Path::new(".gostrap")).is_inside_project());
    /// assert!(!WorkspaceLayout::new("/src/app", Utf8Path::new("..")).is_inside_project());
    /// ```
    #[must_use]
    pub fn is_inside_project(&self) -> bool {
        let project = lexically_normalised(&self.project_dir);
        let root = lexically_normalised(&self.root);
        root != project && root.starts_with(&project)
    }

    /// Downloaded archives.
    #[must_use]
    pub fn cache(&self) -> Utf8PathBuf {
        self.root.join("caches")
    }

    /// Extracted toolchains.
    #[must_use]
    pub fn env(&self) -> Utf8PathBuf {
        self.root.join("env")
    }

    /// Coverage reports.
    #[must_use]
    pub fn reports(&self) -> Utf8PathBuf {
        self.root.join("reports")
    }

    /// The protoc installation.
    #[must_use]
    pub fn proto(&self) -> Utf8PathBuf {
        self.root.join("proto")
    }

    /// Create every directory, tolerating ones that already exist.
    ///
    /// The returned token is proof for later steps that the layout exists.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ProvisionError::Io`] when a directory cannot
    /// be created.
    pub fn prepare(&self) -> Result<PreparedLayout> {
        for dir in [self.cache(), self.env(), self.reports(), self.proto()] {
            std::fs::create_dir_all(&dir)?;
            debug!("prepared {dir}");
        }
        Ok(PreparedLayout {
            layout: self.clone(),
        })
    }
}

/// A [`WorkspaceLayout`] whose directories are known to exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedLayout {
    layout: WorkspaceLayout,
}

impl std::ops::Deref for PreparedLayout {
    type Target = WorkspaceLayout;

    fn deref(&self) -> &Self::Target {
        &self.layout
    }
}

fn lexically_normalised(path: &Utf8Path) -> Utf8PathBuf {
    let mut normalised = Utf8PathBuf::new();
    for component in path.components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                normalised.pop();
            }
            other => normalised.push(other),
        }
    }
    normalised
}
