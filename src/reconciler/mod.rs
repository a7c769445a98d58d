//! # Reconciler
//!
//! Enforces the one invariant the daemon exists for: the managed file is
//! present if and only if this process believes it is master.
//!
//! | master | dest exists | action |
//! |--------|-------------|--------|
//! | yes    | no          | copy `source` to `dest` |
//! | no     | yes         | remove `dest` |
//! | -      | -           | nothing |
//!
//! A `dest` that already exists while master is left alone, whatever its content.

pub mod fs;

use log::info;
use std::io;
use std::path::{Path, PathBuf};

pub use fs::{ArtifactFs, LocalFs};

/// Permissions given to the installed file.
pub const DEST_MODE: u32 = 0o755;

/// Source and destination of the managed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedArtifact {
    pub source: PathBuf,
    pub dest: PathBuf,
}

impl ManagedArtifact {
    pub fn new(source: impl Into<PathBuf>, dest: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            dest: dest.into(),
        }
    }
}

/// What [`Reconciler::reconcile`] changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Copied `source` to `dest`
    Installed { bytes: usize },
    /// Deleted `dest`
    Removed,
    /// Invariant already held
    Unchanged,
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("failed to check {}: {source}", path.display())]
    Stat { path: PathBuf, source: io::Error },

    #[error("failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to write {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },

    #[error("failed to remove {}: {source}", path.display())]
    Remove { path: PathBuf, source: io::Error },
}

/// Keeps a [`ManagedArtifact`] in line with the current role.
///
/// # Example
/// ```ignore
/// let reconciler = Reconciler::new(
///     LocalFs,
///     ManagedArtifact::new("/kubernetes/kube-scheduler.manifest", "/manifests/kube-scheduler.manifest"),
/// );
/// reconciler.reconcile(true).await?;
/// ```
#[derive(Debug)]
pub struct Reconciler<F = LocalFs> {
    fs: F,
    artifact: ManagedArtifact,
}

impl<F: ArtifactFs> Reconciler<F> {
    pub fn new(fs: F, artifact: ManagedArtifact) -> Self {
        Self { fs, artifact }
    }

    /// Bring `dest` in line with `is_master`.
    pub async fn reconcile(&self, is_master: bool) -> Result<ReconcileAction, ReconcileError> {
        let dest = &self.artifact.dest;
        let exists = self
            .fs
            .exists(dest)
            .await
            .map_err(|source| ReconcileError::Stat {
                path: dest.clone(),
                source,
            })?;

        match (is_master, exists) {
            (true, false) => {
                let bytes = self.copy(&self.artifact.source, dest).await?;
                info!(
                    "📄 Installed {} ({} bytes from {})",
                    dest.display(),
                    bytes,
                    self.artifact.source.display()
                );
                Ok(ReconcileAction::Installed { bytes })
            }
            (false, true) => {
                self.fs
                    .remove(dest)
                    .await
                    .map_err(|source| ReconcileError::Remove {
                        path: dest.clone(),
                        source,
                    })?;
                info!("🗑️  Removed {}", dest.display());
                Ok(ReconcileAction::Removed)
            }
            _ => Ok(ReconcileAction::Unchanged),
        }
    }

    async fn copy(&self, source: &Path, dest: &Path) -> Result<usize, ReconcileError> {
        let data = self
            .fs
            .read_all(source)
            .await
            .map_err(|e| ReconcileError::Read {
                path: source.to_path_buf(),
                source: e,
            })?;

        self.fs
            .write_all(dest, &data, DEST_MODE)
            .await
            .map_err(|e| ReconcileError::Write {
                path: dest.to_path_buf(),
                source: e,
            })?;

        Ok(data.len())
    }
}
