//! Filesystem access used by the reconciler.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};

/// The four file operations the reconciler needs.
#[async_trait]
pub trait ArtifactFs: Send + Sync {
    async fn exists(&self, path: &Path) -> io::Result<bool>;
    async fn read_all(&self, path: &Path) -> io::Result<Vec<u8>>;
    async fn write_all(&self, path: &Path, bytes: &[u8], mode: u32) -> io::Result<()>;
    async fn remove(&self, path: &Path) -> io::Result<()>;
}

/// [`ArtifactFs`] backed by the local disk.
///
/// Writes go to a hidden sibling first and are renamed into place, so `dest`
/// is either absent or complete.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

#[async_trait]
impl ArtifactFs for LocalFs {
    async fn exists(&self, path: &Path) -> io::Result<bool> {
        tokio::fs::try_exists(path).await
    }

    async fn read_all(&self, path: &Path) -> io::Result<Vec<u8>> {
        tokio::fs::read(path).await
    }

    async fn write_all(&self, path: &Path, bytes: &[u8], mode: u32) -> io::Result<()> {
        let staging = staging_path(path)?;
        tokio::fs::write(&staging, bytes).await?;

        if let Err(e) = set_mode(&staging, mode).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e);
        }
        if let Err(e) = tokio::fs::rename(&staging, path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e);
        }
        Ok(())
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }
}

fn staging_path(path: &Path) -> io::Result<PathBuf> {
    let name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no file name", path.display()),
        )
    })?;
    let mut staging = std::ffi::OsString::from(".");
    staging.push(name);
    staging.push(".podmaster-tmp");
    Ok(path.with_file_name(staging))
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}
