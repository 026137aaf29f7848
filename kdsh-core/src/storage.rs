//! Where received files end up.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::error::KdshError;

/// Write primitive used to persist completed downloads.
///
/// Implementations must create the file or truncate an existing one.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    async fn write_file(&self, path: &Path, contents: &[u8]) -> std::io::Result<()>;
}

/// Writes straight to the local file system, creating parent
/// directories as needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsStorage;

#[async_trait]
impl Storage for FsStorage {
    async fn write_file(&self, path: &Path, contents: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, contents).await
    }
}

/// Map a server-supplied file name into `dir`.
///
/// Only normal components are kept, so `..`, absolute roots and drive
/// prefixes cannot move the file outside `dir`.
pub fn resolve_target(dir: &Path, name: &str) -> Result<PathBuf, KdshError> {
    let relative: PathBuf = Path::new(name)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect();

    if relative.as_os_str().is_empty() {
        return Err(KdshError::InvalidFileName(name.to_string()));
    }
    Ok(dir.join(relative))
}
