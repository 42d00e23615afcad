//! Binary input readers for transcription.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{LlmError, Result};

/// Reads audio/image resources as bytes.
#[async_trait]
pub trait FileSource: Send + Sync {
    /// Read the whole resource.
    ///
    /// # Errors
    /// Returns `LlmError::NotFound` if the resource does not exist.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;
}

/// Local filesystem reader. Accepts plain paths and `file://` URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFiles;

/// Strip a `file://` scheme, if present.
#[must_use]
pub fn local_path(path: &Path) -> PathBuf {
    match path.to_str().and_then(|s| s.strip_prefix("file://")) {
        Some(rest) => PathBuf::from(rest),
        None => path.to_path_buf(),
    }
}

#[async_trait]
impl FileSource for LocalFiles {
    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let path = local_path(path);
        tokio::fs::read(&path).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                LlmError::not_found(path.display().to_string())
            } else {
                LlmError::Io(err)
            }
        })
    }
}
