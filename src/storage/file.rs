//! Owner-only file secret backend
//!
//! Each secret is a single file `<dir>/<name>.<kind>` with mode 0600 inside
//! a 0700 directory. Writes go to a temporary file first and are renamed
//! into place.

use super::{validate_name, Backend, SecretBackend, SecretKind, StorageError};
use crate::Secret;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;
use zeroize::Zeroizing;

/// File-based secret storage
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Create a backend rooted at `dir` (created on first write)
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding `name`/`kind`
    pub fn path_for(&self, name: &str, kind: SecretKind) -> Result<PathBuf, StorageError> {
        validate_name(name)?;
        Ok(self.dir.join(format!("{}.{}", name, kind)))
    }

    async fn ensure_dir(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.dir, std::fs::Permissions::from_mode(0o700)).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl SecretBackend for FileBackend {
    fn backend(&self) -> Backend {
        Backend::File
    }

    async fn get(&self, name: &str, kind: SecretKind) -> Result<Option<Secret>, StorageError> {
        let path = self.path_for(name, kind)?;
        match fs::read_to_string(&path).await {
            Ok(content) => {
                let content = Zeroizing::new(content);
                Ok(Some(Secret::new(content.as_str())))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, name: &str, kind: SecretKind, value: &Secret) -> Result<(), StorageError> {
        let path = self.path_for(name, kind)?;
        self.ensure_dir().await?;

        // Write atomically by writing to temp file first
        let temp_path = self.dir.join(format!(".{}.{}.tmp", name, Uuid::new_v4()));
        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let write = async {
            let mut file = options.open(&temp_path).await?;
            file.write_all(value.expose().as_bytes()).await?;
            file.sync_all().await?;
            fs::rename(&temp_path, &path).await
        };
        if let Err(e) = write.await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete(&self, name: &str, kind: SecretKind) -> Result<bool, StorageError> {
        let path = self.path_for(name, kind)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
