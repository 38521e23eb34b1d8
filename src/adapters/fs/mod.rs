//! Filesystem adapter: Implementation of ArtifactStore.
//!
//! Layout under the root directory:
//!
//! ```text
//! model/bundle.json
//! keys/context.public
//! keys/context.private      (0600 on Unix)
//! data/encrypted_input.bin
//! data/encrypted_output.bin
//! ```
//!
//! # Atomicity
//!
//! Every write goes to a temporary file in the destination directory, is
//! synced, then renamed over the target. Readers see the old artifact or the
//! new one, never a torn write.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::domain::ModelBundle;
use crate::ports::{ArtifactStore, BatchKind, ContextKind};

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt artifact {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),
}

impl StorageError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// File-backed artifact store.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `root`.
    ///
    /// # Errors
    /// Returns error if the directories cannot be created.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        for dir in ["model", "keys", "data"] {
            let path = root.join(dir);
            std::fs::create_dir_all(&path).map_err(|e| StorageError::io(&path, e))?;
        }
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn bundle_path(&self) -> PathBuf {
        self.root.join("model").join("bundle.json")
    }

    #[must_use]
    pub fn context_path(&self, kind: ContextKind) -> PathBuf {
        let name = match kind {
            ContextKind::Public => "context.public",
            ContextKind::Private => "context.private",
        };
        self.root.join("keys").join(name)
    }

    #[must_use]
    pub fn batch_path(&self, kind: BatchKind) -> PathBuf {
        let name = match kind {
            BatchKind::Input => "encrypted_input.bin",
            BatchKind::Output => "encrypted_output.bin",
        };
        self.root.join("data").join(name)
    }

    fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(path, e)),
        }
    }
}

/// Atomically replace `path` with `bytes`.
///
/// # Errors
/// Returns `StorageError::Io` if any step fails; the target is untouched then.
pub fn write_atomic(path: &Path, bytes: &[u8], private: bool) -> Result<(), StorageError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| StorageError::io(dir, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| StorageError::io(dir, e))?;

    #[cfg(unix)]
    if private {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o600))
            .map_err(|e| StorageError::io(tmp.path(), e))?;
    }
    #[cfg(not(unix))]
    let _ = private;

    tmp.write_all(bytes).map_err(|e| StorageError::io(path, e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| StorageError::io(path, e))?;
    tmp.persist(path)
        .map_err(|e| StorageError::io(path, e.error))?;
    Ok(())
}

impl ArtifactStore for FileStore {
    type Error = StorageError;

    fn load_bundle(&self) -> Result<Option<ModelBundle>, Self::Error> {
        let path = self.bundle_path();
        let Some(bytes) = Self::read_optional(&path)? else {
            return Ok(None);
        };
        let bundle: ModelBundle =
            serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupt {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        bundle.validate().map_err(|reason| StorageError::Corrupt {
            path: path.clone(),
            reason,
        })?;
        Ok(Some(bundle))
    }

    fn save_bundle(&self, bundle: &ModelBundle) -> Result<(), Self::Error> {
        let json = serde_json::to_vec_pretty(bundle)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        write_atomic(&self.bundle_path(), &json, false)?;
        tracing::info!("Saved model bundle to {}", self.bundle_path().display());
        Ok(())
    }

    fn has_bundle(&self) -> Result<bool, Self::Error> {
        Ok(self.bundle_path().is_file())
    }

    fn delete_bundle(&self) -> Result<(), Self::Error> {
        let path = self.bundle_path();
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(&path, e)),
        }
    }

    fn load_context(&self, kind: ContextKind) -> Result<Option<Vec<u8>>, Self::Error> {
        Self::read_optional(&self.context_path(kind))
    }

    fn save_context(&self, kind: ContextKind, bytes: &[u8]) -> Result<(), Self::Error> {
        write_atomic(&self.context_path(kind), bytes, kind == ContextKind::Private)
    }

    fn load_batch(&self, kind: BatchKind) -> Result<Option<Vec<u8>>, Self::Error> {
        Self::read_optional(&self.batch_path(kind))
    }

    fn save_batch(&self, kind: BatchKind, bytes: &[u8]) -> Result<(), Self::Error> {
        write_atomic(&self.batch_path(kind), bytes, false)
    }
}
