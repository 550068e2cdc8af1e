//! Filesystem-backed local tier.

use std::path::{Path, PathBuf};

use futures::TryStreamExt;
use opendal::{ErrorKind, Operator, services};
use tracing::debug;

use super::{StoredObject, modified_at};
use crate::error::MediaError;
use crate::reference::ObjectKey;

/// Local storage tier rooted at a single directory.
///
/// All operations go through an OpenDAL `Fs` operator, which confines
/// them to the root; [`LocalTier::resolve`] re-checks containment before
/// handing out an absolute path.
pub struct LocalTier {
    op: Operator,
    root: PathBuf,
}

impl LocalTier {
    /// Create a local tier, creating the root directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be created or the operator
    /// cannot be built.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, MediaError> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| MediaError::configuration(format!("media root: {e}")))?;

        let root_str = root
            .to_str()
            .ok_or_else(|| MediaError::configuration("media root is not valid UTF-8"))?;
        let builder = services::Fs::default().root(root_str);
        let op = Operator::new(builder)
            .map_err(|e| MediaError::configuration(e.to_string()))?
            .finish();

        Ok(Self { op, root })
    }

    /// The root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write object bytes, creating intermediate directories as needed.
    pub async fn put(
        &self,
        key: &ObjectKey,
        bytes: impl Into<bytes::Bytes>,
    ) -> Result<(), MediaError> {
        let bytes = bytes.into();
        debug!(key = %key, size = bytes.len(), "local tier: put");
        self.op.write(key.as_str(), bytes).await?;
        Ok(())
    }

    /// Read object bytes; `None` on miss.
    pub async fn get(&self, key: &ObjectKey) -> Result<Option<Vec<u8>>, MediaError> {
        match self.op.read(key.as_str()).await {
            Ok(buf) => Ok(Some(buf.to_vec())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Size and mtime of an object; `None` on miss.
    pub async fn stat(&self, key: &ObjectKey) -> Result<Option<StoredObject>, MediaError> {
        match self.op.stat(key.as_str()).await {
            Ok(meta) => Ok(Some(StoredObject {
                key: key.clone(),
                size: meta.content_length(),
                modified: modified_at(&meta),
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete an object. Deleting a missing object is not an error.
    pub async fn delete(&self, key: &ObjectKey) -> Result<(), MediaError> {
        debug!(key = %key, "local tier: delete");
        self.op.delete(key.as_str()).await?;
        Ok(())
    }

    /// List every object under `prefix` (the whole tier for an empty
    /// prefix) with size and mtime.
    pub async fn list(&self, prefix: &str) -> Result<Vec<StoredObject>, MediaError> {
        let path = dir_path(prefix);
        let mut lister = self.op.lister_with(&path).recursive(true).await?;
        let mut objects = Vec::new();
        while let Some(entry) = lister.try_next().await? {
            if !entry.metadata().mode().is_file() {
                continue;
            }
            let Ok(key) = ObjectKey::parse(entry.path()) else {
                continue;
            };
            let meta = self.op.stat(entry.path()).await?;
            objects.push(StoredObject {
                key,
                size: meta.content_length(),
                modified: modified_at(&meta),
            });
        }
        Ok(objects)
    }

    /// Absolute path of an object, guaranteed inside the root; `None`
    /// when the object does not exist or the key would escape.
    #[must_use]
    pub fn resolve(&self, key: &ObjectKey) -> Option<PathBuf> {
        let path = self.root.join(key.as_str());
        // ObjectKey construction already forbids traversal; keep the
        // containment check as the final authority.
        if !path.starts_with(&self.root) {
            return None;
        }
        path.is_file().then_some(path)
    }

    /// Remove directories left empty after deletions. Returns how many
    /// were removed.
    pub fn remove_empty_dirs(&self) -> std::io::Result<usize> {
        fn prune(dir: &Path, is_root: bool) -> std::io::Result<(usize, bool)> {
            let mut removed = 0;
            let mut occupied = false;
            for entry in std::fs::read_dir(dir)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    let (r, child_occupied) = prune(&entry.path(), false)?;
                    removed += r;
                    occupied |= child_occupied;
                } else {
                    occupied = true;
                }
            }
            if !occupied && !is_root {
                std::fs::remove_dir(dir)?;
                removed += 1;
                return Ok((removed, false));
            }
            Ok((removed, occupied))
        }

        prune(&self.root, true).map(|(removed, _)| removed)
    }
}

/// Normalize a prefix into an OpenDAL directory path.
fn dir_path(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("{trimmed}/")
    }
}
