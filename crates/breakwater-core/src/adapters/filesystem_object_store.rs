//! Filesystem-backed object store.

use crate::object_store::{
    compute_checksum, validate_key, verify_checksum, ObjectMeta, ObjectStore, ObjectStoreError,
    PutOptions, StoredObject,
};
use crate::Timestamp;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Object store backed by a local directory
///
/// Keys are hex-encoded into flat file names, so arbitrary key
/// characters and `/` separators never interact with the filesystem
/// layout. Each object is a pair of files: `<hex>.obj` holds the
/// payload and `<hex>.meta.json` its metadata. Writes go through a
/// temp file and rename, and the meta file is written last, so a
/// visible meta file always refers to a complete payload.
#[derive(Debug, Clone)]
pub struct FilesystemObjectStore {
    root: PathBuf,
}

impl FilesystemObjectStore {
    /// Create a store rooted at `root`, creating the directory if needed
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, ObjectStoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| ObjectStoreError::Io {
                message: format!("failed to create store root: {e}"),
            })?;
        Ok(Self { root })
    }

    /// Directory holding the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn data_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.obj", hex::encode(key)))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.meta.json", hex::encode(key)))
    }

    async fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<(), ObjectStoreError> {
        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| ObjectStoreError::Io {
                message: format!("failed to create temp file: {e}"),
            })?;
        file.write_all(data)
            .await
            .map_err(|e| ObjectStoreError::Io {
                message: format!("failed to write temp file: {e}"),
            })?;
        file.sync_all().await.map_err(|e| ObjectStoreError::Io {
            message: format!("failed to sync temp file: {e}"),
        })?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| ObjectStoreError::Io {
                message: format!("failed to publish file: {e}"),
            })
    }

    async fn read_meta(&self, key: &str) -> Result<ObjectMeta, ObjectStoreError> {
        let bytes = match tokio::fs::read(self.meta_path(key)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ObjectStoreError::NotFound {
                    key: key.to_string(),
                });
            }
            Err(e) => {
                return Err(ObjectStoreError::Io {
                    message: format!("failed to read metadata: {e}"),
                });
            }
        };
        serde_json::from_slice(&bytes).map_err(|e| ObjectStoreError::Io {
            message: format!("corrupt metadata for {key}: {e}"),
        })
    }

    async fn remove_if_present(&self, path: &Path) -> Result<(), ObjectStoreError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ObjectStoreError::Io {
                message: format!("failed to remove file: {e}"),
            }),
        }
    }
}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        options: PutOptions,
    ) -> Result<ObjectMeta, ObjectStoreError> {
        validate_key(key)?;

        let meta = ObjectMeta {
            key: key.to_string(),
            size_bytes: data.len() as u64,
            content_type: options.content_type,
            checksum: compute_checksum(&data),
            metadata: options.metadata,
            created_at: Timestamp::now(),
        };
        let meta_json = serde_json::to_vec(&meta).map_err(|e| ObjectStoreError::Io {
            message: format!("failed to serialize metadata: {e}"),
        })?;

        self.write_atomic(&self.data_path(key), &data).await?;
        self.write_atomic(&self.meta_path(key), &meta_json).await?;
        Ok(meta)
    }

    async fn get(&self, key: &str) -> Result<StoredObject, ObjectStoreError> {
        validate_key(key)?;

        let meta = self.read_meta(key).await?;
        let data = match tokio::fs::read(self.data_path(key)).await {
            Ok(data) => Bytes::from(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ObjectStoreError::NotFound {
                    key: key.to_string(),
                });
            }
            Err(e) => {
                return Err(ObjectStoreError::Io {
                    message: format!("failed to read object: {e}"),
                });
            }
        };

        if !verify_checksum(&data, &meta.checksum) {
            return Err(ObjectStoreError::ChecksumMismatch {
                key: key.to_string(),
                expected: meta.checksum.clone(),
                actual: compute_checksum(&data),
            });
        }

        Ok(StoredObject { meta, data })
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        validate_key(key)?;

        // Meta goes first so a crash mid-delete never leaves a meta file
        // pointing at a missing payload.
        self.remove_if_present(&self.meta_path(key)).await?;
        self.remove_if_present(&self.data_path(key)).await
    }

    async fn list(&self, prefix: &str, limit: usize) -> Result<Vec<ObjectMeta>, ObjectStoreError> {
        let mut dir = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| ObjectStoreError::Io {
                message: format!("failed to read store root: {e}"),
            })?;

        let mut metas = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(|e| ObjectStoreError::Io {
            message: format!("failed to read store entry: {e}"),
        })? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.ends_with(".meta.json") {
                continue;
            }
            let bytes = match tokio::fs::read(entry.path()).await {
                Ok(bytes) => bytes,
                // Raced with a concurrent delete.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(ObjectStoreError::Io {
                        message: format!("failed to read metadata: {e}"),
                    });
                }
            };
            let meta: ObjectMeta =
                serde_json::from_slice(&bytes).map_err(|e| ObjectStoreError::Io {
                    message: format!("corrupt metadata file {name}: {e}"),
                })?;
            if meta.key.starts_with(prefix) {
                metas.push(meta);
            }
        }

        metas.sort_by(|a, b| a.key.cmp(&b.key));
        metas.truncate(limit);
        Ok(metas)
    }

    async fn head(&self, key: &str) -> Result<ObjectMeta, ObjectStoreError> {
        validate_key(key)?;
        self.read_meta(key).await
    }
}

#[cfg(test)]
#[path = "filesystem_object_store_tests.rs"]
mod tests;
