use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{CompletedPart, ObjectInfo, StorageError, StoreFuture};
use crate::{ObjectStore, validate_bucket_name, validate_object_key};

/// Directory holding staged multipart parts, one subdirectory per upload.
const STAGING_DIR: &str = ".multipart";

/// Filesystem-backed [`ObjectStore`]: bucket = directory, object = file.
///
/// Multipart parts are staged under `<root>/<bucket>/.multipart/<upload_id>/`
/// and concatenated into the final file on completion. I/O is plain
/// synchronous `std::fs`, same as the chunk writer it feeds.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Creates a store rooted at `root`, creating the directory if needed.
    pub fn new(root: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StorageError> {
        validate_bucket_name(bucket)?;
        validate_object_key(key)?;
        Ok(self.root.join(bucket).join(key))
    }

    fn staging_path(&self, bucket: &str, upload_id: &str) -> Result<PathBuf, StorageError> {
        validate_bucket_name(bucket)?;
        // Upload ids are generated here as UUIDs; anything else is foreign.
        if upload_id.is_empty() || upload_id.contains(['/', '\\', '.']) {
            return Err(StorageError::UnknownUpload(upload_id.into()));
        }
        Ok(self.root.join(bucket).join(STAGING_DIR).join(upload_id))
    }
}

fn not_found(bucket: &str, key: &str, err: std::io::Error) -> StorageError {
    if err.kind() == std::io::ErrorKind::NotFound {
        StorageError::ObjectNotFound {
            bucket: bucket.into(),
            key: key.into(),
        }
    } else {
        StorageError::Io(err)
    }
}

impl ObjectStore for FsStore {
    fn head_object<'a>(&'a self, bucket: &'a str, key: &'a str) -> StoreFuture<'a, ObjectInfo> {
        Box::pin(async move {
            let path = self.object_path(bucket, key)?;
            let meta = std::fs::metadata(&path).map_err(|e| not_found(bucket, key, e))?;
            Ok(ObjectInfo { size: meta.len() })
        })
    }

    fn get_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        offset: u64,
        len: usize,
    ) -> StoreFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let path = self.object_path(bucket, key)?;
            let mut file = std::fs::File::open(&path).map_err(|e| not_found(bucket, key, e))?;
            let size = file.metadata()?.len();
            if offset >= size {
                return Err(StorageError::InvalidRange { offset, size });
            }

            file.seek(SeekFrom::Start(offset))?;
            let want = len.min((size - offset) as usize);
            let mut buf = vec![0u8; want];
            file.read_exact(&mut buf)?;
            Ok(buf)
        })
    }

    fn start_multipart<'a>(&'a self, bucket: &'a str, key: &'a str) -> StoreFuture<'a, String> {
        Box::pin(async move {
            validate_object_key(key)?;
            let upload_id = uuid::Uuid::new_v4().to_string();
            let staging = self.staging_path(bucket, &upload_id)?;
            std::fs::create_dir_all(&staging)?;
            debug!(bucket, key, upload_id, "multipart upload started");
            Ok(upload_id)
        })
    }

    fn put_part<'a>(
        &'a self,
        bucket: &'a str,
        _key: &'a str,
        upload_id: &'a str,
        part_number: u32,
        data: Vec<u8>,
    ) -> StoreFuture<'a, String> {
        Box::pin(async move {
            if part_number == 0 {
                return Err(StorageError::InvalidPart("part numbers are 1-based".into()));
            }
            let staging = self.staging_path(bucket, upload_id)?;
            if !staging.is_dir() {
                return Err(StorageError::UnknownUpload(upload_id.into()));
            }

            let part_path = staging.join(format!("part-{part_number}"));
            let mut file = std::fs::File::create(&part_path)?;
            file.write_all(&data)?;
            Ok(format!("etag-{upload_id}-{part_number}"))
        })
    }

    fn complete_multipart<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        upload_id: &'a str,
        parts: Vec<CompletedPart>,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let staging = self.staging_path(bucket, upload_id)?;
            if !staging.is_dir() {
                return Err(StorageError::UnknownUpload(upload_id.into()));
            }

            // Verify the listed parts are contiguous and all staged.
            let mut sources = Vec::with_capacity(parts.len());
            for (i, part) in parts.iter().enumerate() {
                let expected = (i + 1) as u32;
                if part.part_number != expected {
                    return Err(StorageError::InvalidPart(format!(
                        "expected part {expected}, got {}",
                        part.part_number
                    )));
                }
                let path = staging.join(format!("part-{expected}"));
                if !path.is_file() {
                    return Err(StorageError::InvalidPart(format!(
                        "part {expected} was never uploaded"
                    )));
                }
                sources.push(path);
            }

            let dest = self.object_path(bucket, key)?;
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let mut out = std::fs::File::create(&dest)?;
            let mut buf = [0u8; 64 * 1024];
            for src in sources {
                let mut part = std::fs::File::open(&src)?;
                loop {
                    let n = part.read(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    out.write_all(&buf[..n])?;
                }
            }
            out.flush()?;

            std::fs::remove_dir_all(&staging)?;
            debug!(bucket, key, upload_id, "multipart upload completed");
            Ok(())
        })
    }

    fn abort_multipart<'a>(
        &'a self,
        bucket: &'a str,
        _key: &'a str,
        upload_id: &'a str,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let staging = self.staging_path(bucket, upload_id)?;
            if !staging.is_dir() {
                return Err(StorageError::UnknownUpload(upload_id.into()));
            }
            std::fs::remove_dir_all(&staging)?;
            Ok(())
        })
    }

    fn delete_object<'a>(&'a self, bucket: &'a str, key: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let path = self.object_path(bucket, key)?;
            std::fs::remove_file(&path).map_err(|e| not_found(bucket, key, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, FsStore) {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn multipart_roundtrip_to_disk() {
        let (_dir, store) = store();
        let id = store.start_multipart("media", "out/movie.mkv").await.unwrap();

        let e1 = store
            .put_part("media", "out/movie.mkv", &id, 1, b"Hello".to_vec())
            .await
            .unwrap();
        let e2 = store
            .put_part("media", "out/movie.mkv", &id, 2, b" World".to_vec())
            .await
            .unwrap();

        store
            .complete_multipart(
                "media",
                "out/movie.mkv",
                &id,
                vec![
                    CompletedPart {
                        part_number: 1,
                        etag: e1,
                    },
                    CompletedPart {
                        part_number: 2,
                        etag: e2,
                    },
                ],
            )
            .await
            .unwrap();

        let written = std::fs::read(store.root().join("media/out/movie.mkv")).unwrap();
        assert_eq!(&written, b"Hello World");
        // Staging directory is gone.
        assert!(!store.root().join("media").join(STAGING_DIR).join(&id).exists());
    }

    #[tokio::test]
    async fn ranged_get_from_disk() {
        let (_dir, store) = store();
        std::fs::create_dir_all(store.root().join("media")).unwrap();
        std::fs::write(store.root().join("media/k.bin"), b"0123456789").unwrap();

        assert_eq!(
            store.get_object("media", "k.bin", 4, 4).await.unwrap(),
            b"4567"
        );
        assert_eq!(
            store.get_object("media", "k.bin", 8, 100).await.unwrap(),
            b"89"
        );
        let err = store.get_object("media", "k.bin", 99, 1).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidRange { .. }));
    }

    #[tokio::test]
    async fn head_missing_object() {
        let (_dir, store) = store();
        let err = store.head_object("media", "nope").await.unwrap_err();
        assert!(matches!(err, StorageError::ObjectNotFound { .. }));
    }

    #[tokio::test]
    async fn traversal_keys_rejected() {
        let (_dir, store) = store();
        assert!(store.head_object("media", "../evil").await.is_err());
        assert!(store.start_multipart("media", "/abs").await.is_err());
        assert!(store.head_object("..", "k").await.is_err());
    }

    #[tokio::test]
    async fn abort_removes_staging() {
        let (_dir, store) = store();
        let id = store.start_multipart("media", "k").await.unwrap();
        store
            .put_part("media", "k", &id, 1, b"AA".to_vec())
            .await
            .unwrap();

        store.abort_multipart("media", "k", &id).await.unwrap();
        assert!(!store.root().join("media").join(STAGING_DIR).join(&id).exists());

        // Second abort reports the upload as unknown.
        let err = store.abort_multipart("media", "k", &id).await.unwrap_err();
        assert!(matches!(err, StorageError::UnknownUpload(_)));
    }

    #[tokio::test]
    async fn complete_with_missing_part_fails() {
        let (_dir, store) = store();
        let id = store.start_multipart("media", "k").await.unwrap();
        store
            .put_part("media", "k", &id, 1, b"AA".to_vec())
            .await
            .unwrap();

        let parts = vec![
            CompletedPart {
                part_number: 1,
                etag: "e1".into(),
            },
            CompletedPart {
                part_number: 2,
                etag: "e2".into(),
            },
        ];
        let err = store
            .complete_multipart("media", "k", &id, parts)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidPart(_)));
    }

    #[tokio::test]
    async fn delete_object_removes_file() {
        let (_dir, store) = store();
        std::fs::create_dir_all(store.root().join("media")).unwrap();
        std::fs::write(store.root().join("media/k.bin"), b"x").unwrap();

        store.delete_object("media", "k.bin").await.unwrap();
        let err = store.delete_object("media", "k.bin").await.unwrap_err();
        assert!(matches!(err, StorageError::ObjectNotFound { .. }));
    }
}
