use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use crate::{CompletedPart, ObjectInfo, StorageError, StoreFuture};
use crate::{ObjectStore, validate_bucket_name, validate_object_key};

/// In-memory [`ObjectStore`] used by tests and the daemon self-check.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemInner>,
}

#[derive(Default)]
struct MemInner {
    objects: HashMap<(String, String), Vec<u8>>,
    uploads: HashMap<String, PendingUpload>,
    next_upload: u64,
}

struct PendingUpload {
    bucket: String,
    key: String,
    parts: BTreeMap<u32, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an object directly, bypassing the multipart flow.
    pub fn insert_object(&self, bucket: &str, key: &str, data: Vec<u8>) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .objects
            .insert((bucket.to_string(), key.to_string()), data);
    }

    /// Returns a copy of a stored object, if present.
    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        inner
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Number of completed objects.
    pub fn object_count(&self) -> usize {
        self.inner.lock().unwrap().objects.len()
    }

    /// Number of multipart uploads still staged.
    pub fn pending_uploads(&self) -> usize {
        self.inner.lock().unwrap().uploads.len()
    }
}

impl ObjectStore for MemoryStore {
    fn head_object<'a>(&'a self, bucket: &'a str, key: &'a str) -> StoreFuture<'a, ObjectInfo> {
        Box::pin(async move {
            let inner = self.inner.lock().unwrap();
            match inner.objects.get(&(bucket.to_string(), key.to_string())) {
                Some(data) => Ok(ObjectInfo {
                    size: data.len() as u64,
                }),
                None => Err(StorageError::ObjectNotFound {
                    bucket: bucket.into(),
                    key: key.into(),
                }),
            }
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
            let inner = self.inner.lock().unwrap();
            let data = inner
                .objects
                .get(&(bucket.to_string(), key.to_string()))
                .ok_or_else(|| StorageError::ObjectNotFound {
                    bucket: bucket.into(),
                    key: key.into(),
                })?;

            let size = data.len() as u64;
            if offset >= size {
                return Err(StorageError::InvalidRange { offset, size });
            }
            let start = offset as usize;
            let end = start.saturating_add(len).min(data.len());
            Ok(data[start..end].to_vec())
        })
    }

    fn start_multipart<'a>(&'a self, bucket: &'a str, key: &'a str) -> StoreFuture<'a, String> {
        Box::pin(async move {
            validate_bucket_name(bucket)?;
            validate_object_key(key)?;

            let mut inner = self.inner.lock().unwrap();
            inner.next_upload += 1;
            let upload_id = format!("mem-{}", inner.next_upload);
            inner.uploads.insert(
                upload_id.clone(),
                PendingUpload {
                    bucket: bucket.into(),
                    key: key.into(),
                    parts: BTreeMap::new(),
                },
            );
            Ok(upload_id)
        })
    }

    fn put_part<'a>(
        &'a self,
        _bucket: &'a str,
        _key: &'a str,
        upload_id: &'a str,
        part_number: u32,
        data: Vec<u8>,
    ) -> StoreFuture<'a, String> {
        Box::pin(async move {
            if part_number == 0 {
                return Err(StorageError::InvalidPart("part numbers are 1-based".into()));
            }
            let mut inner = self.inner.lock().unwrap();
            let upload = inner
                .uploads
                .get_mut(upload_id)
                .ok_or_else(|| StorageError::UnknownUpload(upload_id.into()))?;
            let etag = format!("etag-{upload_id}-{part_number}");
            upload.parts.insert(part_number, data);
            Ok(etag)
        })
    }

    fn complete_multipart<'a>(
        &'a self,
        _bucket: &'a str,
        _key: &'a str,
        upload_id: &'a str,
        parts: Vec<CompletedPart>,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            let upload = inner
                .uploads
                .remove(upload_id)
                .ok_or_else(|| StorageError::UnknownUpload(upload_id.into()))?;

            // The listed parts must cover exactly 1..=n and all be staged.
            for (i, part) in parts.iter().enumerate() {
                let expected = (i + 1) as u32;
                if part.part_number != expected {
                    inner.uploads.insert(upload_id.to_string(), upload);
                    return Err(StorageError::InvalidPart(format!(
                        "expected part {expected}, got {}",
                        part.part_number
                    )));
                }
                if !upload.parts.contains_key(&expected) {
                    inner.uploads.insert(upload_id.to_string(), upload);
                    return Err(StorageError::InvalidPart(format!(
                        "part {expected} was never uploaded"
                    )));
                }
            }
            if parts.len() != upload.parts.len() {
                let staged = upload.parts.len();
                inner.uploads.insert(upload_id.to_string(), upload);
                return Err(StorageError::InvalidPart(format!(
                    "completion lists {} parts but {staged} are staged",
                    parts.len()
                )));
            }

            let mut assembled = Vec::new();
            for (_, data) in upload.parts {
                assembled.extend_from_slice(&data);
            }
            inner
                .objects
                .insert((upload.bucket, upload.key), assembled);
            Ok(())
        })
    }

    fn abort_multipart<'a>(
        &'a self,
        _bucket: &'a str,
        _key: &'a str,
        upload_id: &'a str,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner
                .uploads
                .remove(upload_id)
                .map(|_| ())
                .ok_or_else(|| StorageError::UnknownUpload(upload_id.into()))
        })
    }

    fn delete_object<'a>(&'a self, bucket: &'a str, key: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner
                .objects
                .remove(&(bucket.to_string(), key.to_string()))
                .map(|_| ())
                .ok_or_else(|| StorageError::ObjectNotFound {
                    bucket: bucket.into(),
                    key: key.into(),
                })
        })
    }
}
