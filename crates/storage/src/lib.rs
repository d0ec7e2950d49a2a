//! Object storage interface consumed by the transfer core.
//!
//! The actual S3-compatible wire client (Wasabi, MinIO, ...) lives behind
//! [`ObjectStore`]; this crate ships two local implementations:
//! [`MemoryStore`] for tests and [`FsStore`] for running the relay against
//! a directory tree.

mod fs;
mod key;
mod memory;

use std::future::Future;
use std::pin::Pin;

pub use fs::FsStore;
pub use key::{sanitize_file_name, user_key, validate_bucket_name, validate_object_key};
pub use memory::MemoryStore;

/// A boxed future returned by [`ObjectStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// Errors produced by storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("backend unavailable (status {status})")]
    Unavailable { status: u16 },

    #[error("authentication rejected")]
    Auth,

    #[error("object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },

    #[error("storage quota exceeded")]
    QuotaExceeded,

    #[error("range starts at {offset} but object is {size} bytes")]
    InvalidRange { offset: u64, size: u64 },

    #[error("invalid part: {0}")]
    InvalidPart(String),

    #[error("unknown multipart upload: {0}")]
    UnknownUpload(String),

    #[error("invalid bucket: {0}")]
    InvalidBucket(String),

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Whether a retry of the same request may succeed.
    ///
    /// Timeouts and 5xx-equivalent unavailability are transient; auth,
    /// missing objects, quota, and malformed requests are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::Timeout(_) | StorageError::Unavailable { .. }
        )
    }
}

/// Object metadata returned by `head_object`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Object size in bytes.
    pub size: u64,
}

/// A part acknowledged by the backend, passed back on completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    /// 1-based part number.
    pub part_number: u32,
    /// Opaque receipt returned by `put_part`.
    pub etag: String,
}

/// The narrow storage surface the transfer core drives.
///
/// Methods return boxed futures so the trait stays object-safe; the
/// coordinator holds backends as `Arc<dyn ObjectStore>`.
pub trait ObjectStore: Send + Sync + 'static {
    /// Returns metadata for an object.
    fn head_object<'a>(&'a self, bucket: &'a str, key: &'a str) -> StoreFuture<'a, ObjectInfo>;

    /// Reads up to `len` bytes starting at `offset`.
    ///
    /// Returns fewer bytes only at the end of the object. An `offset` at or
    /// past the object size is [`StorageError::InvalidRange`].
    fn get_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        offset: u64,
        len: usize,
    ) -> StoreFuture<'a, Vec<u8>>;

    /// Begins a multipart upload and returns its id.
    fn start_multipart<'a>(&'a self, bucket: &'a str, key: &'a str) -> StoreFuture<'a, String>;

    /// Uploads one part (1-based `part_number`) and returns its etag.
    fn put_part<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        upload_id: &'a str,
        part_number: u32,
        data: Vec<u8>,
    ) -> StoreFuture<'a, String>;

    /// Assembles previously uploaded parts into the final object.
    ///
    /// `parts` must cover a contiguous 1-based range; anything else is
    /// [`StorageError::InvalidPart`].
    fn complete_multipart<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        upload_id: &'a str,
        parts: Vec<CompletedPart>,
    ) -> StoreFuture<'a, ()>;

    /// Discards a multipart upload and its staged parts.
    fn abort_multipart<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        upload_id: &'a str,
    ) -> StoreFuture<'a, ()>;

    /// Removes an object.
    fn delete_object<'a>(&'a self, bucket: &'a str, key: &'a str) -> StoreFuture<'a, ()>;
}
