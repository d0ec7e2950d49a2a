//! Concurrent chunked transfer core.
//!
//! A [`TransferCoordinator`] owns a bounded pool of workers that drive
//! [`TransferTask`]s between local files and an
//! [`ObjectStore`](stashbot_storage::ObjectStore): uploads as multipart
//! parts, downloads as ranged reads. Chunking, throttled progress, and
//! transient-failure retry live in their own modules.

mod chunk;
mod coordinator;
mod progress;
mod retry;
mod task;

pub use chunk::{Chunk, ChunkReader, ChunkSink, checksum_bytes};
pub use coordinator::{CoordinatorConfig, TransferCoordinator};
pub use progress::{
    ChannelSink, DEFAULT_PROGRESS_INTERVAL, ProgressEvent, ProgressReporter, ProgressSink,
    SpeedCalculator,
};
pub use retry::RetryPolicy;
pub use task::{
    Direction, TaskId, TransferRequest, TransferSnapshot, TransferState, TransferTask,
};

use stashbot_storage::StorageError;

/// Default chunk size: 5 MiB.
///
/// Large enough to keep per-chunk overhead (checksums, part round-trips)
/// low, small enough that progress and cancellation stay responsive.
pub const DEFAULT_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// Errors produced by the transfer core.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("transfer queue full")]
    Capacity,

    #[error("chunk out of order: expected offset {expected}, got {got}")]
    Sequence { expected: u64, got: u64 },

    #[error("checksum mismatch at offset {offset}")]
    Checksum { offset: u64 },

    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("{op} not allowed from state {state:?}")]
    InvalidState {
        op: &'static str,
        state: TransferState,
    },

    #[error("transfer cancelled")]
    Cancelled,

    #[error("coordinator is shutting down")]
    Shutdown,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl TransferError {
    /// Whether [`RetryPolicy`] should retry the failed step.
    ///
    /// Only backend timeouts and 5xx-equivalents qualify; local I/O and
    /// every caller mistake fail fast.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransferError::Storage(e) if e.is_transient())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(TransferError::Storage(StorageError::Timeout("t".into())).is_transient());
        assert!(TransferError::Storage(StorageError::Unavailable { status: 503 }).is_transient());

        assert!(!TransferError::Storage(StorageError::Auth).is_transient());
        assert!(!TransferError::Capacity.is_transient());
        assert!(!TransferError::Validation("x".into()).is_transient());
        assert!(
            !TransferError::Io(std::io::Error::other("disk")).is_transient()
        );
    }
}
