use std::fmt;
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::TransferError;

/// Opaque unique token identifying a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Which way bytes move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    /// Local file to object storage.
    Upload,
    /// Object storage to local file.
    Download,
}

/// Transfer lifecycle: `Pending -> Active -> {Completed, Failed, Cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransferState {
    Pending,
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl TransferState {
    /// Terminal states never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Completed | TransferState::Failed | TransferState::Cancelled
        )
    }
}

/// A transfer submission: direction plus source and destination handles.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub direction: Direction,
    /// Destination (upload) or source (download) bucket.
    pub bucket: String,
    /// Object key within the bucket.
    pub key: String,
    /// Local file: source for uploads, destination for downloads.
    pub local_path: PathBuf,
    /// Total size, when the caller already knows it.
    pub total_bytes: Option<u64>,
}

impl TransferRequest {
    /// Builds an upload request: `local_path` into `bucket/key`.
    pub fn upload(bucket: impl Into<String>, key: impl Into<String>, local_path: PathBuf) -> Self {
        Self {
            direction: Direction::Upload,
            bucket: bucket.into(),
            key: key.into(),
            local_path,
            total_bytes: None,
        }
    }

    /// Builds a download request: `bucket/key` into `local_path`.
    pub fn download(
        bucket: impl Into<String>,
        key: impl Into<String>,
        local_path: PathBuf,
    ) -> Self {
        Self {
            direction: Direction::Download,
            bucket: bucket.into(),
            key: key.into(),
            local_path,
            total_bytes: None,
        }
    }

    /// Sets a known total size.
    pub fn with_total_bytes(mut self, total: u64) -> Self {
        self.total_bytes = Some(total);
        self
    }

    /// Checks the request shape.
    pub fn validate(&self) -> Result<(), TransferError> {
        stashbot_storage::validate_bucket_name(&self.bucket)
            .map_err(|e| TransferError::Validation(e.to_string()))?;
        stashbot_storage::validate_object_key(&self.key)
            .map_err(|e| TransferError::Validation(e.to_string()))?;
        if self.local_path.as_os_str().is_empty() {
            return Err(TransferError::Validation("empty local path".into()));
        }
        Ok(())
    }
}

/// Point-in-time view of a task, safe to hand to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSnapshot {
    pub id: TaskId,
    pub direction: Direction,
    pub bucket: String,
    pub key: String,
    pub state: TransferState,
    pub transferred_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One upload or download, tracked for its whole lifetime (thread-safe).
///
/// Owned by the coordinator; workers only touch their own task's counters.
pub struct TransferTask {
    id: TaskId,
    direction: Direction,
    bucket: String,
    key: String,
    local_path: PathBuf,
    inner: RwLock<TaskInner>,
}

struct TaskInner {
    state: TransferState,
    /// Fixed once known; set at creation or resolved once while Active.
    total_bytes: Option<u64>,
    transferred_bytes: u64,
    last_error: Option<String>,
    completed_at: Option<Instant>,
}

impl TransferTask {
    /// Creates a new pending task from a validated request.
    pub fn new(request: TransferRequest) -> Self {
        Self {
            id: TaskId::new(),
            direction: request.direction,
            bucket: request.bucket,
            key: request.key,
            local_path: request.local_path,
            inner: RwLock::new(TaskInner {
                state: TransferState::Pending,
                total_bytes: request.total_bytes,
                transferred_bytes: 0,
                last_error: None,
                completed_at: None,
            }),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn local_path(&self) -> &std::path::Path {
        &self.local_path
    }

    /// Pending -> Active. Any other starting state is an error.
    pub fn start(&self) -> Result<(), TransferError> {
        let mut inner = self.inner.write().unwrap();
        if inner.state != TransferState::Pending {
            return Err(TransferError::InvalidState {
                op: "start",
                state: inner.state,
            });
        }
        inner.state = TransferState::Active;
        Ok(())
    }

    /// Pending or Active -> Cancelled. No-op once terminal.
    pub fn cancel(&self) {
        let mut inner = self.inner.write().unwrap();
        if inner.state.is_terminal() {
            return;
        }
        inner.state = TransferState::Cancelled;
        inner.completed_at = Some(Instant::now());
    }

    /// Active -> Completed. No-op if the task already reached a terminal
    /// state (a cancel that raced the final chunk wins).
    pub fn complete(&self) {
        let mut inner = self.inner.write().unwrap();
        if inner.state != TransferState::Active {
            return;
        }
        inner.state = TransferState::Completed;
        inner.completed_at = Some(Instant::now());
    }

    /// Any non-terminal state -> Failed, recording the error. No-op once
    /// terminal.
    pub fn fail(&self, error: &TransferError) {
        let mut inner = self.inner.write().unwrap();
        if inner.state.is_terminal() {
            return;
        }
        inner.state = TransferState::Failed;
        inner.last_error = Some(error.to_string());
        inner.completed_at = Some(Instant::now());
    }

    /// Adds transferred bytes. Counted only while Active, so the counter
    /// is monotonically non-decreasing for the task's whole life.
    pub fn record_progress(&self, bytes: u64) {
        let mut inner = self.inner.write().unwrap();
        if inner.state == TransferState::Active {
            inner.transferred_bytes += bytes;
        }
    }

    /// Fills in the total size when it was unknown at submit (downloads).
    /// A total that is already known never changes.
    pub fn resolve_total(&self, total: u64) {
        let mut inner = self.inner.write().unwrap();
        if inner.total_bytes.is_none() && !inner.state.is_terminal() {
            inner.total_bytes = Some(total);
        }
    }

    pub fn state(&self) -> TransferState {
        self.inner.read().unwrap().state
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn transferred_bytes(&self) -> u64 {
        self.inner.read().unwrap().transferred_bytes
    }

    pub fn total_bytes(&self) -> Option<u64> {
        self.inner.read().unwrap().total_bytes
    }

    /// Time since the task reached a terminal state, if it has.
    pub fn terminal_age(&self) -> Option<Duration> {
        self.inner
            .read()
            .unwrap()
            .completed_at
            .map(|at| at.elapsed())
    }

    /// Returns a serializable point-in-time view.
    pub fn snapshot(&self) -> TransferSnapshot {
        let inner = self.inner.read().unwrap();
        TransferSnapshot {
            id: self.id,
            direction: self.direction,
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            state: inner.state,
            transferred_bytes: inner.transferred_bytes,
            total_bytes: inner.total_bytes,
            error: inner.last_error.clone(),
        }
    }
}
