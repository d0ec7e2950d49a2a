use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use stashbot_storage::{CompletedPart, ObjectStore};

use crate::chunk::{Chunk, ChunkReader, ChunkSink};
use crate::progress::{DEFAULT_PROGRESS_INTERVAL, ProgressReporter, ProgressSink};
use crate::retry::RetryPolicy;
use crate::task::{Direction, TaskId, TransferRequest, TransferSnapshot, TransferState, TransferTask};
use crate::{DEFAULT_CHUNK_SIZE, TransferError};

/// Tuning knobs for a [`TransferCoordinator`].
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Worker pool size; at most this many transfers run in parallel.
    pub max_concurrent: usize,
    /// Pending-queue bound; submissions beyond it are rejected.
    pub queue_bound: usize,
    /// Chunk size for both directions.
    pub chunk_size: usize,
    /// Minimum spacing between progress events per task.
    pub progress_interval: Duration,
    /// How long terminal tasks stay queryable before garbage collection.
    pub retention: Duration,
    /// Retry behavior for each storage step.
    pub retry: RetryPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            queue_bound: 32,
            chunk_size: DEFAULT_CHUNK_SIZE,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            retention: Duration::from_secs(300),
            retry: RetryPolicy::default(),
        }
    }
}

/// Shared state handed to every worker. Avoids threading six parameters
/// through the transfer loops.
#[derive(Clone)]
struct WorkerContext {
    store: Arc<dyn ObjectStore>,
    sink: Arc<dyn ProgressSink>,
    chunk_size: usize,
    progress_interval: Duration,
    retry: RetryPolicy,
    shutdown: CancellationToken,
}

/// Owns the task table and a bounded pool of transfer workers.
///
/// Admission is FIFO: tasks enter a bounded queue at submit and the
/// oldest pending task is promoted whenever a worker frees up. The task
/// table is process-local; a restart forgets all transfers.
pub struct TransferCoordinator {
    tasks: Arc<Mutex<HashMap<TaskId, Arc<TransferTask>>>>,
    queue_tx: mpsc::Sender<Arc<TransferTask>>,
    shutdown: CancellationToken,
}

impl TransferCoordinator {
    /// Builds the coordinator and spawns its worker pool and sweeper.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: CoordinatorConfig,
        store: Arc<dyn ObjectStore>,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        let max_concurrent = config.max_concurrent.max(1);
        let queue_bound = config.queue_bound.max(1);

        let (queue_tx, queue_rx) = mpsc::channel::<Arc<TransferTask>>(queue_bound);
        let queue_rx = Arc::new(tokio::sync::Mutex::new(queue_rx));
        let tasks: Arc<Mutex<HashMap<TaskId, Arc<TransferTask>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let shutdown = CancellationToken::new();

        let ctx = WorkerContext {
            store,
            sink,
            chunk_size: config.chunk_size.max(1),
            progress_interval: config.progress_interval,
            retry: config.retry.clone(),
            shutdown: shutdown.clone(),
        };

        for worker in 0..max_concurrent {
            tokio::spawn(worker_loop(worker, Arc::clone(&queue_rx), ctx.clone()));
        }
        tokio::spawn(sweeper_loop(
            Arc::clone(&tasks),
            config.retention,
            shutdown.clone(),
        ));

        info!(
            workers = max_concurrent,
            queue_bound,
            chunk_size = ctx.chunk_size,
            "transfer coordinator started"
        );

        Self {
            tasks,
            queue_tx,
            shutdown,
        }
    }

    /// Validates and enqueues a transfer. Returns the task id.
    ///
    /// Fails with [`TransferError::Capacity`] when the pending queue is
    /// full (every worker busy and the backlog at its bound).
    pub fn submit(&self, request: TransferRequest) -> Result<TaskId, TransferError> {
        request.validate()?;
        if self.shutdown.is_cancelled() {
            return Err(TransferError::Shutdown);
        }

        let task = Arc::new(TransferTask::new(request));
        let id = task.id();
        self.tasks.lock().unwrap().insert(id, Arc::clone(&task));

        match self.queue_tx.try_send(task) {
            Ok(()) => {
                debug!(task = %id, "transfer queued");
                Ok(id)
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.tasks.lock().unwrap().remove(&id);
                warn!(task = %id, "transfer rejected, queue full");
                Err(TransferError::Capacity)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.tasks.lock().unwrap().remove(&id);
                Err(TransferError::Shutdown)
            }
        }
    }

    /// Marks a task cancelled.
    ///
    /// An active transfer finishes its in-flight chunk and stops at the
    /// next boundary; a queued task is skipped when dequeued.
    pub fn cancel(&self, id: TaskId) -> Result<(), TransferError> {
        let task = self.lookup(id)?;
        task.cancel();
        info!(task = %id, "cancel requested");
        Ok(())
    }

    /// Returns a point-in-time snapshot of a task.
    pub fn status(&self, id: TaskId) -> Result<TransferSnapshot, TransferError> {
        Ok(self.lookup(id)?.snapshot())
    }

    /// Number of tasks currently tracked (any state).
    pub fn task_count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    /// Number of tasks currently running.
    pub fn active_count(&self) -> usize {
        self.tasks
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.state() == TransferState::Active)
            .count()
    }

    /// Stops workers and the sweeper. Active transfers stop at their
    /// next chunk boundary and are marked cancelled.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn lookup(&self, id: TaskId) -> Result<Arc<TransferTask>, TransferError> {
        self.tasks
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(TransferError::NotFound(id))
    }
}

async fn worker_loop(
    worker: usize,
    queue_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Arc<TransferTask>>>>,
    ctx: WorkerContext,
) {
    loop {
        let task = tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            task = async { queue_rx.lock().await.recv().await } => match task {
                Some(task) => task,
                None => break,
            },
        };
        run_task(&ctx, task).await;
    }
    debug!(worker, "transfer worker stopped");
}

async fn sweeper_loop(
    tasks: Arc<Mutex<HashMap<TaskId, Arc<TransferTask>>>>,
    retention: Duration,
    shutdown: CancellationToken,
) {
    let period = (retention / 4).max(Duration::from_millis(100));
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let mut table = tasks.lock().unwrap();
                let before = table.len();
                table.retain(|_, task| {
                    task.terminal_age().is_none_or(|age| age < retention)
                });
                let swept = before - table.len();
                if swept > 0 {
                    debug!(swept, "garbage-collected terminal tasks");
                }
            }
        }
    }
}

async fn run_task(ctx: &WorkerContext, task: Arc<TransferTask>) {
    // Cancelled while still queued.
    if task.state() != TransferState::Pending {
        debug!(task = %task.id(), state = ?task.state(), "skipping dequeued task");
        return;
    }
    if task.start().is_err() {
        return;
    }

    info!(
        task = %task.id(),
        direction = ?task.direction(),
        bucket = task.bucket(),
        key = task.key(),
        "transfer started"
    );

    let mut reporter = ProgressReporter::new(Arc::clone(&ctx.sink), ctx.progress_interval);
    reporter.tick(&task);

    let result = match task.direction() {
        Direction::Upload => run_upload(ctx, &task, &mut reporter).await,
        Direction::Download => run_download(ctx, &task, &mut reporter).await,
    };

    match result {
        Ok(()) => {
            // No-op if a cancel raced the final chunk; Cancelled wins.
            task.complete();
            info!(
                task = %task.id(),
                bytes = task.transferred_bytes(),
                "transfer completed"
            );
        }
        Err(TransferError::Cancelled) => {
            info!(task = %task.id(), "transfer cancelled");
        }
        Err(TransferError::Shutdown) => {
            task.cancel();
            info!(task = %task.id(), "transfer stopped by shutdown");
        }
        Err(e) => {
            warn!(task = %task.id(), error = %e, "transfer failed");
            task.fail(&e);
        }
    }
    reporter.finish(&task);
}

/// Cooperative stop point, checked between chunks only.
fn boundary_check(ctx: &WorkerContext, task: &TransferTask) -> Result<(), TransferError> {
    if task.state() == TransferState::Cancelled {
        return Err(TransferError::Cancelled);
    }
    if ctx.shutdown.is_cancelled() {
        return Err(TransferError::Shutdown);
    }
    Ok(())
}

async fn run_upload(
    ctx: &WorkerContext,
    task: &TransferTask,
    reporter: &mut ProgressReporter,
) -> Result<(), TransferError> {
    let bucket = task.bucket();
    let key = task.key();

    let mut reader = ChunkReader::from_path(task.local_path(), ctx.chunk_size)?;
    task.resolve_total(reader.total_len());

    let upload_id = ctx
        .retry
        .run(&ctx.shutdown, || {
            let store = Arc::clone(&ctx.store);
            let (b, k) = (bucket, key);
            async move { Ok(store.start_multipart(b, k).await?) }
        })
        .await?;

    let mut parts: Vec<CompletedPart> = Vec::new();
    let mut part_number = 1u32;

    loop {
        if let Err(e) = boundary_check(ctx, task) {
            abort_upload(ctx, bucket, key, &upload_id).await;
            return Err(e);
        }

        let Some(chunk) = reader.next_chunk()? else {
            break;
        };

        let put = ctx
            .retry
            .run(&ctx.shutdown, || {
                let store = Arc::clone(&ctx.store);
                let (b, k, id) = (bucket, key, upload_id.as_str());
                let data = chunk.data.clone();
                async move { Ok(store.put_part(b, k, id, part_number, data).await?) }
            })
            .await;

        match put {
            Ok(etag) => parts.push(CompletedPart { part_number, etag }),
            Err(e) => {
                abort_upload(ctx, bucket, key, &upload_id).await;
                return Err(e);
            }
        }

        part_number += 1;
        task.record_progress(chunk.len as u64);
        reporter.tick(task);
    }

    let completed = ctx
        .retry
        .run(&ctx.shutdown, || {
            let store = Arc::clone(&ctx.store);
            let (b, k, id) = (bucket, key, upload_id.as_str());
            let parts = parts.clone();
            async move { Ok(store.complete_multipart(b, k, id, parts).await?) }
        })
        .await;

    if let Err(e) = completed {
        abort_upload(ctx, bucket, key, &upload_id).await;
        return Err(e);
    }
    Ok(())
}

async fn abort_upload(ctx: &WorkerContext, bucket: &str, key: &str, upload_id: &str) {
    // Best effort; staged parts on a dead backend just age out.
    if let Err(e) = ctx.store.abort_multipart(bucket, key, upload_id).await {
        debug!(bucket, key, upload_id, error = %e, "abort of multipart upload failed");
    }
}

async fn run_download(
    ctx: &WorkerContext,
    task: &TransferTask,
    reporter: &mut ProgressReporter,
) -> Result<(), TransferError> {
    let bucket = task.bucket();
    let key = task.key();

    let total = match task.total_bytes() {
        Some(total) => total,
        None => {
            let info = ctx
                .retry
                .run(&ctx.shutdown, || {
                    let store = Arc::clone(&ctx.store);
                    let (b, k) = (bucket, key);
                    async move { Ok(store.head_object(b, k).await?) }
                })
                .await?;
            task.resolve_total(info.size);
            info.size
        }
    };

    if let Some(parent) = task.local_path().parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(task.local_path())?;
    let mut sink = ChunkSink::new(file);

    let mut offset = 0u64;
    while offset < total {
        boundary_check(ctx, task)?;

        let want = ctx.chunk_size.min((total - offset) as usize);
        let data = ctx
            .retry
            .run(&ctx.shutdown, || {
                let store = Arc::clone(&ctx.store);
                let (b, k) = (bucket, key);
                async move { Ok(store.get_object(b, k, offset, want).await?) }
            })
            .await?;

        if data.is_empty() {
            return Err(TransferError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "backend returned an empty range",
            )));
        }

        let len = data.len();
        sink.apply(&Chunk {
            offset,
            len,
            data,
            checksum: String::new(),
        })?;
        offset += len as u64;
        task.record_progress(len as u64);
        reporter.tick(task);
    }

    sink.into_inner()?;
    Ok(())
}
