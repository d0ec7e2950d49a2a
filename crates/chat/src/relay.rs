use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use stashbot_storage::{sanitize_file_name, user_key};
use stashbot_transfer::{
    Direction, ProgressEvent, SpeedCalculator, TaskId, TransferCoordinator, TransferRequest,
    TransferSnapshot,
};

use crate::{ChatError, ChatSink, format};

/// Delivery state for one tracked transfer.
struct Route {
    chat_id: i64,
    key: String,
    direction: Direction,
    speed: SpeedCalculator,
    last_bytes: u64,
}

/// Glue between the chat front end and the transfer coordinator.
///
/// Incoming files become uploads under the chat's `users/<id>/` prefix;
/// progress events flow back out as formatted messages through the
/// [`ChatSink`]. Chats are routed per task and forgotten once the
/// terminal message is delivered.
pub struct Relay {
    coordinator: Arc<TransferCoordinator>,
    sink: Arc<dyn ChatSink>,
    bucket: String,
    routes: Mutex<HashMap<TaskId, Route>>,
}

impl Relay {
    pub fn new(
        coordinator: Arc<TransferCoordinator>,
        sink: Arc<dyn ChatSink>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            coordinator,
            sink,
            bucket: bucket.into(),
            routes: Mutex::new(HashMap::new()),
        }
    }

    /// Submits an upload for a file received from a chat.
    ///
    /// The file name is sanitized and the object lands under the chat's
    /// own prefix.
    pub fn on_incoming_file(
        &self,
        chat_id: i64,
        local_path: PathBuf,
        file_name: &str,
    ) -> Result<TaskId, ChatError> {
        let name = sanitize_file_name(file_name);
        let key = user_key(chat_id, &name);

        let id = self.coordinator.submit(TransferRequest::upload(
            self.bucket.as_str(),
            key.clone(),
            local_path,
        ))?;
        self.track(id, chat_id, key.clone(), Direction::Upload);
        info!(task = %id, chat = chat_id, key, "upload accepted");
        Ok(id)
    }

    /// Submits a download of `key` into `dest_dir`.
    pub fn fetch(&self, chat_id: i64, key: &str, dest_dir: &Path) -> Result<TaskId, ChatError> {
        let file_name = sanitize_file_name(key);
        let dest = dest_dir.join(&file_name);

        let id = self
            .coordinator
            .submit(TransferRequest::download(self.bucket.as_str(), key, dest))?;
        self.track(id, chat_id, key.to_string(), Direction::Download);
        info!(task = %id, chat = chat_id, key, "download accepted");
        Ok(id)
    }

    /// Cancels a transfer on behalf of a chat command.
    pub fn cancel(&self, id: TaskId) -> Result<(), ChatError> {
        Ok(self.coordinator.cancel(id)?)
    }

    /// Returns the current snapshot of a transfer.
    pub fn status(&self, id: TaskId) -> Result<TransferSnapshot, ChatError> {
        Ok(self.coordinator.status(id)?)
    }

    /// Number of transfers still routed to a chat.
    pub fn tracked(&self) -> usize {
        self.routes.lock().unwrap().len()
    }

    fn track(&self, id: TaskId, chat_id: i64, key: String, direction: Direction) {
        self.routes.lock().unwrap().insert(
            id,
            Route {
                chat_id,
                key,
                direction,
                speed: SpeedCalculator::new(None, None),
                last_bytes: 0,
            },
        );
    }

    /// Consumes progress events and delivers formatted chat messages
    /// until the channel closes. Spawn this next to the coordinator.
    pub async fn run_pump(self: Arc<Self>, mut events: mpsc::Receiver<ProgressEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        debug!("progress pump stopped");
    }

    async fn handle_event(&self, event: ProgressEvent) {
        let terminal = event.state.is_terminal();

        // Format under the lock, deliver outside it.
        let (chat_id, text) = {
            let mut routes = self.routes.lock().unwrap();
            let Some(route) = routes.get_mut(&event.task_id) else {
                debug!(task = %event.task_id, "progress event for untracked task");
                return;
            };

            let delta = event.transferred_bytes.saturating_sub(route.last_bytes);
            route.last_bytes = event.transferred_bytes;
            if delta > 0 {
                route.speed.add_sample(delta);
            }

            let text = if terminal {
                format::render_result(route.direction, &route.key, &event)
            } else {
                let speed = route.speed.bytes_per_second();
                let eta = event.total_bytes.and_then(|total| {
                    route
                        .speed
                        .eta(total.saturating_sub(event.transferred_bytes))
                });
                format::render_progress(route.direction, &event, speed, eta)
            };

            let chat_id = route.chat_id;
            if terminal {
                routes.remove(&event.task_id);
            }
            (chat_id, text)
        };

        if let Err(e) = self.sink.send_text(chat_id, &text).await {
            warn!(chat = chat_id, error = %e, "failed to deliver progress message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChatFuture;
    use stashbot_storage::MemoryStore;
    use stashbot_transfer::{ChannelSink, CoordinatorConfig, RetryPolicy, TransferState};
    use std::time::Duration;
    use tempfile::TempDir;

    struct VecSink {
        messages: Mutex<Vec<(i64, String)>>,
    }

    impl VecSink {
        fn new() -> Self {
            Self {
                messages: Mutex::new(Vec::new()),
            }
        }

        fn snapshot(&self) -> Vec<(i64, String)> {
            self.messages.lock().unwrap().clone()
        }
    }

    impl ChatSink for VecSink {
        fn send_text<'a>(&'a self, chat_id: i64, text: &'a str) -> ChatFuture<'a, ()> {
            Box::pin(async move {
                self.messages.lock().unwrap().push((chat_id, text.to_string()));
                Ok(())
            })
        }
    }

    struct Fixture {
        relay: Arc<Relay>,
        store: Arc<MemoryStore>,
        chat: Arc<VecSink>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let (tx, rx) = mpsc::channel(1024);
        let config = CoordinatorConfig {
            max_concurrent: 2,
            chunk_size: 5,
            progress_interval: Duration::ZERO,
            retry: RetryPolicy {
                max_attempts: 2,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                backoff_factor: 2.0,
            },
            ..CoordinatorConfig::default()
        };
        let store_dyn: Arc<dyn stashbot_storage::ObjectStore> = store.clone();
        let coordinator = Arc::new(TransferCoordinator::new(
            config,
            store_dyn,
            Arc::new(ChannelSink::new(tx)),
        ));
        let chat = Arc::new(VecSink::new());
        let chat_dyn: Arc<dyn ChatSink> = chat.clone();
        let relay = Arc::new(Relay::new(coordinator, chat_dyn, "media"));
        tokio::spawn(Arc::clone(&relay).run_pump(rx));

        Fixture { relay, store, chat }
    }

    async fn wait_for_message(chat: &VecSink, needle: &str) -> (i64, String) {
        for _ in 0..1000 {
            if let Some(found) = chat
                .snapshot()
                .into_iter()
                .find(|(_, text)| text.contains(needle))
            {
                return found;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no message containing {needle:?} arrived");
    }

    #[tokio::test]
    async fn incoming_file_uploads_under_user_prefix() {
        let fx = fixture();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("spool.bin");
        std::fs::write(&path, b"0123456789!").unwrap();

        let id = fx
            .relay
            .on_incoming_file(42, path, "My Movie!.mkv")
            .unwrap();

        let (chat_id, text) = wait_for_message(&fx.chat, "✅").await;
        assert_eq!(chat_id, 42);
        assert!(text.contains("Upload complete"));
        assert!(text.contains("`users/42/My Movie.mkv`"));

        // Object landed under the sanitized, chat-scoped key.
        assert_eq!(
            fx.store.object("media", "users/42/My Movie.mkv").unwrap(),
            b"0123456789!"
        );
        assert_eq!(
            fx.relay.status(id).unwrap().state,
            TransferState::Completed
        );
        // The route is dropped after the terminal message.
        assert_eq!(fx.relay.tracked(), 0);
    }

    #[tokio::test]
    async fn fetch_downloads_into_directory() {
        let fx = fixture();
        let dir = TempDir::new().unwrap();
        fx.store
            .insert_object("media", "users/42/notes.txt", b"remember the milk".to_vec());

        fx.relay
            .fetch(42, "users/42/notes.txt", dir.path())
            .unwrap();

        let (chat_id, text) = wait_for_message(&fx.chat, "✅").await;
        assert_eq!(chat_id, 42);
        assert!(text.contains("Download complete"));

        let fetched = std::fs::read(dir.path().join("notes.txt")).unwrap();
        assert_eq!(&fetched, b"remember the milk");
    }

    #[tokio::test]
    async fn failed_upload_reports_failure() {
        let fx = fixture();

        // Spool file does not exist; the transfer fails at the first read.
        fx.relay
            .on_incoming_file(7, PathBuf::from("/nonexistent/spool.bin"), "x.bin")
            .unwrap();

        let (chat_id, text) = wait_for_message(&fx.chat, "❌").await;
        assert_eq!(chat_id, 7);
        assert!(text.contains("Upload failed"));
        assert_eq!(fx.relay.tracked(), 0);
    }

    #[tokio::test]
    async fn progress_messages_precede_completion() {
        let fx = fixture();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("spool.bin");
        std::fs::write(&path, vec![1u8; 25]).unwrap(); // 5 chunks of 5

        fx.relay.on_incoming_file(9, path, "clip.mp4").unwrap();
        wait_for_message(&fx.chat, "✅").await;

        let messages = fx.chat.snapshot();
        assert!(
            messages
                .iter()
                .any(|(_, text)| text.contains("Uploading...")),
            "expected at least one progress message, got {messages:?}"
        );
    }

    #[tokio::test]
    async fn unknown_task_passthrough_errors() {
        let fx = fixture();
        let ghost = TaskId::new();
        assert!(fx.relay.status(ghost).is_err());
        assert!(fx.relay.cancel(ghost).is_err());
    }

    #[tokio::test]
    async fn traversal_file_names_are_defanged() {
        let fx = fixture();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("spool.bin");
        std::fs::write(&path, b"data!").unwrap();

        fx.relay
            .on_incoming_file(3, path, "../../etc/passwd")
            .unwrap();
        wait_for_message(&fx.chat, "✅").await;

        // The name collapsed to its last component inside the user prefix.
        assert!(fx.store.object("media", "users/3/passwd").is_some());
    }
}
