//! Daemon wiring: storage, coordinator, relay, shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use tokio::sync::mpsc;
use tracing::{info, warn};

use stashbot_chat::{ChatFuture, ChatSink, Relay};
use stashbot_storage::{FsStore, ObjectStore};
use stashbot_transfer::{ChannelSink, TransferCoordinator, TransferState};

use crate::config::RelayConfig;

/// Chat id used for the startup self-check transfer.
const SELF_CHECK_CHAT: i64 = 0;

/// [`ChatSink`] that writes messages to the log.
///
/// Stands in for a bot front end until one is wired to the relay.
struct LogSink;

impl ChatSink for LogSink {
    fn send_text<'a>(&'a self, chat_id: i64, text: &'a str) -> ChatFuture<'a, ()> {
        Box::pin(async move {
            info!(chat = chat_id, message = text, "chat message");
            Ok(())
        })
    }
}

pub async fn run(config: RelayConfig) -> anyhow::Result<()> {
    let storage_root = config.storage_root_path();
    let store =
        Arc::new(FsStore::new(&storage_root).context("failed to open local object store")?);
    info!(root = %storage_root.display(), bucket = %config.bucket, "object store ready");

    let (events_tx, events_rx) = mpsc::channel(256);
    let store_dyn: Arc<dyn ObjectStore> = store.clone();
    let coordinator = Arc::new(TransferCoordinator::new(
        config.coordinator_config(),
        store_dyn,
        Arc::new(ChannelSink::new(events_tx)),
    ));
    let relay = Arc::new(Relay::new(
        Arc::clone(&coordinator),
        Arc::new(LogSink),
        config.bucket.clone(),
    ));
    let pump = tokio::spawn(Arc::clone(&relay).run_pump(events_rx));

    self_check(&relay, store.as_ref(), &config.bucket).await?;
    info!("relay ready, waiting for shutdown signal");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    coordinator.shutdown();
    // Workers drop their event senders on exit, which ends the pump.
    if tokio::time::timeout(Duration::from_secs(5), pump).await.is_err() {
        warn!("progress pump did not stop in time");
    }
    Ok(())
}

/// Pushes one small transfer through the whole stack so a broken
/// storage root fails the boot instead of the first real upload.
async fn self_check(relay: &Relay, store: &dyn ObjectStore, bucket: &str) -> anyhow::Result<()> {
    let spool = std::env::temp_dir().join(format!("stashbot-selfcheck-{}", std::process::id()));
    std::fs::write(&spool, b"stashbot self check")?;

    let id = relay
        .on_incoming_file(SELF_CHECK_CHAT, spool.clone(), "selfcheck.bin")
        .context("self-check submit failed")?;

    let mut state = TransferState::Pending;
    for _ in 0..300 {
        state = relay.status(id).map(|s| s.state).unwrap_or(state);
        if state.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let key = format!("users/{SELF_CHECK_CHAT}/selfcheck.bin");
    let _ = store.delete_object(bucket, &key).await;
    let _ = std::fs::remove_file(&spool);

    if state != TransferState::Completed {
        bail!("storage self-check ended in {state:?}");
    }
    info!("storage self-check passed");
    Ok(())
}
