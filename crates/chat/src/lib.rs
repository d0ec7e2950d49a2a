//! Chat-facing glue for the transfer relay.
//!
//! The messaging front end (bot framework, command grammar, auth) stays
//! outside this workspace; it talks to [`Relay`] through two narrow
//! seams: incoming files/fetches go in, formatted progress and result
//! messages come back out through a [`ChatSink`].

mod format;
mod relay;

use std::future::Future;
use std::pin::Pin;

pub use format::{format_duration, human_bytes, progress_bar, render_progress, render_result};
pub use relay::Relay;

use stashbot_transfer::TransferError;

/// A boxed future returned by [`ChatSink`] methods.
pub type ChatFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ChatError>> + Send + 'a>>;

/// Errors produced by the chat layer.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message delivery failed: {0}")]
    Delivery(String),

    #[error(transparent)]
    Transfer(#[from] TransferError),
}

/// Outbound half of the chat front end.
///
/// Implementations deliver a text message to a chat; the relay never
/// assumes anything about the transport behind it.
pub trait ChatSink: Send + Sync + 'static {
    fn send_text<'a>(&'a self, chat_id: i64, text: &'a str) -> ChatFuture<'a, ()>;
}
