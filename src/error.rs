//! Error taxonomy for the sync engine
//!
//! Connection-level failures never propagate as panics or cross into the
//! timeline; they become state transitions or per-message status changes.

use thiserror::Error;

/// Errors surfaced by the chat engine.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Connect or send failure on the push channel, or a failed history
    /// fetch. Retried per backoff policy or reflected as a `failed`
    /// delivery status; never affects already-admitted messages.
    #[error("transport error: {0}")]
    Transport(String),

    /// Rejected input: an empty send, or an inbound payload missing
    /// required fields. Malformed payloads are logged and dropped at the
    /// ingest boundary rather than partially admitted.
    #[error("validation error: {0}")]
    Validation(String),

    /// Attachment upload failure. Aborts the send before any optimistic
    /// message is created.
    #[error("upload error: {0}")]
    Upload(String),

    /// A network result that returned after the conversation closed or
    /// the connection generation changed. Discarded silently.
    #[error("stale result: {0}")]
    Stale(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for ChatError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ChatError::Transport(e.to_string())
    }
}
