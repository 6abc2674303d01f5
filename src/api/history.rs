//! Paginated conversation history
//!
//! Results are loose wire shapes; each page is coerced into strict
//! [`Message`] values at this boundary and handed to the engine as one
//! bulk-ingest batch. Malformed entries are logged and skipped.

use serde::Deserialize;

use crate::api::client::ApiClient;
use crate::config::HistoryConfig;
use crate::error::ChatError;
use crate::models::{Message, WireMessage};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryResponse {
    messages: Option<Vec<WireMessage>>,
    next_cursor: Option<String>,
}

/// One coerced page plus the cursor for the next one.
pub struct HistoryPage {
    pub messages: Vec<Message>,
    pub next_cursor: Option<String>,
}

/// Fetch one page of history for a conversation.
pub async fn fetch_page(
    client: &ApiClient,
    conversation_id: &str,
    cursor: Option<&str>,
    page_size: usize,
    local_user_id: i64,
) -> Result<HistoryPage, ChatError> {
    let mut path = format!(
        "/v1/conversations/{}/messages?pageSize={}",
        conversation_id, page_size
    );
    if let Some(cursor) = cursor {
        path.push_str(&format!("&cursor={}", cursor));
    }

    let resp = client.get(&path).await?;
    let body: HistoryResponse = resp
        .json()
        .await
        .map_err(|e| ChatError::Transport(format!("bad history response: {}", e)))?;

    let wires = body.messages.unwrap_or_default();
    let mut messages = Vec::with_capacity(wires.len());
    for wire in wires {
        match wire.into_message(local_user_id) {
            Ok(msg) => messages.push(msg),
            Err(e) => tracing::warn!("Skipping malformed history entry: {}", e),
        }
    }

    Ok(HistoryPage {
        messages,
        next_cursor: body.next_cursor,
    })
}

/// Fetch the initial backfill on conversation open, following cursors up
/// to the configured page limit. Ordering does not matter here; the
/// engine's sorted insert puts every page in its place.
pub async fn fetch_initial(
    client: &ApiClient,
    conversation_id: &str,
    cfg: &HistoryConfig,
    local_user_id: i64,
) -> Result<Vec<Message>, ChatError> {
    let mut all = Vec::new();
    let mut cursor: Option<String> = None;

    for _ in 0..cfg.max_pages.max(1) {
        let page = fetch_page(
            client,
            conversation_id,
            cursor.as_deref(),
            cfg.page_size,
            local_user_id,
        )
        .await?;
        all.extend(page.messages);
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    tracing::info!(
        "Loaded {} history messages for {}",
        all.len(),
        conversation_id
    );
    Ok(all)
}
