//! hearth-chat - console front-end for one support conversation
//!
//! Connects the sync engine to a chat backend and drives it from stdin.
//! Lines are sent as messages; `/retry <id>`, `/reconnect` and `/quit`
//! exercise the manual affordances.

use std::collections::HashSet;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hearth_chat::{
    ChatConfig, ChatHandle, ChatSession, Identity, Message, Notification, SessionParams,
};

#[derive(Parser)]
#[command(name = "hearth-chat")]
#[command(about = "Support-chat console client", long_about = None)]
struct Cli {
    /// REST base URL (history fetch, uploads)
    #[arg(long)]
    api_url: String,

    /// WebSocket push URL
    #[arg(long)]
    ws_url: String,

    /// Conversation identifier
    #[arg(long)]
    conversation: String,

    /// Local user id
    #[arg(long)]
    user_id: i64,

    /// Display name
    #[arg(long, default_value = "")]
    name: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = ChatConfig::load().context("Failed to load config")?;
    let identity = Identity {
        user_id: Some(cli.user_id),
        user_name: cli.name.clone(),
    };
    let params = SessionParams {
        api_url: cli.api_url.clone(),
        ws_url: cli.ws_url.clone(),
        conversation_id: cli.conversation.clone(),
    };

    let (handle, mut notifications) = ChatSession::open(config, params, identity);

    // Print notifications as they arrive.
    let printer_handle = handle.clone();
    tokio::spawn(async move {
        let mut printed = HashSet::new();
        while let Some(note) = notifications.recv().await {
            print_notification(&printer_handle, note, &mut printed).await;
        }
    });

    println!("Connected to {}. Type to chat, /quit to exit.", cli.conversation);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("stdin read failed")? else { break };
                if !handle_input(&handle, line.trim()) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Shutting down...");
                break;
            }
        }
    }

    handle.close();
    Ok(())
}

/// Returns `false` when the user asked to quit.
fn handle_input(handle: &ChatHandle, line: &str) -> bool {
    match line {
        "" => {}
        "/quit" => return false,
        "/reconnect" => handle.reconnect(),
        _ if line.starts_with("/retry ") => match line["/retry ".len()..].trim().parse() {
            Ok(id) => handle.retry(id),
            Err(_) => println!("Usage: /retry <message-id>"),
        },
        _ if line.starts_with("/attach ") => {
            let path = line["/attach ".len()..].trim().to_string();
            let handle = handle.clone();
            tokio::spawn(async move {
                attach_file(&handle, &path).await;
            });
        }
        _ => handle.send(line, Vec::new()),
    }
    true
}

/// Upload a local file and send it as an attachment-only message.
async fn attach_file(handle: &ChatHandle, path: &str) {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            println!("(cannot read {}: {})", path, e);
            return;
        }
    };
    let name = std::path::Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file")
        .to_string();
    if let Err(e) = handle.send_with_files("", vec![(name, bytes)]).await {
        println!("(attachment failed: {})", e);
    }
}

/// Entries not yet printed, in timeline order. A history page can insert
/// anywhere in the timeline, not just at the tail.
fn unseen<'a>(snapshot: &'a [Message], printed: &mut HashSet<i64>) -> Vec<&'a Message> {
    snapshot.iter().filter(|m| printed.insert(m.id)).collect()
}

async fn print_notification(handle: &ChatHandle, note: Notification, printed: &mut HashSet<i64>) {
    match note {
        Notification::TimelineChanged { inserted, .. } if inserted > 0 => {
            let snapshot = handle.snapshot().await;
            for msg in unseen(&snapshot, printed) {
                println!(
                    "[{}] {} ({:?}): {}",
                    msg.sent_at.format("%H:%M:%S"),
                    msg.sender_name,
                    msg.delivery_status,
                    msg.body
                );
            }
        }
        Notification::TimelineChanged { .. } => {}
        Notification::StatusChanged { id, status } => {
            println!("(message {} is now {:?})", id, status);
        }
        Notification::ConnectionChanged(state) => {
            println!("(connection: {})", state);
        }
        Notification::RetriesExhausted => {
            println!("(disconnected; type /reconnect to retry)");
        }
        Notification::PeerTyping(true) => println!("(agent is typing...)"),
        Notification::PeerTyping(false) => {}
        Notification::PeerJoined { name } => println!("({} joined)", name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use hearth_chat::{DeliveryStatus, Direction};

    fn msg(id: i64, minute: u32) -> Message {
        Message {
            id,
            body: format!("msg {}", id),
            sender_id: 7,
            sender_name: "Agent".into(),
            sent_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap(),
            direction: Direction::Inbound,
            delivery_status: DeliveryStatus::Sent,
            attachments: Vec::new(),
        }
    }

    #[test]
    fn test_unseen_finds_history_inserted_before_tail() {
        let mut printed = HashSet::new();

        // Live messages arrive first.
        let snapshot = vec![msg(10, 30), msg(11, 31)];
        let new: Vec<i64> = unseen(&snapshot, &mut printed).iter().map(|m| m.id).collect();
        assert_eq!(new, vec![10, 11]);

        // A late history page sorts in before the live entries.
        let snapshot = vec![msg(5, 25), msg(10, 30), msg(11, 31)];
        let new: Vec<i64> = unseen(&snapshot, &mut printed).iter().map(|m| m.id).collect();
        assert_eq!(new, vec![5]);

        // Nothing new: nothing printed twice.
        assert!(unseen(&snapshot, &mut printed).is_empty());
    }
}
