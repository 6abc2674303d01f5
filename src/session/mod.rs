//! Per-conversation session: the single writer of the timeline
//!
//! One actor task owns the reconciliation engine, the typing coordinator
//! and the viewport policy. Every producer — handle commands, the
//! connection task's inbound stream, the history loader, send results —
//! funnels through this task's one event loop, so no two ingests can
//! interleave mid-mutation no matter how the producers are scheduled.
//!
//! The session is constructed on conversation open and torn down on
//! close; nothing here is process-wide.

use std::time::Instant;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time;

use crate::api::{history, upload, ApiClient};
use crate::config::ChatConfig;
use crate::connection::{self, ConnectionEvent, ConnectionHandle, ConnectionState};
use crate::error::ChatError;
use crate::identity::Identity;
use crate::models::{Attachment, DeliveryStatus, Message, PushEvent};
use crate::outbound::{self, ProvisionalIds};
use crate::timeline::{IngestOutcome, Timeline};
use crate::typing::TypingCoordinator;
use crate::viewport::{ScrollAction, ViewportPolicy};

/// Where one conversation lives.
#[derive(Debug, Clone)]
pub struct SessionParams {
    /// REST base for history fetch and uploads.
    pub api_url: String,
    /// Push endpoint.
    pub ws_url: String,
    pub conversation_id: String,
}

/// Commands from the consumer (rendering layer).
pub enum Command {
    Send {
        body: String,
        attachments: Vec<Attachment>,
    },
    Retry {
        id: i64,
    },
    NotifyTyping {
        draft: String,
    },
    Reconnect,
    ScrollChanged {
        from_bottom_px: u32,
    },
    ScrollBottomReached,
    SetIdentity(Identity),
    Snapshot {
        reply: oneshot::Sender<Vec<Message>>,
    },
    Close,
}

/// Notifications to the consumer. None of these block rendering of
/// already-admitted messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// The timeline grew by `inserted` entries (0 means a resync or a
    /// merge-only change), with the viewport decision attached.
    TimelineChanged {
        inserted: usize,
        scroll: ScrollAction,
    },
    /// One message's delivery status changed (failure, retry, receipt).
    StatusChanged {
        id: i64,
        status: DeliveryStatus,
    },
    ConnectionChanged(ConnectionState),
    /// Automatic reconnects gave up; show the manual-retry affordance.
    RetriesExhausted,
    PeerTyping(bool),
    PeerJoined {
        name: String,
    },
}

enum InternalEvent {
    HistoryBatch(Vec<Message>),
    SendResult {
        id: i64,
        result: Result<(), ChatError>,
    },
}

/// Cloneable handle the rendering layer drives the session with.
#[derive(Clone)]
pub struct ChatHandle {
    cmds: mpsc::UnboundedSender<Command>,
    api: ApiClient,
}

impl ChatHandle {
    pub fn send(&self, body: impl Into<String>, attachments: Vec<Attachment>) {
        let _ = self.cmds.send(Command::Send {
            body: body.into(),
            attachments,
        });
    }

    /// Upload files, then send one message carrying them. An upload
    /// failure aborts the whole send before any optimistic message is
    /// created; no partial entry appears in the timeline.
    pub async fn send_with_files(
        &self,
        body: impl Into<String>,
        files: Vec<(String, Vec<u8>)>,
    ) -> Result<(), ChatError> {
        let mut attachments = Vec::with_capacity(files.len());
        for (name, bytes) in files {
            attachments.push(upload::upload_attachment(&self.api, &name, bytes).await?);
        }
        self.send(body, attachments);
        Ok(())
    }

    pub fn retry(&self, id: i64) {
        let _ = self.cmds.send(Command::Retry { id });
    }

    /// Call on every keystroke; the coordinator debounces internally.
    pub fn notify_typing(&self, draft: impl Into<String>) {
        let _ = self.cmds.send(Command::NotifyTyping {
            draft: draft.into(),
        });
    }

    pub fn reconnect(&self) {
        let _ = self.cmds.send(Command::Reconnect);
    }

    pub fn scroll_changed(&self, from_bottom_px: u32) {
        let _ = self.cmds.send(Command::ScrollChanged { from_bottom_px });
    }

    pub fn scroll_bottom_reached(&self) {
        let _ = self.cmds.send(Command::ScrollBottomReached);
    }

    /// Late identity resolution; starts the connection if it was deferred.
    pub fn set_identity(&self, identity: Identity) {
        let _ = self.cmds.send(Command::SetIdentity(identity));
    }

    /// Read-only snapshot of the timeline, ascending by `sent_at`.
    /// Empty after close.
    pub async fn snapshot(&self) -> Vec<Message> {
        let (reply, rx) = oneshot::channel();
        if self.cmds.send(Command::Snapshot { reply }).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub fn close(&self) {
        let _ = self.cmds.send(Command::Close);
    }
}

pub struct ChatSession;

impl ChatSession {
    /// Open one conversation. Returns the command handle and the
    /// notification stream for the rendering layer.
    ///
    /// If the identity is not yet resolved the connection and history
    /// load are deferred until [`ChatHandle::set_identity`] provides one.
    pub fn open(
        cfg: ChatConfig,
        params: SessionParams,
        identity: Identity,
    ) -> (ChatHandle, mpsc::UnboundedReceiver<Notification>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let api = ApiClient::new(params.api_url.clone());
        let handle = ChatHandle {
            cmds: cmd_tx,
            api: api.clone(),
        };
        let actor = Actor {
            timeline: Timeline::new(&cfg.dedup),
            typing: TypingCoordinator::new(&cfg.typing),
            viewport: ViewportPolicy::new(&cfg.viewport),
            ids: ProvisionalIds::new(),
            cfg,
            params,
            api,
            identity,
            conn: None,
            conn_tx,
            internal_tx,
            notify_tx,
            initial_loaded: false,
        };
        tokio::spawn(actor.run(cmd_rx, conn_rx, internal_rx));

        (handle, notify_rx)
    }
}

struct Actor {
    cfg: ChatConfig,
    params: SessionParams,
    api: ApiClient,
    identity: Identity,
    timeline: Timeline,
    typing: TypingCoordinator,
    viewport: ViewportPolicy,
    ids: ProvisionalIds,
    conn: Option<ConnectionHandle>,
    conn_tx: mpsc::UnboundedSender<ConnectionEvent>,
    internal_tx: mpsc::UnboundedSender<InternalEvent>,
    notify_tx: mpsc::UnboundedSender<Notification>,
    initial_loaded: bool,
}

impl Actor {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut conn_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
        mut internal_rx: mpsc::UnboundedReceiver<InternalEvent>,
    ) {
        self.maybe_start();

        loop {
            let deadline = self.typing.peer_deadline();
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Close) | None => break,
                    Some(cmd) => self.handle_command(cmd),
                },
                Some(event) = conn_rx.recv() => self.handle_connection_event(event),
                Some(event) = internal_rx.recv() => self.handle_internal(event),
                _ = peer_typing_expiry(deadline) => {
                    if self.typing.expire(Instant::now()) {
                        self.notify(Notification::PeerTyping(false));
                    }
                }
            }
        }

        if let Some(conn) = &self.conn {
            conn.close();
        }
        tracing::info!("Session for {} closed", self.params.conversation_id);
    }

    /// The `idle -> connecting` trigger: start the connection and the
    /// history backfill once both conversation and identity are known.
    fn maybe_start(&mut self) {
        if self.conn.is_some() || !self.identity.is_ready() {
            return;
        }
        let local_user_id = self.identity.user_id.unwrap_or_default();

        self.conn = Some(connection::spawn(
            &self.cfg.backoff,
            self.params.ws_url.clone(),
            self.params.conversation_id.clone(),
            self.conn_tx.clone(),
        ));

        let api = self.api.clone();
        let conversation_id = self.params.conversation_id.clone();
        let history_cfg = self.cfg.history.clone();
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            match history::fetch_initial(&api, &conversation_id, &history_cfg, local_user_id).await
            {
                Ok(batch) => {
                    // The receiver being gone just means the conversation
                    // closed while we were fetching; the result is stale.
                    let _ = internal_tx.send(InternalEvent::HistoryBatch(batch));
                }
                Err(e) => tracing::warn!("History load failed: {}", e),
            }
        });
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Send { body, attachments } => self.handle_send(body, attachments),
            Command::Retry { id } => self.handle_retry(id),
            Command::NotifyTyping { draft } => self.handle_notify_typing(&draft),
            Command::Reconnect => {
                if let Some(conn) = &self.conn {
                    conn.request_reconnect();
                }
            }
            Command::ScrollChanged { from_bottom_px } => self.viewport.on_scroll(from_bottom_px),
            Command::ScrollBottomReached => self.viewport.on_bottom_reached(),
            Command::SetIdentity(identity) => {
                self.identity = identity;
                self.maybe_start();
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.timeline.snapshot());
            }
            Command::Close => unreachable!("Close is handled in the event loop"),
        }
    }

    fn handle_send(&mut self, body: String, attachments: Vec<Attachment>) {
        if !outbound::sendable(&body, &attachments) {
            return;
        }
        if !self.identity.is_ready() {
            tracing::warn!("Send before identity resolved; dropped");
            return;
        }

        let now = Utc::now();
        let id = self.ids.next(now);
        let msg = outbound::build_outbound(&self.identity, id, body, attachments, now);
        let frame = outbound::outbound_frame(&msg);

        // Registers id and fingerprint with the insert in one step, so a
        // fast server echo is already recognized as a duplicate.
        if !self.timeline.admit_outbound(msg) {
            return;
        }
        let scroll = self.viewport.on_growth(1, false);
        self.notify(Notification::TimelineChanged { inserted: 1, scroll });

        self.transmit(id, frame);
    }

    fn handle_retry(&mut self, id: i64) {
        let frame = match self.timeline.get(id) {
            Some(msg) if msg.delivery_status == DeliveryStatus::Failed => {
                // Same message, same payload: retry never creates a second
                // entry and never touches id, body or sent_at.
                outbound::outbound_frame(msg)
            }
            _ => return,
        };

        // Eviction may have dropped the tracking entry in the meantime.
        self.timeline.reregister_id(id);

        if self.transmit(id, frame) {
            self.timeline.mark_status(id, DeliveryStatus::Sent);
            self.notify(Notification::StatusChanged {
                id,
                status: DeliveryStatus::Sent,
            });
        }
    }

    /// Hand a frame to the connection. Returns `false` after marking the
    /// message failed when the channel is not open — there is no offline
    /// queue to park it in.
    fn transmit(&mut self, id: i64, json: String) -> bool {
        let open = self
            .conn
            .as_ref()
            .map(|c| c.state() == ConnectionState::Open)
            .unwrap_or(false);

        if !open {
            self.timeline.mark_status(id, DeliveryStatus::Failed);
            self.notify(Notification::StatusChanged {
                id,
                status: DeliveryStatus::Failed,
            });
            return false;
        }

        let sender = self
            .conn
            .as_ref()
            .expect("connection exists when open")
            .sender();
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = sender.send_json(json).await;
            let _ = internal_tx.send(InternalEvent::SendResult { id, result });
        });
        true
    }

    fn handle_notify_typing(&mut self, draft: &str) {
        // Channel check first: a keystroke while disconnected must not
        // consume the cooldown.
        let Some(conn) = &self.conn else { return };
        if conn.state() != ConnectionState::Open {
            return;
        }
        if !self.typing.should_emit(draft, Instant::now()) {
            return;
        }
        let sender = conn.sender();
        let json = outbound::typing_frame(&self.identity);
        // Fire and forget; a lost typing signal is not worth surfacing.
        tokio::spawn(async move {
            let _ = sender.send_json(json).await;
        });
    }

    fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::StateChanged(state) => {
                self.notify(Notification::ConnectionChanged(state));
            }
            ConnectionEvent::RetriesExhausted => {
                self.notify(Notification::RetriesExhausted);
            }
            ConnectionEvent::Inbound(event) => self.handle_push(event),
        }
    }

    fn handle_push(&mut self, event: PushEvent) {
        match event {
            PushEvent::Message(wire) => {
                let local_user_id = self.identity.user_id.unwrap_or_default();
                if !wire.addressed_to(local_user_id) {
                    tracing::debug!("Dropping message routed to another recipient");
                    return;
                }
                let msg = match wire.into_message(local_user_id) {
                    Ok(msg) => msg,
                    Err(e) => {
                        tracing::warn!("Rejecting malformed push payload: {}", e);
                        return;
                    }
                };
                let id = msg.id;
                match self.timeline.ingest(msg) {
                    IngestOutcome::Admitted => {
                        let scroll = self.viewport.on_growth(1, false);
                        self.notify(Notification::TimelineChanged { inserted: 1, scroll });
                    }
                    IngestOutcome::DuplicateId(true) => {
                        if let Some(status) =
                            self.timeline.get(id).map(|m| m.delivery_status)
                        {
                            self.notify(Notification::StatusChanged { id, status });
                        }
                    }
                    IngestOutcome::DuplicateId(false) | IngestOutcome::DuplicateContent => {}
                }
            }
            PushEvent::Typing(typing) => {
                if typing.sender_id.is_some() && typing.sender_id == self.identity.user_id {
                    return;
                }
                let now = Instant::now();
                let already = self.typing.peer_typing(now);
                self.typing.on_peer_typing(now);
                if !already {
                    self.notify(Notification::PeerTyping(true));
                }
            }
            PushEvent::Join(join) => {
                self.notify(Notification::PeerJoined {
                    name: join.sender_name.unwrap_or_else(|| "Guest".to_string()),
                });
            }
        }
    }

    fn handle_internal(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::HistoryBatch(batch) => {
                let outcome = self.timeline.ingest_batch(batch);
                let initial = !self.initial_loaded;
                self.initial_loaded = true;
                let scroll = self.viewport.on_growth(outcome.inserted, initial);
                self.notify(Notification::TimelineChanged {
                    inserted: outcome.inserted,
                    scroll,
                });
            }
            InternalEvent::SendResult { id, result } => {
                if let Err(e) = result {
                    tracing::warn!("Send of message {} failed: {}", id, e);
                    self.timeline.mark_status(id, DeliveryStatus::Failed);
                    self.notify(Notification::StatusChanged {
                        id,
                        status: DeliveryStatus::Failed,
                    });
                }
            }
        }
    }

    fn notify(&self, notification: Notification) {
        let _ = self.notify_tx.send(notification);
    }
}

/// Sleep until the peer-typing flag should expire, or forever if it is
/// not set. Keeps the actor's select loop free of polling.
async fn peer_typing_expiry(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(time::Instant::from_std(deadline)).await,
        None => std::future::pending::<()>().await,
    }
}
