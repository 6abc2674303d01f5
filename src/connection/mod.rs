//! Connection manager: one live push channel per conversation
//!
//! A single spawned task owns the socket for the whole conversation
//! lifetime, which is what enforces the no-duplicate-connections
//! invariant: there is no second place a connect could start from. The
//! task supervises `connecting -> open -> closed -> connecting` with
//! exponential backoff, a liveness probe for silently-dead sockets, and a
//! manual-retry escape hatch once automatic attempts are exhausted.
//!
//! Inbound payloads are handed to the session unmodified; deduplication is
//! strictly the reconciliation engine's job.

pub mod socket;

use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time;

use crate::config::BackoffConfig;
use crate::error::ChatError;
use crate::models::PushEvent;
use socket::{ChatSocket, SocketFrame};

/// Lifecycle state of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection wanted yet (identity or conversation still missing).
    Idle,
    Connecting,
    Open,
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Exponential backoff with an attempt cap.
///
/// `delay = min(base * 2^attempt, max)`. Once the cap is reached
/// [`RetryPolicy::next_delay`] returns `None` and the manager stops
/// auto-retrying until a manual retry resets it.
pub struct RetryPolicy {
    base: Duration,
    max: Duration,
    cap: u32,
    attempt: u32,
}

impl RetryPolicy {
    pub fn new(cfg: &BackoffConfig) -> Self {
        Self {
            base: Duration::from_millis(cfg.base_delay_ms),
            max: Duration::from_millis(cfg.max_delay_ms),
            cap: cfg.max_attempts,
            attempt: 0,
        }
    }

    /// Delay before the next attempt, or `None` when attempts are
    /// exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.cap {
            return None;
        }
        let factor = 1u64 << self.attempt.min(20);
        let millis = (self.base.as_millis() as u64).saturating_mul(factor);
        self.attempt += 1;
        Some(Duration::from_millis(millis).min(self.max))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

/// Events the manager reports to the session.
#[derive(Debug)]
pub enum ConnectionEvent {
    StateChanged(ConnectionState),
    /// Automatic attempts exhausted; only a manual retry will reconnect.
    RetriesExhausted,
    /// An inbound push payload, unmodified.
    Inbound(PushEvent),
}

/// One outbound frame plus the channel its send result travels back on.
pub struct OutboundFrame {
    pub json: String,
    pub done: oneshot::Sender<Result<(), ChatError>>,
}

/// Cloneable send-side of the connection, for tasks that only transmit.
#[derive(Clone)]
pub struct ConnectionSender {
    outbound: mpsc::Sender<OutboundFrame>,
}

impl ConnectionSender {
    /// Transmit one frame and wait for the transport-level result.
    pub async fn send_json(&self, json: String) -> Result<(), ChatError> {
        let (done, rx) = oneshot::channel();
        self.outbound
            .send(OutboundFrame { json, done })
            .await
            .map_err(|_| ChatError::Transport("connection task gone".into()))?;
        rx.await
            .map_err(|_| ChatError::Transport("send abandoned during reconnect".into()))?
    }
}

/// Owner's handle to the connection task.
pub struct ConnectionHandle {
    outbound: mpsc::Sender<OutboundFrame>,
    retry: mpsc::Sender<()>,
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<ConnectionState>,
}

impl ConnectionHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn sender(&self) -> ConnectionSender {
        ConnectionSender {
            outbound: self.outbound.clone(),
        }
    }

    /// Manual retry: resets the attempt counter and wakes the manager. If
    /// the channel is currently open this forces a fresh connection.
    pub fn request_reconnect(&self) {
        let _ = self.retry.try_send(());
    }

    /// Tear down on conversation close. Pending backoff timers are
    /// cancelled; an in-flight connect completing afterwards is discarded.
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }
}

enum Disconnect {
    Shutdown,
    Error(ChatError),
}

/// Spawn the connection task for one conversation. Call only once both a
/// conversation id and a user identity are available (the `idle ->
/// connecting` trigger).
pub fn spawn(
    cfg: &BackoffConfig,
    ws_url: String,
    conversation_id: String,
    events: mpsc::UnboundedSender<ConnectionEvent>,
) -> ConnectionHandle {
    let (outbound_tx, outbound_rx) = mpsc::channel(32);
    let (retry_tx, retry_rx) = mpsc::channel(1);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

    let manager = Manager {
        cfg: cfg.clone(),
        ws_url,
        conversation_id,
        events,
        state_tx,
        outbound_rx,
        retry_rx,
        shutdown_rx,
        policy: RetryPolicy::new(cfg),
    };
    tokio::spawn(manager.run());

    ConnectionHandle {
        outbound: outbound_tx,
        retry: retry_tx,
        shutdown: shutdown_tx,
        state: state_rx,
    }
}

struct Manager {
    cfg: BackoffConfig,
    ws_url: String,
    conversation_id: String,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    state_tx: watch::Sender<ConnectionState>,
    outbound_rx: mpsc::Receiver<OutboundFrame>,
    retry_rx: mpsc::Receiver<()>,
    shutdown_rx: watch::Receiver<bool>,
    policy: RetryPolicy,
}

impl Manager {
    fn set_state(&self, state: ConnectionState) {
        let _ = self.state_tx.send(state);
        let _ = self.events.send(ConnectionEvent::StateChanged(state));
    }

    fn reject_frame(frame: OutboundFrame) {
        let _ = frame
            .done
            .send(Err(ChatError::Transport("channel not open".into())));
    }

    /// Fail every outbound frame still queued. A frame accepted while the
    /// channel was open must not ride out the backoff and transmit on a
    /// later connection; its sender gets a transport error now.
    fn fail_pending_outbound(&mut self) {
        while let Ok(frame) = self.outbound_rx.try_recv() {
            Self::reject_frame(frame);
        }
    }

    async fn run(mut self) {
        loop {
            if *self.shutdown_rx.borrow() {
                return;
            }

            self.set_state(ConnectionState::Connecting);
            let connected = tokio::select! {
                res = ChatSocket::connect(&self.ws_url, &self.conversation_id) => res,
                _ = self.shutdown_rx.changed() => {
                    tracing::debug!("Connect cancelled by close");
                    return;
                }
            };

            match connected {
                Ok(sock) => {
                    if *self.shutdown_rx.borrow() {
                        // Conversation closed while the handshake was in
                        // flight; the result is stale.
                        tracing::debug!(
                            "{}",
                            ChatError::Stale("connection completed after close".into())
                        );
                        return;
                    }
                    self.policy.reset();
                    self.set_state(ConnectionState::Open);
                    let reason = self.run_open(sock).await;
                    self.set_state(ConnectionState::Closed);
                    match reason {
                        Disconnect::Shutdown => return,
                        Disconnect::Error(e) => tracing::warn!("Push channel lost: {}", e),
                    }
                }
                Err(e) => {
                    self.set_state(ConnectionState::Closed);
                    tracing::warn!("Connect failed: {}", e);
                }
            }

            self.fail_pending_outbound();

            match self.policy.next_delay() {
                Some(delay) => {
                    tracing::info!(
                        "Reconnecting in {:?} (attempt {})",
                        delay,
                        self.policy.attempts()
                    );
                    if !self.wait_backoff(delay).await {
                        return;
                    }
                }
                None => {
                    tracing::warn!("Reconnect attempts exhausted; manual retry required");
                    let _ = self.events.send(ConnectionEvent::RetriesExhausted);
                    if !self.wait_retry().await {
                        return;
                    }
                }
            }
        }
    }

    /// Wait out the backoff delay. Frames that race in while disconnected
    /// are rejected immediately rather than queued for the next
    /// connection. Returns `false` on shutdown.
    async fn wait_backoff(&mut self, delay: Duration) -> bool {
        let deadline = time::Instant::now() + delay;
        loop {
            tokio::select! {
                _ = time::sleep_until(deadline) => return true,
                _ = self.shutdown_rx.changed() => return false,
                Some(()) = self.retry_rx.recv() => {
                    self.policy.reset();
                    return true;
                }
                Some(frame) = self.outbound_rx.recv() => Self::reject_frame(frame),
            }
        }
    }

    /// Parked after exhausting automatic attempts; only a manual retry or
    /// shutdown leaves this state. Returns `false` on shutdown.
    async fn wait_retry(&mut self) -> bool {
        loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => return false,
                Some(()) = self.retry_rx.recv() => {
                    self.policy.reset();
                    return true;
                }
                Some(frame) = self.outbound_rx.recv() => Self::reject_frame(frame),
            }
        }
    }

    /// Event loop while the channel is open. Returns why it left.
    async fn run_open(&mut self, mut sock: ChatSocket) -> Disconnect {
        let liveness = Duration::from_secs(self.cfg.liveness_interval_secs);
        let mut liveness_tick = time::interval(liveness);
        liveness_tick.tick().await; // skip the immediate first tick
        let mut last_traffic = Instant::now();

        loop {
            tokio::select! {
                frame = sock.next_frame() => match frame {
                    Ok(Some(frame)) => {
                        last_traffic = Instant::now();
                        if let SocketFrame::Event(event) = frame {
                            if self.events.send(ConnectionEvent::Inbound(event)).is_err() {
                                return Disconnect::Shutdown;
                            }
                        }
                    }
                    Ok(None) => {
                        return Disconnect::Error(ChatError::Transport(
                            "closed by server".into(),
                        ));
                    }
                    Err(e) => return Disconnect::Error(e),
                },
                Some(frame) = self.outbound_rx.recv() => {
                    let result = sock.send_json(&frame.json).await;
                    let failure = result.as_ref().err().map(|e| e.to_string());
                    let _ = frame.done.send(result);
                    if let Some(text) = failure {
                        // A failed write means the channel is gone.
                        return Disconnect::Error(ChatError::Transport(text));
                    }
                }
                _ = liveness_tick.tick() => {
                    // The transport did not report a close, but nothing has
                    // arrived for two intervals (pings should at least
                    // produce pongs). Treat the socket as silently dead.
                    if last_traffic.elapsed() >= liveness * 2 {
                        return Disconnect::Error(ChatError::Transport(
                            "no traffic on open channel".into(),
                        ));
                    }
                    if let Err(e) = sock.ping().await {
                        return Disconnect::Error(e);
                    }
                }
                Some(()) = self.retry_rx.recv() => {
                    return Disconnect::Error(ChatError::Transport(
                        "reconnect requested".into(),
                    ));
                }
                _ = self.shutdown_rx.changed() => {
                    return Disconnect::Shutdown;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    async fn next_state(events: &mut mpsc::UnboundedReceiver<ConnectionEvent>) -> ConnectionState {
        loop {
            let event = time::timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("timed out waiting for connection event")
                .expect("event channel closed");
            if let ConnectionEvent::StateChanged(state) = event {
                return state;
            }
        }
    }

    fn fast_backoff() -> BackoffConfig {
        BackoffConfig {
            base_delay_ms: 50,
            max_delay_ms: 200,
            max_attempts: 5,
            liveness_interval_secs: 10,
        }
    }

    #[tokio::test]
    async fn test_reconnects_after_server_drop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // First connection is dropped right after the handshake; the
            // second one stays up.
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            drop(ws);
            let (stream, _) = listener.accept().await.unwrap();
            let _ws = accept_async(stream).await.unwrap();
            time::sleep(Duration::from_secs(10)).await;
        });

        let (events_tx, mut events) = mpsc::unbounded_channel();
        let handle = spawn(
            &fast_backoff(),
            format!("ws://{}", addr),
            "conv-1".to_string(),
            events_tx,
        );

        assert_eq!(next_state(&mut events).await, ConnectionState::Connecting);
        assert_eq!(next_state(&mut events).await, ConnectionState::Open);
        // Server drop: closed, then a fresh attempt within the backoff.
        assert_eq!(next_state(&mut events).await, ConnectionState::Closed);
        assert_eq!(next_state(&mut events).await, ConnectionState::Connecting);
        assert_eq!(next_state(&mut events).await, ConnectionState::Open);
        assert_eq!(handle.state(), ConnectionState::Open);

        handle.close();
    }

    #[tokio::test]
    async fn test_send_while_disconnected_fails_fast() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // One connection, dropped immediately. No further accepts.
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            drop(ws);
            time::sleep(Duration::from_secs(10)).await;
        });

        // A long backoff keeps the manager solidly disconnected while the
        // frame is offered.
        let cfg = BackoffConfig {
            base_delay_ms: 60_000,
            max_delay_ms: 60_000,
            max_attempts: 5,
            liveness_interval_secs: 10,
        };
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let handle = spawn(&cfg, format!("ws://{}", addr), "conv-1".to_string(), events_tx);

        assert_eq!(next_state(&mut events).await, ConnectionState::Connecting);
        assert_eq!(next_state(&mut events).await, ConnectionState::Open);
        assert_eq!(next_state(&mut events).await, ConnectionState::Closed);

        // The frame must fail now, not ride out the backoff and transmit
        // on a later connection.
        let sender = handle.sender();
        let result = time::timeout(Duration::from_secs(5), sender.send_json("{}".to_string()))
            .await
            .expect("send result not delivered while disconnected");
        assert!(matches!(result, Err(ChatError::Transport(_))));

        handle.close();
    }

    #[test]
    fn test_backoff_increases_then_caps() {
        let cfg = BackoffConfig {
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            max_attempts: 6,
            liveness_interval_secs: 10,
        };
        let mut policy = RetryPolicy::new(&cfg);

        let delays: Vec<Duration> = std::iter::from_fn(|| policy.next_delay()).collect();
        assert_eq!(delays.len(), 6);
        // Strictly increasing until the cap, then flat at max.
        assert_eq!(delays[0], Duration::from_millis(1_000));
        assert_eq!(delays[1], Duration::from_millis(2_000));
        assert_eq!(delays[2], Duration::from_millis(4_000));
        assert_eq!(delays[3], Duration::from_millis(8_000));
        assert_eq!(delays[4], Duration::from_millis(10_000));
        assert_eq!(delays[5], Duration::from_millis(10_000));
        // Exhausted.
        assert_eq!(policy.next_delay(), None);
    }

    #[test]
    fn test_backoff_reset_restores_attempts() {
        let cfg = BackoffConfig {
            max_attempts: 1,
            ..BackoffConfig::default()
        };
        let mut policy = RetryPolicy::new(&cfg);
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_none());
        policy.reset();
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(1_000)));
    }

    #[test]
    fn test_backoff_no_overflow_at_high_attempts() {
        let cfg = BackoffConfig {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: 64,
            liveness_interval_secs: 10,
        };
        let mut policy = RetryPolicy::new(&cfg);
        let mut last = Duration::ZERO;
        for _ in 0..64 {
            let d = policy.next_delay().unwrap();
            assert!(d <= Duration::from_millis(30_000));
            assert!(d >= last.min(Duration::from_millis(30_000)));
            last = d;
        }
    }
}
