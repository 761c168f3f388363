//! Connection lifecycle driver.
//!
//! States: `DISCONNECTED → CONNECTING → CONNECTED`, with transport loss
//! (or missed heartbeats) moving a connected client to `RECONNECTING`.
//! Each attempt re-runs the handshake and sends `reconnect{sessionId}`;
//! exhaustion lands in `FAILED`, an explicit close in `CLOSED`. Every
//! transition emits a `StateChange` event.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use vx_domain::protocol::{ClientMessage, ServerMessage};

use crate::reconnect::ReconnectPolicy;
use crate::transport::{Transport, TransportLink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    StateChange(ConnectionState),
    Reconnecting { attempt: u32, max: u32 },
    Server(ServerMessage),
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub reconnect: ReconnectPolicy,
    pub reconnect_enabled: bool,
    pub heartbeat_interval: Duration,
    /// Unanswered pings tolerated before the link counts as lost.
    pub max_missed_pongs: u32,
    /// How long to wait for `ready` / `reconnect-ack` after connecting.
    pub handshake_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            reconnect_enabled: true,
            heartbeat_interval: Duration::from_secs(15),
            max_missed_pongs: 2,
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

enum Command {
    Send(ClientMessage),
    Close,
}

/// Handle to a running client. Events arrive on the receiver returned by
/// [`VoiceClient::start`].
pub struct VoiceClient {
    cmd_tx: mpsc::Sender<Command>,
    session_id: Arc<Mutex<Option<String>>>,
}

impl VoiceClient {
    pub fn start(
        transport: Arc<dyn Transport>,
        config: ClientConfig,
    ) -> (Self, mpsc::Receiver<ClientEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (event_tx, event_rx) = mpsc::channel(256);
        let session_id = Arc::new(Mutex::new(None));

        let driver = Driver {
            transport,
            config,
            events: event_tx,
            cmd_rx,
            session_id: session_id.clone(),
            state: ConnectionState::Disconnected,
        };
        tokio::spawn(driver.run());

        (Self { cmd_tx, session_id }, event_rx)
    }

    pub async fn send(&self, msg: ClientMessage) {
        let _ = self.cmd_tx.send(Command::Send(msg)).await;
    }

    pub async fn close(&self) {
        let _ = self.cmd_tx.send(Command::Close).await;
    }

    /// The session id from the last `ready`, once the handshake has run.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Driver
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum ServeEnd {
    Lost,
    Closed,
}

struct Driver {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    events: mpsc::Sender<ClientEvent>,
    cmd_rx: mpsc::Receiver<Command>,
    session_id: Arc<Mutex<Option<String>>>,
    state: ConnectionState,
}

impl Driver {
    async fn run(mut self) {
        self.set_state(ConnectionState::Connecting).await;

        let mut link = match self.connect_and_ready().await {
            Ok(link) => link,
            Err(_) => {
                if !self.config.reconnect_enabled {
                    self.set_state(ConnectionState::Failed).await;
                    return;
                }
                match self.reconnect_loop().await {
                    Some(link) => link,
                    None => return,
                }
            }
        };
        self.set_state(ConnectionState::Connected).await;

        loop {
            match self.serve(&mut link).await {
                ServeEnd::Closed => {
                    self.set_state(ConnectionState::Closed).await;
                    return;
                }
                ServeEnd::Lost => {
                    if !self.config.reconnect_enabled {
                        self.set_state(ConnectionState::Failed).await;
                        return;
                    }
                    match self.reconnect_loop().await {
                        Some(new_link) => {
                            link = new_link;
                            self.set_state(ConnectionState::Connected).await;
                        }
                        None => return,
                    }
                }
            }
        }
    }

    /// Pump one established link until it is lost or the client closes.
    async fn serve(&mut self, link: &mut Box<dyn TransportLink>) -> ServeEnd {
        let mut ping = tokio::time::interval(self.config.heartbeat_interval);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ping.tick().await; // the immediate first tick
        let mut outstanding_pongs: u32 = 0;

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    None | Some(Command::Close) => return ServeEnd::Closed,
                    Some(Command::Send(msg)) => {
                        if link.send(msg).await.is_err() {
                            return ServeEnd::Lost;
                        }
                    }
                },
                msg = link.recv() => match msg {
                    None => return ServeEnd::Lost,
                    Some(msg) => {
                        if matches!(msg, ServerMessage::Pong { .. }) {
                            outstanding_pongs = 0;
                        }
                        if let ServerMessage::Ready { id, .. } = &msg {
                            *self.session_id.lock() = Some(id.clone());
                        }
                        self.emit(ClientEvent::Server(msg)).await;
                    }
                },
                _ = ping.tick() => {
                    if outstanding_pongs >= self.config.max_missed_pongs {
                        tracing::warn!(outstanding_pongs, "heartbeat lost");
                        return ServeEnd::Lost;
                    }
                    outstanding_pongs += 1;
                    let ping_msg = ClientMessage::Ping { timestamp: now_millis() };
                    if link.send(ping_msg).await.is_err() {
                        return ServeEnd::Lost;
                    }
                }
            }
        }
    }

    /// Back-off loop. Returns a recovered link, or `None` after setting
    /// the terminal state (`Failed`, or `Closed` on user request).
    async fn reconnect_loop(&mut self) -> Option<Box<dyn TransportLink>> {
        self.set_state(ConnectionState::Reconnecting).await;
        let max = self.config.reconnect.max_retries;
        let mut attempt: u32 = 0;

        loop {
            if self.config.reconnect.should_give_up(attempt) {
                self.set_state(ConnectionState::Failed).await;
                return None;
            }

            self.emit(ClientEvent::Reconnecting { attempt: attempt + 1, max }).await;

            // Close requests must win over the back-off sleep.
            let delay = self.config.reconnect.delay_for_attempt(attempt);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                cmd = self.cmd_rx.recv() => {
                    if matches!(cmd, None | Some(Command::Close)) {
                        self.set_state(ConnectionState::Closed).await;
                        return None;
                    }
                }
            }

            match self.try_recover().await {
                Ok(link) => return Some(link),
                Err(_) => attempt += 1,
            }
        }
    }

    /// One attempt: handshake, then session recovery when we have an id.
    async fn try_recover(&mut self) -> Result<Box<dyn TransportLink>, ()> {
        // The handshake mints a fresh session and overwrites the stored
        // id, so the id to recover must be captured first.
        let prior_session = self.session_id.lock().clone();

        let mut link = self.connect_and_ready().await?;

        let Some(session_id) = prior_session else {
            return Ok(link);
        };

        link.send(ClientMessage::Reconnect {
            session_id: session_id.clone(),
        })
        .await
        .map_err(|_| ())?;

        // Wait for the ack, forwarding everything else.
        let deadline = tokio::time::Instant::now() + self.config.handshake_timeout;
        loop {
            match tokio::time::timeout_at(deadline, link.recv()).await {
                Ok(Some(msg)) => {
                    let ack = matches!(&msg, ServerMessage::ReconnectAck { .. });
                    let success = matches!(
                        &msg,
                        ServerMessage::ReconnectAck { success: true, .. }
                    );
                    self.emit(ClientEvent::Server(msg)).await;
                    if ack {
                        if success {
                            *self.session_id.lock() = Some(session_id);
                        } else {
                            // A refused recovery still leaves the fresh
                            // session from the handshake; keep the link.
                            tracing::warn!("session recovery refused, continuing with new session");
                        }
                        return Ok(link);
                    }
                }
                Ok(None) | Err(_) => return Err(()),
            }
        }
    }

    /// Connect and wait for `ready`, capturing the session id.
    async fn connect_and_ready(&mut self) -> Result<Box<dyn TransportLink>, ()> {
        let mut link = self.transport.connect().await.map_err(|e| {
            tracing::debug!(error = %e, "connect failed");
        })?;

        let deadline = tokio::time::Instant::now() + self.config.handshake_timeout;
        loop {
            match tokio::time::timeout_at(deadline, link.recv()).await {
                Ok(Some(msg)) => {
                    let ready = matches!(&msg, ServerMessage::Ready { .. });
                    if let ServerMessage::Ready { id, .. } = &msg {
                        *self.session_id.lock() = Some(id.clone());
                    }
                    self.emit(ClientEvent::Server(msg)).await;
                    if ready {
                        return Ok(link);
                    }
                }
                Ok(None) | Err(_) => return Err(()),
            }
        }
    }

    async fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            tracing::debug!(from = %self.state, to = %state, "state change");
            self.state = state;
            self.emit(ClientEvent::StateChange(state)).await;
        }
    }

    async fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event).await;
    }
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
