//! Per-transport connection loop.
//!
//! One task per accepted WebSocket:
//! 1. Build the segmenter (VAD init failure is fatal to this connection
//!    only), create a session, send `ready`.
//! 2. Route inbound: control messages are handled here; audio frames go
//!    to the segmenter, whose `speech-start` cancels the active turn
//!    (barge-in) and whose `speech-end` starts the next one.
//! 3. Route outbound: every turn event is serialized once into a single
//!    send path that fans out to the signalling channel and, when open,
//!    the peer's data channel. TTS PCM goes to the media track when one
//!    is attached, base64 on the control channel otherwise.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message as WsFrame, WebSocket};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use vx_audio::{SegmenterEvent, SpeechSegmenter};
use vx_domain::event::TurnEvent;
use vx_domain::protocol::{ClientMessage, ServerMessage, PROTOCOL_VERSION};
use vx_domain::ErrorCode;
use vx_sessions::Session;

use crate::media::MediaPort;
use crate::runtime::run_turn;
use crate::state::AppState;

/// Close codes ≥ 4000 mark fatal-to-connection errors.
const CLOSE_HEARTBEAT_TIMEOUT: u16 = 4000;
const CLOSE_VAD_INIT: u16 = 4002;

enum Outbound {
    Msg(ServerMessage),
    Close(u16, String),
}

pub async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sink, ws_stream) = socket.split();
    let media = state.media.open();

    // Writer task: the single fan-out point for control messages.
    let (out_tx, mut out_rx) = mpsc::channel::<Outbound>(64);
    let data_channel = media.data_sender();
    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            match frame {
                Outbound::Msg(msg) => {
                    let json = match serde_json::to_string(&msg) {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::warn!(error = %e, "unserializable control message");
                            continue;
                        }
                    };
                    if let Some(dc) = &data_channel {
                        let _ = dc.send(json.clone()).await;
                    }
                    if ws_sink.send(WsFrame::Text(json)).await.is_err() {
                        break;
                    }
                }
                Outbound::Close(code, reason) => {
                    let _ = ws_sink
                        .send(WsFrame::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    // VAD init failure closes this connection; the server keeps serving.
    let segmenter = match SpeechSegmenter::new(&state.config.vad) {
        Ok(segmenter) => segmenter,
        Err(e) => {
            tracing::error!(error = %e, "segmenter initialization failed");
            let _ = out_tx
                .send(Outbound::Msg(ServerMessage::Error {
                    code: ErrorCode::VadError,
                    message: e.to_string(),
                }))
                .await;
            let _ = out_tx
                .send(Outbound::Close(CLOSE_VAD_INIT, "vad initialization failed".into()))
                .await;
            let _ = tokio::time::timeout(Duration::from_secs(1), writer).await;
            return;
        }
    };

    let session = state.sessions.create(None, &state.session_prototype());
    tracing::info!(session_id = %session.id(), "client connected");

    let ice_servers = (!state.config.server.ice_servers.is_empty())
        .then(|| state.config.server.ice_servers.clone());
    let _ = out_tx
        .send(Outbound::Msg(ServerMessage::Ready {
            id: session.id().to_string(),
            protocol_version: PROTOCOL_VERSION,
            ice_servers,
        }))
        .await;

    let app = state.clone();
    let mut conn = Connection {
        state,
        session,
        media,
        segmenter,
        out_tx,
        active_turn: None,
    };
    conn.run(ws_stream).await;

    // Teardown: an in-flight turn has no transport left; reconnection (if
    // enabled) recovers history, not the turn.
    let session = conn.session.clone();
    session.cancel_active();
    if !app.config.session.allow_reconnect {
        app.sessions.remove(&session.id());
    }
    drop(conn);
    let _ = tokio::time::timeout(Duration::from_secs(1), writer).await;
    tracing::info!(session_id = %session.id(), "client disconnected");
}

struct Connection {
    state: AppState,
    session: Arc<Session>,
    media: Arc<dyn MediaPort>,
    segmenter: SpeechSegmenter,
    out_tx: mpsc::Sender<Outbound>,
    active_turn: Option<mpsc::Receiver<TurnEvent>>,
}

impl Connection {
    async fn run(&mut self, mut ws_stream: SplitStream<WebSocket>) {
        let heartbeat = Duration::from_secs(self.state.config.heartbeat.timeout_secs);
        let mut deadline = tokio::time::Instant::now() + heartbeat;

        loop {
            tokio::select! {
                msg = ws_stream.next() => {
                    match msg {
                        None | Some(Err(_)) => break,
                        Some(Ok(frame)) => {
                            deadline = tokio::time::Instant::now() + heartbeat;
                            if !self.handle_frame(frame).await {
                                break;
                            }
                        }
                    }
                }
                ev = recv_active(&mut self.active_turn), if self.active_turn.is_some() => {
                    match ev {
                        Some(ev) => self.handle_turn_event(ev).await,
                        None => self.active_turn = None,
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::info!(session_id = %self.session.id(), "heartbeat timeout");
                    let _ = self.out_tx
                        .send(Outbound::Close(CLOSE_HEARTBEAT_TIMEOUT, "heartbeat timeout".into()))
                        .await;
                    break;
                }
            }
        }
    }

    /// Returns false when the transport should close.
    async fn handle_frame(&mut self, frame: WsFrame) -> bool {
        match frame {
            WsFrame::Text(text) => {
                self.handle_text(&text).await;
                true
            }
            // Raw binary frames are PCM at the negotiated rate — the
            // media-track ingress path when the transport multiplexes it.
            WsFrame::Binary(bytes) => {
                self.handle_pcm_bytes(&bytes).await;
                true
            }
            WsFrame::Close(_) => false,
            // WS-level ping/pong already refreshed the deadline.
            _ => true,
        }
    }

    async fn handle_text(&mut self, text: &str) {
        let msg: ClientMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                self.send_error(ErrorCode::InvalidMessage, e.to_string()).await;
                return;
            }
        };

        match msg {
            ClientMessage::Ping { timestamp } => {
                self.send(ServerMessage::Pong { timestamp }).await;
            }
            ClientMessage::Offer { signal } => match self.media.negotiate(&signal).await {
                Ok(answer) => self.send(ServerMessage::Signal { signal: answer }).await,
                Err(e) => {
                    self.send_error(ErrorCode::WebrtcUnavailable, e.to_string()).await;
                }
            },
            ClientMessage::Reconnect { session_id } => {
                self.handle_reconnect(&session_id).await;
            }
            ClientMessage::Audio { data, attachments } => {
                for attachment in attachments.into_iter().flatten() {
                    self.session.set_attachment(attachment);
                }
                match BASE64.decode(data.as_bytes()) {
                    Ok(bytes) => self.handle_pcm_bytes(&bytes).await,
                    Err(e) => {
                        self.send_error(ErrorCode::InvalidAudioFormat, e.to_string()).await;
                    }
                }
            }
            ClientMessage::Attachments { attachments } => {
                for attachment in attachments {
                    self.session.set_attachment(attachment);
                }
            }
            ClientMessage::Unknown => {
                tracing::debug!("ignoring unknown control message");
            }
        }
    }

    async fn handle_reconnect(&mut self, session_id: &str) {
        if !self.state.config.session.allow_reconnect {
            self.send(ServerMessage::ReconnectAck {
                success: false,
                session_id: session_id.to_string(),
                history_recovered: false,
            })
            .await;
            self.send_error(ErrorCode::SessionExpired, "reconnection is disabled".into())
                .await;
            return;
        }

        let recovered = Uuid::parse_str(session_id)
            .ok()
            .and_then(|id| self.state.sessions.lookup(&id));

        match recovered {
            Some(found) => {
                tracing::info!(session_id = %found.id(), "session recovered");
                let previous = std::mem::replace(&mut self.session, found);
                // Drop the placeholder session this connect created.
                if previous.id() != self.session.id() && previous.history_is_empty() {
                    self.state.sessions.remove(&previous.id());
                }
                self.session.touch();
                self.send(ServerMessage::ReconnectAck {
                    success: true,
                    session_id: self.session.id().to_string(),
                    history_recovered: true,
                })
                .await;
            }
            None => {
                self.send(ServerMessage::ReconnectAck {
                    success: false,
                    session_id: session_id.to_string(),
                    history_recovered: false,
                })
                .await;
                self.send_error(
                    ErrorCode::SessionNotFound,
                    format!("no session `{session_id}`"),
                )
                .await;
            }
        }
    }

    async fn handle_pcm_bytes(&mut self, bytes: &[u8]) {
        if bytes.len() % 2 != 0 {
            self.send_error(
                ErrorCode::InvalidAudioFormat,
                "PCM payload has odd length".into(),
            )
            .await;
            return;
        }
        let pcm: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        let events = match self.segmenter.push(&pcm) {
            Ok(events) => events,
            Err(e) => {
                self.send_error(ErrorCode::AudioProcessingError, e.to_string()).await;
                return;
            }
        };
        for event in events {
            self.handle_segment(event).await;
        }
    }

    async fn handle_segment(&mut self, event: SegmenterEvent) {
        match event {
            SegmenterEvent::SpeechStart => {
                // Barge-in: the prior turn is fenced here. Its terminal
                // event is forwarded; everything else it buffered is
                // discarded.
                if let Some(mut rx) = self.active_turn.take() {
                    self.session.cancel_active();
                    let terminal = drain_for_terminal(&mut rx).await;
                    self.send(terminal).await;
                }
                self.send(ServerMessage::SpeechStart).await;
            }
            SegmenterEvent::SpeechEnd { wav, duration_ms } => {
                self.send(ServerMessage::SpeechEnd).await;
                let (turn_id, rx) = run_turn(self.state.clone(), self.session.clone(), wav);
                tracing::debug!(%turn_id, duration_ms, "turn started");
                self.active_turn = Some(rx);
            }
        }
    }

    async fn handle_turn_event(&mut self, event: TurnEvent) {
        match event {
            TurnEvent::TtsChunk { pcm, sample_rate } => {
                // Track audio goes to the media plane; the control-channel
                // fallback carries it base64 when no track is attached.
                if let Some(sink) = self.media.audio_sink() {
                    let _ = sink.send(pcm).await;
                } else {
                    self.send(ServerMessage::TtsChunk {
                        format: "pcm".into(),
                        sample_rate,
                        data: BASE64.encode(&pcm),
                    })
                    .await;
                }
            }
            other => self.send(event_to_message(other)).await,
        }
    }

    async fn send(&self, msg: ServerMessage) {
        let _ = self.out_tx.send(Outbound::Msg(msg)).await;
    }

    async fn send_error(&self, code: ErrorCode, message: String) {
        self.send(ServerMessage::Error { code, message }).await;
    }
}

async fn recv_active(active: &mut Option<mpsc::Receiver<TurnEvent>>) -> Option<TurnEvent> {
    match active.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Wait (bounded) for a cancelled turn's terminal event so the client
/// sees it before `speech-start`. Intermediate events are discarded.
async fn drain_for_terminal(rx: &mut mpsc::Receiver<TurnEvent>) -> ServerMessage {
    let result = tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(ev) = rx.recv().await {
            if ev.is_tts_terminal() {
                return Some(ev);
            }
        }
        None
    })
    .await;

    match result {
        // The turn finished cleanly just before the barge-in landed.
        Ok(Some(TurnEvent::TtsComplete)) => ServerMessage::TtsComplete,
        _ => ServerMessage::TtsCancelled,
    }
}

fn event_to_message(event: TurnEvent) -> ServerMessage {
    match event {
        TurnEvent::Transcript { text, is_final } => ServerMessage::Transcript { text, is_final },
        TurnEvent::LlmChunk { content, done } => ServerMessage::LlmChunk { content, done },
        TurnEvent::LlmFull { text } => ServerMessage::Llm { text },
        TurnEvent::ToolCallStart { name, call_id, arguments } => {
            ServerMessage::ToolCallStart { name, call_id, arguments }
        }
        TurnEvent::ToolCallEnd { call_id, result, error, duration_ms } => {
            ServerMessage::ToolCallEnd { call_id, result, error, duration_ms }
        }
        TurnEvent::StageChange { from, to, reason } => {
            ServerMessage::StageChange { from, to, reason }
        }
        TurnEvent::TtsStart => ServerMessage::TtsStart,
        TurnEvent::TtsComplete => ServerMessage::TtsComplete,
        TurnEvent::TtsCancelled => ServerMessage::TtsCancelled,
        TurnEvent::Error { code, message } => ServerMessage::Error { code, message },
        TurnEvent::TtsChunk { pcm, sample_rate } => ServerMessage::TtsChunk {
            format: "pcm".into(),
            sample_rate,
            data: BASE64.encode(&pcm),
        },
    }
}
