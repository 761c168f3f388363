//! Control-plane wire protocol (JSON over the signalling and data channels).
//!
//! Protocol version 1. Unknown inbound message types are ignored rather
//! than rejected, so newer clients can talk to older servers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorCode;
use crate::message::Attachment;

pub const PROTOCOL_VERSION: u32 = 1;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client → server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    #[serde(rename = "ping")]
    Ping { timestamp: i64 },

    /// SDP offer for the media handshake.
    #[serde(rename = "offer")]
    Offer { signal: String },

    /// Recover an existing session after transport loss.
    #[serde(rename = "reconnect", rename_all = "camelCase")]
    Reconnect { session_id: String },

    /// Legacy audio ingress: base64 PCM when no media track is negotiated.
    #[serde(rename = "audio")]
    Audio {
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attachments: Option<Vec<Attachment>>,
    },

    /// Update the pending camera/screen frames for the next turn.
    #[serde(rename = "attachments")]
    Attachments { attachments: Vec<Attachment> },

    #[serde(other)]
    Unknown,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server → client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Handshake greeting carrying the session id.
    #[serde(rename = "ready", rename_all = "camelCase")]
    Ready {
        id: String,
        protocol_version: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ice_servers: Option<Vec<IceServer>>,
    },

    #[serde(rename = "pong")]
    Pong { timestamp: i64 },

    /// SDP answer for the media handshake.
    #[serde(rename = "signal")]
    Signal { signal: String },

    #[serde(rename = "reconnect-ack", rename_all = "camelCase")]
    ReconnectAck {
        success: bool,
        session_id: String,
        history_recovered: bool,
    },

    #[serde(rename = "transcript", rename_all = "camelCase")]
    Transcript { text: String, is_final: bool },

    #[serde(rename = "llm-chunk")]
    LlmChunk { content: String, done: bool },

    /// The full assistant reply.
    #[serde(rename = "llm")]
    Llm { text: String },

    #[serde(rename = "tts-start")]
    TtsStart,

    /// Audio egress fallback when no media track is attached.
    #[serde(rename = "tts-chunk", rename_all = "camelCase")]
    TtsChunk {
        format: String,
        sample_rate: u32,
        data: String,
    },

    #[serde(rename = "tts-complete")]
    TtsComplete,

    #[serde(rename = "tts-cancelled")]
    TtsCancelled,

    #[serde(rename = "speech-start")]
    SpeechStart,

    #[serde(rename = "speech-end")]
    SpeechEnd,

    #[serde(rename = "tool-call-start", rename_all = "camelCase")]
    ToolCallStart {
        name: String,
        call_id: String,
        arguments: Value,
    },

    #[serde(rename = "tool-call-end", rename_all = "camelCase")]
    ToolCallEnd {
        call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        duration_ms: u64,
    },

    #[serde(rename = "stage-change")]
    StageChange {
        from: String,
        to: String,
        reason: String,
    },

    #[serde(rename = "error")]
    Error { code: ErrorCode, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_client_message_is_tolerated() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"telemetry","payload":42}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Unknown));
    }

    #[test]
    fn reconnect_uses_camel_case() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"reconnect","sessionId":"abc"}"#).unwrap();
        match msg {
            ClientMessage::Reconnect { session_id } => assert_eq!(session_id, "abc"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn ready_wire_shape() {
        let msg = ServerMessage::Ready {
            id: "s1".into(),
            protocol_version: PROTOCOL_VERSION,
            ice_servers: None,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "ready");
        assert_eq!(json["protocolVersion"], 1);
        assert!(json.get("iceServers").is_none());
    }

    #[test]
    fn event_type_tags_use_dashes() {
        let json = serde_json::to_value(&ServerMessage::TtsCancelled).unwrap();
        assert_eq!(json["type"], "tts-cancelled");

        let json = serde_json::to_value(&ServerMessage::ToolCallEnd {
            call_id: "c1".into(),
            result: Some(serde_json::json!({"ok": true})),
            error: None,
            duration_ms: 12,
        })
        .unwrap();
        assert_eq!(json["type"], "tool-call-end");
        assert_eq!(json["callId"], "c1");
        assert_eq!(json["durationMs"], 12);
    }

    #[test]
    fn error_carries_wire_code() {
        let json = serde_json::to_value(&ServerMessage::Error {
            code: ErrorCode::SessionNotFound,
            message: "gone".into(),
        })
        .unwrap();
        assert_eq!(json["code"], "SESSION_NOT_FOUND");
    }
}
