//! The turn event stream — the contract between the orchestrator and the
//! connection loop.
//!
//! A turn emits events in a fixed order: the transcript first, then LLM
//! chunks, then (when the reply is non-empty) the TTS phase. Exactly one
//! terminal event closes every turn.

use serde_json::Value;

use crate::error::ErrorCode;

/// Events emitted during a single voice turn.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    /// The recognized user utterance.
    Transcript { text: String, is_final: bool },

    /// Incremental assistant text. `done: true` closes the LLM stream.
    LlmChunk { content: String, done: bool },

    /// The full assistant reply, emitted after the last chunk.
    LlmFull { text: String },

    /// The model is invoking a tool.
    ToolCallStart {
        name: String,
        call_id: String,
        arguments: Value,
    },

    /// Tool execution finished. Exactly one of `result` / `error` is set.
    ToolCallEnd {
        call_id: String,
        result: Option<Value>,
        error: Option<String>,
        duration_ms: u64,
    },

    /// A playbook stage transition fired.
    StageChange {
        from: String,
        to: String,
        reason: String,
    },

    /// Speech synthesis is about to produce audio.
    TtsStart,

    /// A block of synthesized audio (16-bit LE PCM).
    TtsChunk { pcm: Vec<u8>, sample_rate: u32 },

    /// All sentences were synthesized and delivered.
    TtsComplete,

    /// The turn was cancelled (barge-in or shutdown).
    TtsCancelled,

    /// A stage of the pipeline failed.
    Error { code: ErrorCode, message: String },
}

impl TurnEvent {
    /// Whether this event closes the turn. `Error` terminates only when
    /// the orchestrator emits nothing after it (STT/LLM failures); TTS
    /// errors are recoverable and followed by more events.
    pub fn is_tts_terminal(&self) -> bool {
        matches!(self, TurnEvent::TtsComplete | TurnEvent::TtsCancelled)
    }
}
