use std::pin::Pin;

use crate::message::ToolCall;

/// A boxed async stream, used for LLM and TTS streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events emitted during LLM streaming (provider-agnostic).
#[derive(Debug, Clone)]
pub enum LlmStreamEvent {
    /// A text token chunk.
    Token { text: String },

    /// A tool call has started.
    ToolCallStarted { call_id: String, tool_name: String },

    /// Incremental tool call argument data.
    ToolCallDelta { call_id: String, delta: String },

    /// A tool call is complete with full arguments.
    ToolCallFinished(ToolCall),

    /// Stream is finished.
    Done { stop_reason: Option<String> },

    /// An error occurred during streaming.
    Error { message: String },
}
