use vx_domain::message::{Message, ToolCall, ToolDefinition};
use vx_domain::stream::{BoxStream, LlmStreamEvent};
use vx_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic chat completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// The conversation messages to send, system prompt first.
    pub messages: Vec<Message>,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,
    /// Sampling temperature. `None` lets the provider choose.
    pub temperature: Option<f32>,
    /// Maximum tokens in the response. `None` lets the provider choose.
    pub max_tokens: Option<u32>,
    /// Model identifier override. `None` uses the adapter default.
    pub model: Option<String>,
}

/// A provider-agnostic chat completion response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    /// Why the model stopped (e.g. "stop", "tool_calls").
    pub stop_reason: Option<String>,
}

/// A finished transcription.
#[derive(Debug, Clone)]
pub struct Transcription {
    pub text: String,
    pub is_final: bool,
}

/// Encoding of synthesized audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    /// Raw 16-bit LE PCM at the given rate.
    Pcm16 { sample_rate: u32 },
    Wav,
    Mp3,
    Opus,
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Pcm16 { .. } => "pcm",
            AudioFormat::Wav => "wav",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Opus => "opus",
        }
    }
}

/// One block of synthesized speech.
#[derive(Debug, Clone)]
pub struct SpeechAudio {
    pub audio: Vec<u8>,
    pub format: AudioFormat,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Capability traits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Speech-to-text. Input is a complete RIFF/WAVE utterance.
#[async_trait::async_trait]
pub trait SttProvider: Send + Sync {
    async fn transcribe(&self, wav: &[u8]) -> Result<Transcription>;
}

/// Chat-completion LLM. Adapters translate between these types and each
/// provider's wire format; cancellation is handled by dropping the future
/// or the returned stream, which aborts the underlying HTTP call.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a request and wait for the full response.
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse>;

    /// Send a request and return a stream of events.
    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<LlmStreamEvent>>>;
}

/// Text-to-speech. `speak` is required; `speak_stream` is the optional
/// low-latency variant yielding encoded chunks as they are produced.
#[async_trait::async_trait]
pub trait TtsProvider: Send + Sync {
    async fn speak(&self, text: &str) -> Result<SpeechAudio>;

    fn supports_streaming(&self) -> bool {
        false
    }

    /// Chunks carry the format reported by [`TtsProvider::stream_format`].
    async fn speak_stream(&self, text: &str) -> Result<BoxStream<'static, Result<Vec<u8>>>> {
        let _ = text;
        Err(Error::Tts("streaming synthesis not supported".into()))
    }

    fn stream_format(&self) -> AudioFormat {
        AudioFormat::Pcm16 { sample_rate: 24_000 }
    }
}
