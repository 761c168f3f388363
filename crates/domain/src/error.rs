use serde::{Deserialize, Serialize};

/// Shared error type used across all voxgate crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("STT: {0}")]
    Stt(String),

    #[error("LLM: {0}")]
    Llm(String),

    #[error("TTS: {0}")]
    Tts(String),

    #[error("VAD init: {0}")]
    VadInit(String),

    #[error("audio: {0}")]
    Audio(String),

    #[error("tool {name}: {message}")]
    Tool { name: String, message: String },

    #[error("playbook: {0}")]
    Playbook(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("config: {0}")]
    Config(String),

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Map this error to the wire-visible code. Timeout classification is
    /// stage-specific, so callers that know the stage emit explicit codes
    /// instead of relying on this default.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Stt(_) => ErrorCode::SttError,
            Error::Llm(_) => ErrorCode::LlmError,
            Error::Tts(_) => ErrorCode::TtsError,
            Error::VadInit(_) => ErrorCode::VadError,
            Error::Audio(_) => ErrorCode::AudioProcessingError,
            Error::Tool { .. } => ErrorCode::ToolError,
            Error::Playbook(_) => ErrorCode::PlaybookError,
            Error::SessionNotFound(_) => ErrorCode::SessionNotFound,
            Error::InvalidMessage(_) => ErrorCode::InvalidMessage,
            Error::Http { status: 429, .. } => ErrorCode::RateLimited,
            Error::Http { .. } => ErrorCode::ConnectionFailed,
            _ => ErrorCode::InternalError,
        }
    }

    /// Whether a provider call that failed with this error may be retried
    /// (rate limits, server errors, timeouts). Client errors are final.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Timeout(_) => true,
            Error::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Closed set of error codes visible on the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    WebrtcUnavailable,
    ConnectionFailed,
    SessionNotFound,
    SessionExpired,
    SttError,
    SttTimeout,
    LlmError,
    LlmTimeout,
    TtsError,
    TtsTimeout,
    AudioProcessingError,
    VadError,
    InvalidMessage,
    InvalidAudioFormat,
    ToolError,
    PlaybookError,
    InternalError,
    RateLimited,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_wire_format_is_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::SttTimeout).unwrap();
        assert_eq!(json, "\"STT_TIMEOUT\"");
        let json = serde_json::to_string(&ErrorCode::WebrtcUnavailable).unwrap();
        assert_eq!(json, "\"WEBRTC_UNAVAILABLE\"");
    }

    #[test]
    fn default_classification() {
        assert_eq!(Error::Stt("boom".into()).code(), ErrorCode::SttError);
        assert_eq!(
            Error::Http { status: 429, message: "slow down".into() }.code(),
            ErrorCode::RateLimited
        );
        assert_eq!(Error::Cancelled.code(), ErrorCode::InternalError);
    }

    #[test]
    fn retryable_statuses() {
        assert!(Error::Http { status: 429, message: String::new() }.is_retryable());
        assert!(Error::Http { status: 503, message: String::new() }.is_retryable());
        assert!(Error::Timeout("llm".into()).is_retryable());
        assert!(!Error::Http { status: 400, message: String::new() }.is_retryable());
        assert!(!Error::Llm("bad".into()).is_retryable());
    }
}
