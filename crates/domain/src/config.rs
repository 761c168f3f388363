//! Server configuration, deserialized from a TOML file.
//!
//! Every section has defaults tuned for a local deployment, so an empty
//! file is a valid configuration (providers excepted — the gateway refuses
//! to serve without endpoint URLs).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::protocol::IceServer;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub vad: VadConfig,
    pub turn: TurnConfig,
    pub heartbeat: HeartbeatConfig,
    pub providers: ProvidersConfig,
    /// Base system prompt shared by every session.
    pub system_prompt: String,
    /// Optional playbook definition, loaded from its own TOML file.
    pub playbook_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// ICE servers advertised in the `ready` handshake.
    pub ice_servers: Vec<IceServer>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".into(),
            ice_servers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Most-recent non-system messages kept in history.
    pub history_cap: usize,
    /// Idle seconds before a session is evicted.
    pub idle_ttl_secs: u64,
    /// How often the sweeper wakes up.
    pub sweep_interval_secs: u64,
    /// When false, sessions are destroyed on transport close and
    /// `reconnect` is refused.
    pub allow_reconnect: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_cap: 8,
            idle_ttl_secs: 600,
            sweep_interval_secs: 30,
            allow_reconnect: true,
        }
    }
}

/// VAD segmenter tuning. Durations are in milliseconds of audio time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    pub backend: VadBackendKind,
    /// Path to the Silero ONNX model (silero backend only).
    pub model_path: Option<PathBuf>,
    /// Probability above which a window counts toward speech onset.
    pub enter_threshold: f32,
    /// Probability below which a window counts toward speech end.
    pub exit_threshold: f32,
    /// Consecutive speech required to fire `speech-start`.
    pub min_speech_ms: u32,
    /// Consecutive silence required to fire `speech-end`.
    pub min_silence_ms: u32,
    /// Audio replayed from before the onset.
    pub pre_roll_ms: u32,
    /// Hard cap forcing a synthetic `speech-end`.
    pub max_utterance_ms: u32,
    /// Utterances shorter than this (after pre-roll trim) are dropped.
    pub min_utterance_ms: u32,
    /// Sample rate of inbound audio before resampling.
    pub input_sample_rate: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            backend: VadBackendKind::Energy,
            model_path: None,
            enter_threshold: 0.5,
            exit_threshold: 0.35,
            min_speech_ms: 90,
            min_silence_ms: 500,
            pre_roll_ms: 300,
            max_utterance_ms: 30_000,
            min_utterance_ms: 100,
            input_sample_rate: 48_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VadBackendKind {
    Energy,
    Silero,
}

/// Per-stage timeouts and the tool loop bound, in seconds unless noted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    pub stt_timeout_secs: u64,
    pub llm_timeout_secs: u64,
    /// Deadline for the whole phase-1 tool loop.
    pub phase1_timeout_secs: u64,
    pub tts_sentence_timeout_secs: u64,
    pub max_tool_calls_per_turn: u32,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            stt_timeout_secs: 30,
            llm_timeout_secs: 30,
            phase1_timeout_secs: 60,
            tts_sentence_timeout_secs: 15,
            max_tool_calls_per_turn: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_secs: u64,
    /// Inbound silence after which the transport is closed.
    pub timeout_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: 15,
            timeout_secs: 45,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub stt: ProviderEndpoint,
    pub llm: ProviderEndpoint,
    pub tts: ProviderEndpoint,
}

/// One OpenAI-compatible endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderEndpoint {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: Option<String>,
    /// TTS voice name (ignored by STT/LLM).
    pub voice: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Config {
    /// Check the configuration for problems. Errors prevent startup;
    /// warnings are logged and serving continues.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        let error = |msg: String| ConfigIssue {
            severity: ConfigSeverity::Error,
            message: msg,
        };
        let warning = |msg: String| ConfigIssue {
            severity: ConfigSeverity::Warning,
            message: msg,
        };

        for (name, ep) in [
            ("stt", &self.providers.stt),
            ("llm", &self.providers.llm),
            ("tts", &self.providers.tts),
        ] {
            if ep.base_url.is_empty() {
                issues.push(error(format!("providers.{name}.base_url is not set")));
            }
        }

        if self.vad.backend == VadBackendKind::Silero && self.vad.model_path.is_none() {
            issues.push(error(
                "vad.model_path is required for the silero backend".into(),
            ));
        }
        if self.vad.exit_threshold >= self.vad.enter_threshold {
            issues.push(warning(format!(
                "vad.exit_threshold ({}) should be below vad.enter_threshold ({})",
                self.vad.exit_threshold, self.vad.enter_threshold
            )));
        }
        if self.session.history_cap == 0 {
            issues.push(warning("session.history_cap of 0 disables history".into()));
        }
        if self.heartbeat.timeout_secs <= self.heartbeat.interval_secs {
            issues.push(error(
                "heartbeat.timeout_secs must exceed heartbeat.interval_secs".into(),
            ));
        }

        issues
    }
}
