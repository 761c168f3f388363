//! Shared fixtures for gateway tests: scripted providers wired into an
//! [`AppState`], plus event-stream helpers.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use vx_domain::config::Config;
use vx_domain::event::TurnEvent;
use vx_gateway::media::NullMediaFactory;
use vx_gateway::state::AppState;
use vx_playbook::{Playbook, ToolRegistry};
use vx_providers::testing::{ScriptedLlm, ScriptedStt, ScriptedTts};
use vx_sessions::SessionManager;

pub struct StateBuilder {
    pub config: Config,
    pub stt: Arc<ScriptedStt>,
    pub llm: Arc<ScriptedLlm>,
    pub tts: Arc<ScriptedTts>,
    pub tools: Arc<ToolRegistry>,
    pub playbook: Option<Arc<Playbook>>,
}

impl StateBuilder {
    pub fn new(stt: ScriptedStt, llm: ScriptedLlm) -> Self {
        Self {
            config: Config::default(),
            stt: Arc::new(stt),
            llm: Arc::new(llm),
            tts: Arc::new(ScriptedTts::new()),
            tools: Arc::new(ToolRegistry::new()),
            playbook: None,
        }
    }

    pub fn tts(mut self, tts: ScriptedTts) -> Self {
        self.tts = Arc::new(tts);
        self
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Arc::new(tools);
        self
    }

    pub fn playbook(mut self, raw: &str) -> Self {
        self.playbook = Some(Arc::new(Playbook::from_toml_str(raw).expect("playbook")));
        self
    }

    pub fn config(mut self, f: impl FnOnce(&mut Config)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn build(self) -> AppState {
        AppState {
            config: Arc::new(self.config),
            stt: self.stt,
            llm: self.llm,
            tts: self.tts,
            sessions: Arc::new(SessionManager::new()),
            tools: self.tools,
            playbook: self.playbook,
            media: Arc::new(NullMediaFactory),
        }
    }
}

/// Drain a turn's event stream to completion (bounded per event).
pub async fn collect_events(mut rx: mpsc::Receiver<TurnEvent>) -> Vec<TurnEvent> {
    let mut events = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(ev)) => events.push(ev),
            Ok(None) => break,
            Err(_) => panic!("turn event stream stalled; got {events:?}"),
        }
    }
    events
}

/// Compact tag for order assertions.
pub fn kind(ev: &TurnEvent) -> &'static str {
    match ev {
        TurnEvent::Transcript { .. } => "transcript",
        TurnEvent::LlmChunk { done: false, .. } => "llm-chunk",
        TurnEvent::LlmChunk { done: true, .. } => "llm-done",
        TurnEvent::LlmFull { .. } => "llm",
        TurnEvent::ToolCallStart { .. } => "tool-call-start",
        TurnEvent::ToolCallEnd { .. } => "tool-call-end",
        TurnEvent::StageChange { .. } => "stage-change",
        TurnEvent::TtsStart => "tts-start",
        TurnEvent::TtsChunk { .. } => "tts-chunk",
        TurnEvent::TtsComplete => "tts-complete",
        TurnEvent::TtsCancelled => "tts-cancelled",
        TurnEvent::Error { .. } => "error",
    }
}

pub fn kinds(events: &[TurnEvent]) -> Vec<&'static str> {
    events.iter().map(kind).collect()
}
