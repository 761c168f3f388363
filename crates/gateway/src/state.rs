use std::sync::Arc;

use vx_domain::config::Config;
use vx_playbook::{Playbook, ToolRegistry};
use vx_providers::{LlmProvider, SttProvider, TtsProvider};
use vx_sessions::{SessionManager, SessionPrototype};

use crate::media::MediaFactory;

/// Shared application state handed to every connection.
///
/// Provider clients are process-wide singletons; per-session state lives
/// exclusively inside the session manager.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,

    // ── Provider capabilities ─────────────────────────────────────
    pub stt: Arc<dyn SttProvider>,
    pub llm: Arc<dyn LlmProvider>,
    pub tts: Arc<dyn TtsProvider>,

    // ── Session & playbook ────────────────────────────────────────
    pub sessions: Arc<SessionManager>,
    pub tools: Arc<ToolRegistry>,
    pub playbook: Option<Arc<Playbook>>,

    // ── Media plane ───────────────────────────────────────────────
    pub media: Arc<dyn MediaFactory>,
}

impl AppState {
    /// Template for sessions created by this gateway.
    pub fn session_prototype(&self) -> SessionPrototype {
        SessionPrototype {
            system_prompt: self.config.system_prompt.clone(),
            history_cap: self.config.session.history_cap,
            initial_stage: self.playbook.as_ref().map(|p| p.initial.clone()),
        }
    }
}
