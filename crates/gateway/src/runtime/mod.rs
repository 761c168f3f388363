//! The per-turn orchestrator pipeline.
//!
//! A turn is a producer task writing [`TurnEvent`]s into a bounded
//! channel: STT, then the LLM phase (plain streaming, or the playbook
//! tool loop), then sentence-chunked TTS. One [`vx_sessions::TurnToken`]
//! is shared by every sub-task; all awaits race against it.

pub mod chunker;
mod llm;
mod playbook;
mod tts;
mod turn;

pub use turn::run_turn;

use tokio::sync::mpsc;

use vx_domain::event::TurnEvent;
use vx_domain::{Error, ErrorCode};
use vx_playbook::TurnRecord;
use vx_sessions::Session;

/// Why an LLM phase ended without a usable response.
#[derive(Debug)]
pub(crate) enum TurnAbort {
    Cancelled,
    Failed { code: ErrorCode, message: String },
}

impl TurnAbort {
    pub(crate) fn from_llm_error(e: Error) -> Self {
        let code = match &e {
            Error::Timeout(_) => ErrorCode::LlmTimeout,
            other => match other.code() {
                ErrorCode::InternalError => ErrorCode::LlmError,
                code => code,
            },
        };
        TurnAbort::Failed {
            code,
            message: e.to_string(),
        }
    }
}

/// Result of racing a pipeline await against cancellation and a deadline.
pub(crate) enum RaceOutcome<T> {
    Done(T),
    Cancelled,
    TimedOut,
}

/// What the LLM phase produced.
#[derive(Debug, Default)]
pub(crate) struct LlmOutcome {
    /// Everything streamed or spoken this turn (the wire `llm` payload).
    pub full_text: String,
    /// The final reply segment not yet recorded in history.
    pub tail_text: String,
    /// Inputs for playbook transition evaluation.
    pub record: TurnRecord,
}

/// Forward one event to the connection, touching the session.
pub(crate) async fn emit(tx: &mpsc::Sender<TurnEvent>, session: &Session, event: TurnEvent) {
    session.touch();
    // A dropped receiver means the transport died; the turn keeps running
    // until its token is cancelled.
    let _ = tx.send(event).await;
}
