//! Turn entry point: one producer task per utterance.
//!
//! Event schedule per turn: `transcript` → `llm-chunk`* → (`tool-call-*`,
//! `stage-change`) → `llm-chunk{done}` → `llm` → `tts-start` →
//! `tts-chunk`* → exactly one of `tts-complete` / `tts-cancelled` (or a
//! fatal `error` before TTS ever starts). Cancellation at any await
//! produces the `tts-cancelled` terminal and nothing after it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use vx_domain::event::TurnEvent;
use vx_domain::ErrorCode;
use vx_playbook::{evaluate_transitions, HistoryPolicy};
use vx_sessions::{Session, TurnToken};

use super::llm::{build_request, stream_llm};
use super::playbook::run_playbook_turn;
use super::tts::{spawn_tts_worker, SpeechFeeder, TtsGate, TtsWorkerEvent};
use super::{emit, LlmOutcome, TurnAbort};
use crate::state::AppState;

/// Event channel depth; a slow transport backpressures the pipeline.
const EVENT_CHANNEL_DEPTH: usize = 64;
/// Sentence queue depth; a slow synthesizer pauses LLM reads.
const SENTENCE_CHANNEL_DEPTH: usize = 64;

/// Start a turn for a captured utterance. Returns the turn id and the
/// event stream; the producer runs until its terminal event or
/// cancellation via the session's active token.
pub fn run_turn(
    state: AppState,
    session: Arc<Session>,
    wav: Vec<u8>,
) -> (Uuid, mpsc::Receiver<TurnEvent>) {
    let (token, attachments) = session.begin_turn();
    let turn_id = token.turn_id();
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_DEPTH);

    let span = tracing::info_span!("turn", %turn_id, session_id = %session.id());
    tokio::spawn(
        async move {
            run_turn_inner(state, &session, wav, attachments, tx, &token).await;
            session.finish_turn(&token);
            tracing::debug!("turn finished");
        }
        .instrument(span),
    );

    (turn_id, rx)
}

async fn run_turn_inner(
    state: AppState,
    session: &Arc<Session>,
    wav: Vec<u8>,
    attachments: Vec<vx_domain::message::Attachment>,
    tx: mpsc::Sender<TurnEvent>,
    token: &TurnToken,
) {
    let turn_cfg = &state.config.turn;

    // ── STT ────────────────────────────────────────────────────────
    let stt_deadline = Instant::now() + Duration::from_secs(turn_cfg.stt_timeout_secs);
    let transcription = match token
        .guard(tokio::time::timeout_at(stt_deadline, state.stt.transcribe(&wav)))
        .await
    {
        None => {
            emit(&tx, session, TurnEvent::TtsCancelled).await;
            return;
        }
        Some(Err(_)) => {
            emit(
                &tx,
                session,
                TurnEvent::Error {
                    code: ErrorCode::SttTimeout,
                    message: "transcription timed out".into(),
                },
            )
            .await;
            return;
        }
        Some(Ok(Err(e))) => {
            tracing::warn!(error = %e, "transcription failed");
            emit(
                &tx,
                session,
                TurnEvent::Error {
                    code: ErrorCode::SttError,
                    message: e.to_string(),
                },
            )
            .await;
            return;
        }
        Some(Ok(Ok(t))) => t,
    };

    let text = transcription.text.trim().to_string();
    emit(
        &tx,
        session,
        TurnEvent::Transcript {
            text: text.clone(),
            is_final: transcription.is_final,
        },
    )
    .await;

    // Nothing recognized: no turn to run.
    if text.is_empty() {
        return;
    }
    session.append_user(&text, attachments);

    // ── Pipeline: LLM → sentences → TTS ────────────────────────────
    let (sentence_tx, sentence_rx) = mpsc::channel(SENTENCE_CHANNEL_DEPTH);
    let tts_rx = spawn_tts_worker(
        state.tts.clone(),
        token.clone(),
        Duration::from_secs(turn_cfg.tts_sentence_timeout_secs),
        sentence_rx,
    );
    let mut gate = TtsGate::new(tts_rx);
    let mut feeder = SpeechFeeder::new(sentence_tx);

    let phase = match &state.playbook {
        Some(playbook) => {
            run_playbook_turn(&state, session, playbook, &tx, token, &mut feeder, &mut gate).await
        }
        None => run_simple_turn(&state, session, &tx, token, &mut feeder, &mut gate).await,
    };

    let outcome = match phase {
        Ok(outcome) => outcome,
        Err(TurnAbort::Cancelled) => {
            emit(&tx, session, TurnEvent::TtsCancelled).await;
            return;
        }
        Err(TurnAbort::Failed { code, message }) => {
            tracing::warn!(?code, %message, "turn failed");
            emit(&tx, session, TurnEvent::Error { code, message }).await;
            return;
        }
    };

    // ── Stage transition ───────────────────────────────────────────
    if let (Some(playbook), Some(stage_state)) = (&state.playbook, session.stage()) {
        if let Some(m) = evaluate_transitions(playbook, &stage_state.stage_id, &outcome.record) {
            let to = m.transition.to.clone();
            emit(
                &tx,
                session,
                TurnEvent::StageChange {
                    from: stage_state.stage_id.clone(),
                    to: to.clone(),
                    reason: m.reason.to_string(),
                },
            )
            .await;
            session.set_stage(&to);
            if let Some(target) = playbook.stage(&to) {
                match target.history {
                    HistoryPolicy::Full => {}
                    HistoryPolicy::Reset => session.clear_history(),
                    HistoryPolicy::LastN { keep } => session.truncate_history(keep),
                }
            }
            tracing::info!(from = %stage_state.stage_id, to = %to, reason = m.reason, "stage change");
        }
    }

    // ── Close the LLM stream ───────────────────────────────────────
    emit(
        &tx,
        session,
        TurnEvent::LlmChunk {
            content: String::new(),
            done: true,
        },
    )
    .await;

    let spoken = !outcome.full_text.trim().is_empty();
    if spoken {
        emit(
            &tx,
            session,
            TurnEvent::LlmFull {
                text: outcome.full_text.clone(),
            },
        )
        .await;
    }

    // The assistant message lands in history once the LLM has fully
    // responded, whatever happens to playback afterwards.
    let tail = outcome.tail_text.trim();
    if !tail.is_empty() {
        session.append_assistant(tail);
    }

    if !spoken {
        return;
    }

    // ── TTS playback ───────────────────────────────────────────────
    // Flush the trailing sentence; from here on a cancellation is
    // "during TTS" and the appended history stays.
    if feeder.finish(&mut gate, token).await.is_err() {
        emit(&tx, session, TurnEvent::TtsCancelled).await;
        return;
    }
    emit(&tx, session, TurnEvent::TtsStart).await;
    loop {
        match token.guard(gate.next()).await {
            None => {
                emit(&tx, session, TurnEvent::TtsCancelled).await;
                return;
            }
            Some(None) => break,
            Some(Some(TtsWorkerEvent::Chunk { pcm, sample_rate })) => {
                emit(&tx, session, TurnEvent::TtsChunk { pcm, sample_rate }).await;
            }
            Some(Some(TtsWorkerEvent::SentenceFailed { code, message })) => {
                tracing::warn!(?code, %message, "sentence skipped");
                emit(&tx, session, TurnEvent::Error { code, message }).await;
            }
        }
    }
    emit(&tx, session, TurnEvent::TtsComplete).await;
}

/// The no-playbook path: one streaming call, no tools.
async fn run_simple_turn(
    state: &AppState,
    session: &Arc<Session>,
    tx: &mpsc::Sender<TurnEvent>,
    token: &TurnToken,
    feeder: &mut SpeechFeeder,
    gate: &mut TtsGate,
) -> Result<LlmOutcome, TurnAbort> {
    let req = build_request(&session.system_prompt(), session.history(), Vec::new());
    let resp = stream_llm(
        &state.llm,
        req,
        Duration::from_secs(state.config.turn.llm_timeout_secs),
        tx,
        session,
        token,
        Some(feeder),
        gate,
    )
    .await?;

    if !resp.tool_calls.is_empty() {
        tracing::debug!(calls = resp.tool_calls.len(), "model emitted tool calls without a playbook");
    }

    Ok(LlmOutcome {
        full_text: resp.text.clone(),
        tail_text: resp.text,
        record: Default::default(),
    })
}
