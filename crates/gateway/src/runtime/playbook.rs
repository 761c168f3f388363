//! The playbook driver: stage-scoped requests, the phase-1 tool loop,
//! and two-phase execution.
//!
//! Tool calls within one response execute serialized, in declared order,
//! with no retries — a failed tool returns its error string to the model,
//! which can respond around it.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;

use vx_domain::event::TurnEvent;
use vx_domain::message::{ToolCall, ToolDefinition};
use vx_domain::ErrorCode;
use vx_playbook::{transition_tool_definition, Playbook, RequestedTransition, TurnRecord, TRANSITION_TOOL};
use vx_sessions::{Session, TurnToken};

use super::llm::{build_request, stream_llm};
use super::tts::{SpeechFeeder, TtsGate};
use super::{emit, LlmOutcome, RaceOutcome, TurnAbort};
use crate::state::AppState;

/// Awaits bounded only by the turn token.
const FAR_FUTURE: Duration = Duration::from_secs(3600);

pub(crate) async fn run_playbook_turn(
    state: &AppState,
    session: &Arc<Session>,
    playbook: &Playbook,
    tx: &mpsc::Sender<TurnEvent>,
    token: &TurnToken,
    feeder: &mut SpeechFeeder,
    gate: &mut TtsGate,
) -> Result<LlmOutcome, TurnAbort> {
    let turn_cfg = &state.config.turn;
    let llm_timeout = Duration::from_secs(turn_cfg.llm_timeout_secs);

    let stage_id = match session.stage() {
        Some(s) => s.stage_id,
        None => {
            session.set_stage(&playbook.initial);
            playbook.initial.clone()
        }
    };
    let stage = playbook.stage(&stage_id).ok_or_else(|| TurnAbort::Failed {
        code: ErrorCode::PlaybookError,
        message: format!("session references unknown stage `{stage_id}`"),
    })?;

    let system_prompt = stage_prompt(&session.system_prompt(), &stage.prompt);
    let mut tool_defs = state.tools.definitions(&stage.tools);
    if playbook.needs_transition_tool(&stage_id) {
        tool_defs.push(transition_tool_definition());
    }

    let mut record = TurnRecord::default();

    let (full_text, tail_text) = if stage.two_phase {
        // Phase 1: silent tool loop. Nothing here reaches TTS or the
        // chunk stream.
        run_tool_loop(state, session, tx, token, gate, &system_prompt, &tool_defs, &mut record)
            .await?;

        // Phase 2: the spoken reply, streamed. Tool work is done, so no
        // tools are attached.
        let req = build_request(&system_prompt, session.history(), Vec::new());
        let resp = stream_llm(&state.llm, req, llm_timeout, tx, session, token, Some(feeder), gate)
            .await?;
        if !resp.tool_calls.is_empty() {
            tracing::debug!(calls = resp.tool_calls.len(), "ignoring tool calls in spoken phase");
        }
        (resp.text.clone(), resp.text)
    } else {
        // Interleaved: one streaming loop where chunks and tool calls mix.
        let mut full = String::new();
        let mut tail = String::new();
        for _ in 0..turn_cfg.max_tool_calls_per_turn {
            let req = build_request(&system_prompt, session.history(), tool_defs.clone());
            let resp = stream_llm(
                &state.llm,
                req,
                llm_timeout,
                tx,
                session,
                token,
                Some(&mut *feeder),
                gate,
            )
            .await?;
            full.push_str(&resp.text);
            if resp.tool_calls.is_empty() {
                tail = resp.text;
                break;
            }
            execute_tool_calls(
                state,
                session,
                tx,
                token,
                gate,
                &resp.text,
                &resp.tool_calls,
                &mut record,
            )
            .await?;
        }
        (full, tail)
    };

    record.response_text = full_text.clone();
    record.turns_in_stage = session.bump_stage_turns();

    Ok(LlmOutcome {
        full_text,
        tail_text,
        record,
    })
}

fn stage_prompt(base: &str, fragment: &str) -> String {
    match (base.is_empty(), fragment.is_empty()) {
        (_, true) => base.to_string(),
        (true, false) => fragment.to_string(),
        (false, false) => format!("{base}\n\n{fragment}"),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Phase 1: the tool loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[allow(clippy::too_many_arguments)]
async fn run_tool_loop(
    state: &AppState,
    session: &Arc<Session>,
    tx: &mpsc::Sender<TurnEvent>,
    token: &TurnToken,
    gate: &mut TtsGate,
    system_prompt: &str,
    tool_defs: &[ToolDefinition],
    record: &mut TurnRecord,
) -> Result<(), TurnAbort> {
    if tool_defs.is_empty() {
        return Ok(());
    }

    let turn_cfg = &state.config.turn;
    let deadline = Instant::now() + Duration::from_secs(turn_cfg.phase1_timeout_secs);
    let llm_timeout = Duration::from_secs(turn_cfg.llm_timeout_secs);

    for iteration in 0..turn_cfg.max_tool_calls_per_turn {
        let call_deadline = deadline.min(Instant::now() + llm_timeout);
        let req = build_request(system_prompt, session.history(), tool_defs.to_vec());

        let resp = match gate.race(token, call_deadline, state.llm.chat(&req)).await {
            RaceOutcome::Cancelled => return Err(TurnAbort::Cancelled),
            RaceOutcome::TimedOut => {
                if Instant::now() >= deadline {
                    tracing::warn!(iteration, "phase-1 deadline reached, moving to spoken phase");
                    break;
                }
                return Err(TurnAbort::Failed {
                    code: ErrorCode::LlmTimeout,
                    message: "LLM call timed out".into(),
                });
            }
            RaceOutcome::Done(Err(e)) => return Err(TurnAbort::from_llm_error(e)),
            RaceOutcome::Done(Ok(resp)) => resp,
        };

        // No tool calls means the model is done working; its phase-1
        // text is never spoken.
        if resp.tool_calls.is_empty() {
            break;
        }

        tracing::debug!(iteration, calls = resp.tool_calls.len(), "tool loop iteration");
        execute_tool_calls(
            state,
            session,
            tx,
            token,
            gate,
            &resp.content,
            &resp.tool_calls,
            record,
        )
        .await?;

        if Instant::now() >= deadline {
            tracing::warn!(iteration, "phase-1 deadline reached after tool dispatch");
            break;
        }
    }

    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[allow(clippy::too_many_arguments)]
pub(super) async fn execute_tool_calls(
    state: &AppState,
    session: &Arc<Session>,
    tx: &mpsc::Sender<TurnEvent>,
    token: &TurnToken,
    gate: &mut TtsGate,
    assistant_text: &str,
    calls: &[ToolCall],
    record: &mut TurnRecord,
) -> Result<(), TurnAbort> {
    session.append_assistant_tool_use(assistant_text, calls.to_vec());

    for tc in calls {
        if token.is_cancelled() {
            return Err(TurnAbort::Cancelled);
        }

        emit(
            tx,
            session,
            TurnEvent::ToolCallStart {
                name: tc.tool_name.clone(),
                call_id: tc.call_id.clone(),
                arguments: tc.arguments.clone(),
            },
        )
        .await;

        let started = std::time::Instant::now();
        let result = dispatch_one(state, token, gate, record, tc).await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(value) => {
                emit(
                    tx,
                    session,
                    TurnEvent::ToolCallEnd {
                        call_id: tc.call_id.clone(),
                        result: Some(value.clone()),
                        error: None,
                        duration_ms,
                    },
                )
                .await;
                record.tool_results.push(value.clone());
                session.append_tool(&tc.tool_name, &tc.call_id, value.to_string());
            }
            Err(message) => {
                emit(
                    tx,
                    session,
                    TurnEvent::ToolCallEnd {
                        call_id: tc.call_id.clone(),
                        result: None,
                        error: Some(message.clone()),
                        duration_ms,
                    },
                )
                .await;
                session.append_tool(
                    &tc.tool_name,
                    &tc.call_id,
                    json!({ "error": message }).to_string(),
                );
            }
        }
    }

    Ok(())
}

/// Run one tool call. The reserved `playbook_transition` pseudo-tool is
/// handled here: it records the requested transition and acknowledges.
async fn dispatch_one(
    state: &AppState,
    token: &TurnToken,
    gate: &mut TtsGate,
    record: &mut TurnRecord,
    tc: &ToolCall,
) -> Result<Result<serde_json::Value, String>, TurnAbort> {
    if tc.tool_name == TRANSITION_TOOL {
        let target = tc
            .arguments
            .get("target")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        if target.is_empty() {
            return Ok(Err("missing required `target` argument".into()));
        }
        let reason = tc
            .arguments
            .get("reason")
            .and_then(|v| v.as_str())
            .map(String::from);
        record.requested_transition = Some(RequestedTransition {
            target: target.clone(),
            reason,
        });
        return Ok(Ok(json!({ "ok": true, "target": target })));
    }

    let deadline = Instant::now() + FAR_FUTURE;
    match gate
        .race(token, deadline, state.tools.dispatch(&tc.tool_name, tc.arguments.clone()))
        .await
    {
        RaceOutcome::Cancelled => Err(TurnAbort::Cancelled),
        RaceOutcome::TimedOut => Ok(Err("tool timed out".into())),
        RaceOutcome::Done(Ok(value)) => Ok(Ok(value)),
        RaceOutcome::Done(Err(e)) => Ok(Err(e.to_string())),
    }
}
