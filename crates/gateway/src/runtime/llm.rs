//! LLM streaming consumption shared by the plain and playbook paths.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use vx_domain::event::TurnEvent;
use vx_domain::message::{Message, ToolCall, ToolDefinition};
use vx_domain::stream::LlmStreamEvent;
use vx_domain::ErrorCode;
use vx_providers::{ChatRequest, LlmProvider};
use vx_sessions::{Session, TurnToken};

use super::tts::{SpeechFeeder, TtsGate};
use super::{emit, RaceOutcome, TurnAbort};

pub(crate) struct StreamedResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

/// Assemble the request: system prompt first, then the capped history
/// (which already ends with the current user message).
pub(crate) fn build_request(
    system_prompt: &str,
    history: Vec<Message>,
    tools: Vec<ToolDefinition>,
) -> ChatRequest {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(Message::system(system_prompt));
    messages.extend(history);
    ChatRequest {
        messages,
        tools,
        temperature: None,
        max_tokens: None,
        model: None,
    }
}

/// Drive one streaming LLM call: forward text deltas as `llm-chunk`
/// events, feed the sentence chunker when a feeder is given, and collect
/// any tool calls for the caller.
pub(crate) async fn stream_llm(
    llm: &Arc<dyn LlmProvider>,
    req: ChatRequest,
    timeout: Duration,
    tx: &mpsc::Sender<TurnEvent>,
    session: &Session,
    token: &TurnToken,
    mut feeder: Option<&mut SpeechFeeder>,
    gate: &mut TtsGate,
) -> Result<StreamedResponse, TurnAbort> {
    let deadline = Instant::now() + timeout;

    let mut stream = match gate.race(token, deadline, llm.chat_stream(&req)).await {
        RaceOutcome::Cancelled => return Err(TurnAbort::Cancelled),
        RaceOutcome::TimedOut => return Err(llm_timeout()),
        RaceOutcome::Done(Err(e)) => return Err(TurnAbort::from_llm_error(e)),
        RaceOutcome::Done(Ok(stream)) => stream,
    };

    let mut text = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    // (call_id, name, partial args) for providers that never emit a
    // finished event; declaration order is preserved.
    let mut partial: Vec<(String, String, String)> = Vec::new();

    loop {
        let event = match gate.race(token, deadline, stream.next()).await {
            RaceOutcome::Cancelled => return Err(TurnAbort::Cancelled),
            RaceOutcome::TimedOut => return Err(llm_timeout()),
            RaceOutcome::Done(None) => break,
            RaceOutcome::Done(Some(Err(e))) => return Err(TurnAbort::from_llm_error(e)),
            RaceOutcome::Done(Some(Ok(event))) => event,
        };

        match event {
            LlmStreamEvent::Token { text: delta } => {
                emit(
                    tx,
                    session,
                    TurnEvent::LlmChunk {
                        content: delta.clone(),
                        done: false,
                    },
                )
                .await;
                if let Some(feeder) = feeder.as_deref_mut() {
                    feeder.feed(gate, token, &delta).await?;
                }
                text.push_str(&delta);
            }
            LlmStreamEvent::ToolCallStarted { call_id, tool_name } => {
                partial.push((call_id, tool_name, String::new()));
            }
            LlmStreamEvent::ToolCallDelta { call_id, delta } => {
                if let Some((_, _, args)) = partial.iter_mut().find(|(id, _, _)| *id == call_id) {
                    args.push_str(&delta);
                }
            }
            LlmStreamEvent::ToolCallFinished(tc) => {
                partial.retain(|(id, _, _)| *id != tc.call_id);
                tool_calls.push(tc);
            }
            LlmStreamEvent::Done { .. } => break,
            LlmStreamEvent::Error { message } => {
                return Err(TurnAbort::Failed {
                    code: ErrorCode::LlmError,
                    message,
                })
            }
        }
    }

    // Anything still partial was assembled from start/delta only.
    for (call_id, tool_name, args) in partial {
        let arguments: Value = if args.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(&args).unwrap_or_else(|e| {
                tracing::warn!(call_id = %call_id, error = %e, "tool arguments are not valid JSON");
                Value::Object(Default::default())
            })
        };
        tool_calls.push(ToolCall {
            call_id,
            tool_name,
            arguments,
        });
    }

    Ok(StreamedResponse { text, tool_calls })
}

fn llm_timeout() -> TurnAbort {
    TurnAbort::Failed {
        code: ErrorCode::LlmTimeout,
        message: "LLM call timed out".into(),
    }
}
