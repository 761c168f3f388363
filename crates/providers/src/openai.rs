//! OpenAI-compatible adapters for the three voice capabilities.
//!
//! Works with OpenAI itself and with any server speaking the same wire
//! format (LocalAI, vLLM, Ollama, Kokoro-FastAPI, faster-whisper-server):
//! `/audio/transcriptions` for STT, `/chat/completions` for the LLM, and
//! `/audio/speech` for TTS. One `reqwest::Client` is shared per process.

use std::collections::HashMap;

use serde_json::{json, Value};

use vx_domain::config::ProviderEndpoint;
use vx_domain::message::{Message, Role, ToolCall};
use vx_domain::stream::{BoxStream, LlmStreamEvent};
use vx_domain::{Error, Result};

use crate::retry::RetryPolicy;
use crate::sse::decode_sse;
use crate::traits::{
    AudioFormat, ChatRequest, ChatResponse, LlmProvider, SpeechAudio, SttProvider, Transcription,
    TtsProvider,
};
use crate::util::{error_for_status, from_reqwest};

/// PCM rate produced by `/audio/speech` with `response_format: "pcm"`.
const TTS_PCM_RATE: u32 = 24_000;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared endpoint plumbing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
struct Endpoint {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    retry: RetryPolicy,
}

impl Endpoint {
    fn new(cfg: &ProviderEndpoint, client: reqwest::Client, default_model: &str) -> Self {
        Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone().unwrap_or_else(|| default_model.into()),
            retry: RetryPolicy::default(),
        }
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(format!("{}{path}", self.base_url));
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        builder
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STT
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiStt {
    endpoint: Endpoint,
}

impl OpenAiStt {
    pub fn new(cfg: &ProviderEndpoint, client: reqwest::Client) -> Self {
        Self {
            endpoint: Endpoint::new(cfg, client, "whisper-1"),
        }
    }
}

#[async_trait::async_trait]
impl SttProvider for OpenAiStt {
    async fn transcribe(&self, wav: &[u8]) -> Result<Transcription> {
        let ep = &self.endpoint;
        let body = ep
            .retry
            .run("stt.transcribe", move || async move {
                let part = reqwest::multipart::Part::bytes(wav.to_vec())
                    .file_name("utterance.wav")
                    .mime_str("audio/wav")
                    .map_err(from_reqwest)?;
                let form = reqwest::multipart::Form::new()
                    .text("model", ep.model.clone())
                    .part("file", part);

                let resp = ep
                    .post("/audio/transcriptions")
                    .multipart(form)
                    .send()
                    .await
                    .map_err(from_reqwest)?;
                error_for_status(resp).await?.text().await.map_err(from_reqwest)
            })
            .await?;

        let parsed: Value = serde_json::from_str(&body)?;
        let text = parsed
            .get("text")
            .and_then(|t| t.as_str())
            .ok_or_else(|| Error::Stt("no `text` field in transcription response".into()))?
            .trim()
            .to_string();

        Ok(Transcription { text, is_final: true })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiLlm {
    endpoint: Endpoint,
}

impl OpenAiLlm {
    pub fn new(cfg: &ProviderEndpoint, client: reqwest::Client) -> Self {
        Self {
            endpoint: Endpoint::new(cfg, client, "gpt-4o-mini"),
        }
    }

    fn build_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_wire).collect();
        let mut body = json!({
            "model": req.model.clone().unwrap_or_else(|| self.endpoint.model.clone()),
            "messages": messages,
            "stream": stream,
        });
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = json!(temp);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = json!(max);
        }
        body
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiLlm {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let ep = &self.endpoint;
        let body = self.build_body(req, false);

        tracing::debug!(model = %body["model"], "llm chat request");

        let body = &body;
        let text = ep
            .retry
            .run("llm.chat", move || async move {
                let resp = ep
                    .post("/chat/completions")
                    .json(body)
                    .send()
                    .await
                    .map_err(from_reqwest)?;
                error_for_status(resp).await?.text().await.map_err(from_reqwest)
            })
            .await?;

        parse_chat_response(&serde_json::from_str(&text)?)
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<LlmStreamEvent>>> {
        let ep = &self.endpoint;
        let body = self.build_body(req, true);

        tracing::debug!(model = %body["model"], "llm stream request");

        let body = &body;
        let resp = ep
            .retry
            .run("llm.stream", move || async move {
                let resp = ep
                    .post("/chat/completions")
                    .json(body)
                    .send()
                    .await
                    .map_err(from_reqwest)?;
                error_for_status(resp).await
            })
            .await?;

        // The parser is stateful: argument deltas arrive keyed by index
        // while start events carry the real call id.
        let mut ids_by_index: HashMap<u64, String> = HashMap::new();
        Ok(decode_sse(resp, move |data| {
            parse_stream_data(data, &mut ids_by_index)
        }))
    }
}

// ── Wire serialization ─────────────────────────────────────────────

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn msg_to_wire(msg: &Message) -> Value {
    match msg.role {
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
            "content": msg.content,
        }),
        Role::Assistant if !msg.tool_calls.is_empty() => {
            let calls: Vec<Value> = msg
                .tool_calls
                .iter()
                .map(|tc| {
                    json!({
                        "id": tc.call_id,
                        "type": "function",
                        "function": {
                            "name": tc.tool_name,
                            "arguments": tc.arguments.to_string(),
                        }
                    })
                })
                .collect();
            let content = if msg.content.is_empty() {
                Value::Null
            } else {
                Value::String(msg.content.clone())
            };
            json!({ "role": "assistant", "content": content, "tool_calls": calls })
        }
        Role::User if !msg.attachments.is_empty() => {
            let mut parts = vec![json!({ "type": "text", "text": msg.content })];
            for att in &msg.attachments {
                parts.push(json!({
                    "type": "image_url",
                    "image_url": { "url": att.data },
                }));
            }
            json!({ "role": "user", "content": parts })
        }
        _ => json!({ "role": role_str(msg.role), "content": msg.content }),
    }
}

// ── Wire deserialization ───────────────────────────────────────────

fn parse_chat_response(body: &Value) -> Result<ChatResponse> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Llm("no choices in response".into()))?;

    let message = choice
        .get("message")
        .ok_or_else(|| Error::Llm("no message in choice".into()))?;

    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let stop_reason = choice
        .get("finish_reason")
        .and_then(|v| v.as_str())
        .map(String::from);

    Ok(ChatResponse {
        content,
        tool_calls: parse_tool_calls(message),
        stop_reason,
    })
}

fn parse_tool_calls(message: &Value) -> Vec<ToolCall> {
    let Some(arr) = message.get("tool_calls").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    arr.iter()
        .filter_map(|tc| {
            let call_id = tc.get("id")?.as_str()?.to_string();
            let func = tc.get("function")?;
            let tool_name = func.get("name")?.as_str()?.to_string();
            let args_str = func.get("arguments")?.as_str().unwrap_or("{}");
            let arguments =
                serde_json::from_str(args_str).unwrap_or(Value::Object(Default::default()));
            Some(ToolCall { call_id, tool_name, arguments })
        })
        .collect()
}

fn parse_stream_data(
    data: &str,
    ids_by_index: &mut HashMap<u64, String>,
) -> Vec<Result<LlmStreamEvent>> {
    if data.trim() == "[DONE]" {
        return vec![Ok(LlmStreamEvent::Done { stop_reason: Some("stop".into()) })];
    }

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    let Some(choice) = v
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
    else {
        return Vec::new();
    };

    if let Some(fr) = choice.get("finish_reason").and_then(|f| f.as_str()) {
        return vec![Ok(LlmStreamEvent::Done { stop_reason: Some(fr.to_string()) })];
    }

    let delta = choice.get("delta").unwrap_or(&Value::Null);
    let mut events = Vec::new();

    if let Some(tc_arr) = delta.get("tool_calls").and_then(|v| v.as_array()) {
        for tc in tc_arr {
            let index = tc.get("index").and_then(|v| v.as_u64()).unwrap_or(0);

            if let Some(id) = tc.get("id").and_then(|v| v.as_str()) {
                let name = tc
                    .get("function")
                    .and_then(|f| f.get("name"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                ids_by_index.insert(index, id.to_string());
                events.push(Ok(LlmStreamEvent::ToolCallStarted {
                    call_id: id.to_string(),
                    tool_name: name.to_string(),
                }));
                continue;
            }

            if let Some(args) = tc
                .get("function")
                .and_then(|f| f.get("arguments"))
                .and_then(|v| v.as_str())
            {
                let call_id = ids_by_index
                    .get(&index)
                    .cloned()
                    .unwrap_or_else(|| index.to_string());
                events.push(Ok(LlmStreamEvent::ToolCallDelta {
                    call_id,
                    delta: args.to_string(),
                }));
            }
        }
    }

    if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
        if !text.is_empty() {
            events.push(Ok(LlmStreamEvent::Token { text: text.to_string() }));
        }
    }

    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TTS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiTts {
    endpoint: Endpoint,
    voice: String,
}

impl OpenAiTts {
    pub fn new(cfg: &ProviderEndpoint, client: reqwest::Client) -> Self {
        Self {
            endpoint: Endpoint::new(cfg, client, "tts-1"),
            voice: cfg.voice.clone().unwrap_or_else(|| "alloy".into()),
        }
    }

    fn body(&self, text: &str) -> Value {
        json!({
            "model": self.endpoint.model,
            "input": text,
            "voice": self.voice,
            "response_format": "pcm",
        })
    }
}

#[async_trait::async_trait]
impl TtsProvider for OpenAiTts {
    async fn speak(&self, text: &str) -> Result<SpeechAudio> {
        let ep = &self.endpoint;
        let body = self.body(text);

        let body = &body;
        let audio = ep
            .retry
            .run("tts.speak", move || async move {
                let resp = ep
                    .post("/audio/speech")
                    .json(body)
                    .send()
                    .await
                    .map_err(from_reqwest)?;
                error_for_status(resp)
                    .await?
                    .bytes()
                    .await
                    .map_err(from_reqwest)
            })
            .await?;

        Ok(SpeechAudio {
            audio: audio.to_vec(),
            format: AudioFormat::Pcm16 { sample_rate: TTS_PCM_RATE },
        })
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn speak_stream(&self, text: &str) -> Result<BoxStream<'static, Result<Vec<u8>>>> {
        let ep = &self.endpoint;
        let resp = ep
            .post("/audio/speech")
            .json(&self.body(text))
            .send()
            .await
            .map_err(from_reqwest)?;
        let mut resp = error_for_status(resp).await?;

        let stream = async_stream::stream! {
            loop {
                match resp.chunk().await {
                    Ok(Some(bytes)) => yield Ok(bytes.to_vec()),
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(from_reqwest(e));
                        break;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }

    fn stream_format(&self) -> AudioFormat {
        AudioFormat::Pcm16 { sample_rate: TTS_PCM_RATE }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vx_domain::message::Attachment;

    #[test]
    fn tool_result_message_wire_shape() {
        let msg = Message::tool_result("get_weather", "call_1", "{\"temp\":22}");
        let wire = msg_to_wire(&msg);
        assert_eq!(wire["role"], "tool");
        assert_eq!(wire["tool_call_id"], "call_1");
    }

    #[test]
    fn assistant_tool_use_serializes_calls() {
        let msg = Message::assistant_tool_use(
            "",
            vec![ToolCall {
                call_id: "c1".into(),
                tool_name: "get_weather".into(),
                arguments: json!({"city": "Tokyo"}),
            }],
        );
        let wire = msg_to_wire(&msg);
        assert!(wire["content"].is_null());
        assert_eq!(wire["tool_calls"][0]["function"]["name"], "get_weather");
    }

    #[test]
    fn user_attachments_become_image_parts() {
        let msg = Message::user_with_attachments(
            "what is this?",
            vec![Attachment {
                data: "data:image/jpeg;base64,abcd".into(),
                mime_type: "image/jpeg".into(),
                alt: None,
                source: None,
            }],
        );
        let wire = msg_to_wire(&msg);
        let parts = wire["content"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1]["type"], "image_url");
    }

    #[test]
    fn stream_parser_maps_delta_indices_to_ids() {
        let mut ids = HashMap::new();

        let start = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_9","function":{"name":"get_weather"}}]}}]}"#;
        let events = parse_stream_data(start, &mut ids);
        assert!(matches!(
            &events[0],
            Ok(LlmStreamEvent::ToolCallStarted { call_id, .. }) if call_id == "call_9"
        ));

        let delta = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"city\""}}]}}]}"#;
        let events = parse_stream_data(delta, &mut ids);
        assert!(matches!(
            &events[0],
            Ok(LlmStreamEvent::ToolCallDelta { call_id, .. }) if call_id == "call_9"
        ));
    }

    #[test]
    fn stream_parser_handles_done_sentinel() {
        let mut ids = HashMap::new();
        let events = parse_stream_data("[DONE]", &mut ids);
        assert!(matches!(&events[0], Ok(LlmStreamEvent::Done { .. })));
    }

    #[test]
    fn chat_response_parses_content_and_calls() {
        let body = json!({
            "choices": [{
                "message": {
                    "content": "It's sunny.",
                    "tool_calls": [{
                        "id": "c1",
                        "function": {"name": "f", "arguments": "{\"a\":1}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });
        let resp = parse_chat_response(&body).unwrap();
        assert_eq!(resp.content, "It's sunny.");
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.stop_reason.as_deref(), Some("tool_calls"));
    }
}
