//! Scripted in-memory providers for pipeline tests.
//!
//! Each provider plays back a fixed script, so orchestrator tests can
//! assert exact event sequences without any network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;

use vx_domain::message::ToolCall;
use vx_domain::stream::{BoxStream, LlmStreamEvent};
use vx_domain::{Error, Result};

use crate::traits::{
    AudioFormat, ChatRequest, ChatResponse, LlmProvider, SpeechAudio, SttProvider, Transcription,
    TtsProvider,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STT
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ScriptedStt {
    text: String,
    fail: bool,
    pub calls: AtomicUsize,
}

impl ScriptedStt {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            text: String::new(),
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl SttProvider for ScriptedStt {
    async fn transcribe(&self, _wav: &[u8]) -> Result<Transcription> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::Stt("scripted failure".into()));
        }
        Ok(Transcription {
            text: self.text.clone(),
            is_final: true,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One scripted model response: text chunks plus any tool calls.
#[derive(Debug, Clone, Default)]
pub struct ScriptedReply {
    pub chunks: Vec<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            chunks: vec![text.into()],
            tool_calls: Vec::new(),
        }
    }

    pub fn chunks<I: IntoIterator<Item = S>, S: Into<String>>(chunks: I) -> Self {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_call(name: impl Into<String>, call_id: impl Into<String>, args: Value) -> Self {
        Self {
            chunks: Vec::new(),
            tool_calls: vec![ToolCall {
                call_id: call_id.into(),
                tool_name: name.into(),
                arguments: args,
            }],
        }
    }

    pub fn with_tool_call(
        mut self,
        name: impl Into<String>,
        call_id: impl Into<String>,
        args: Value,
    ) -> Self {
        self.tool_calls.push(ToolCall {
            call_id: call_id.into(),
            tool_name: name.into(),
            arguments: args,
        });
        self
    }
}

/// Plays back replies in order; errs when the script runs out.
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<ScriptedReply>>,
    /// When true the stream never terminates after its chunks — for
    /// cancellation tests.
    hang_after_chunks: bool,
    /// Requests observed, for asserting what history the model saw.
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedLlm {
    pub fn new<I: IntoIterator<Item = ScriptedReply>>(replies: I) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            hang_after_chunks: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A stream that emits its chunks and then blocks forever.
    pub fn hanging<I: IntoIterator<Item = ScriptedReply>>(replies: I) -> Self {
        Self {
            hang_after_chunks: true,
            ..Self::new(replies)
        }
    }

    fn next_reply(&self) -> Result<ScriptedReply> {
        self.replies
            .lock()
            .pop_front()
            .ok_or_else(|| Error::Llm("script exhausted".into()))
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedLlm {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        self.requests.lock().push(req.clone());
        let reply = self.next_reply()?;
        Ok(ChatResponse {
            content: reply.chunks.concat(),
            tool_calls: reply.tool_calls,
            stop_reason: Some("stop".into()),
        })
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<LlmStreamEvent>>> {
        self.requests.lock().push(req.clone());
        let reply = self.next_reply()?;
        let hang = self.hang_after_chunks;

        let stream = async_stream::stream! {
            for chunk in reply.chunks {
                yield Ok(LlmStreamEvent::Token { text: chunk });
            }
            for tc in reply.tool_calls {
                yield Ok(LlmStreamEvent::ToolCallFinished(tc));
            }
            if hang {
                std::future::pending::<()>().await;
            }
            yield Ok(LlmStreamEvent::Done { stop_reason: Some("stop".into()) });
        };
        Ok(Box::pin(stream))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TTS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub const SCRIPTED_TTS_RATE: u32 = 16_000;

/// Deterministic synthesizer: audio length is a function of text length,
/// streamed in two chunks. Failure knobs model the fallback paths.
pub struct ScriptedTts {
    streaming: bool,
    /// Sentences containing this substring fail mid-stream.
    fail_stream_containing: Option<String>,
    fail_oneshot: bool,
    /// Delay between streamed chunks, so tests can land a barge-in
    /// mid-playback.
    chunk_delay: Duration,
    pub stream_calls: AtomicUsize,
    pub oneshot_calls: AtomicUsize,
}

impl Default for ScriptedTts {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTts {
    pub fn new() -> Self {
        Self {
            streaming: true,
            fail_stream_containing: None,
            fail_oneshot: false,
            chunk_delay: Duration::ZERO,
            stream_calls: AtomicUsize::new(0),
            oneshot_calls: AtomicUsize::new(0),
        }
    }

    pub fn oneshot_only() -> Self {
        Self {
            streaming: false,
            ..Self::new()
        }
    }

    pub fn fail_stream_containing(mut self, needle: impl Into<String>) -> Self {
        self.fail_stream_containing = Some(needle.into());
        self
    }

    pub fn fail_oneshot(mut self) -> Self {
        self.fail_oneshot = true;
        self
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// The PCM a given sentence synthesizes to (test oracle).
    pub fn pcm_for(text: &str) -> Vec<u8> {
        vec![0x55u8; text.len().max(1) * 4]
    }
}

#[async_trait::async_trait]
impl TtsProvider for ScriptedTts {
    async fn speak(&self, text: &str) -> Result<SpeechAudio> {
        self.oneshot_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_oneshot {
            return Err(Error::Tts("scripted one-shot failure".into()));
        }
        Ok(SpeechAudio {
            audio: Self::pcm_for(text),
            format: AudioFormat::Pcm16 { sample_rate: SCRIPTED_TTS_RATE },
        })
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    async fn speak_stream(&self, text: &str) -> Result<BoxStream<'static, Result<Vec<u8>>>> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        if !self.streaming {
            return Err(Error::Tts("streaming synthesis not supported".into()));
        }

        let fail = self
            .fail_stream_containing
            .as_deref()
            .is_some_and(|needle| text.contains(needle));
        let pcm = Self::pcm_for(text);
        let half = pcm.len() / 2;
        let delay = self.chunk_delay;

        let stream = async_stream::stream! {
            yield Ok(pcm[..half].to_vec());
            if fail {
                yield Err(Error::Tts("scripted stream failure".into()));
                return;
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            yield Ok(pcm[half..].to_vec());
        };
        Ok(Box::pin(stream))
    }

    fn stream_format(&self) -> AudioFormat {
        AudioFormat::Pcm16 { sample_rate: SCRIPTED_TTS_RATE }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn scripted_llm_plays_replies_in_order() {
        let llm = ScriptedLlm::new([ScriptedReply::text("one"), ScriptedReply::text("two")]);
        let req = ChatRequest::default();
        assert_eq!(llm.chat(&req).await.unwrap().content, "one");
        assert_eq!(llm.chat(&req).await.unwrap().content, "two");
        assert!(llm.chat(&req).await.is_err());
    }

    #[tokio::test]
    async fn scripted_stream_ends_with_done() {
        let llm = ScriptedLlm::new([ScriptedReply::chunks(["a", "b"])]);
        let mut stream = llm.chat_stream(&ChatRequest::default()).await.unwrap();

        let mut tokens = Vec::new();
        while let Some(ev) = stream.next().await {
            match ev.unwrap() {
                LlmStreamEvent::Token { text } => tokens.push(text),
                LlmStreamEvent::Done { .. } => break,
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(tokens, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn failing_stream_errors_midway() {
        let tts = ScriptedTts::new().fail_stream_containing("sentence 2");
        let mut stream = tts.speak_stream("this is sentence 2.").await.unwrap();
        assert!(stream.next().await.unwrap().is_ok());
        assert!(stream.next().await.unwrap().is_err());
    }
}
