//! The TTS side of the pipeline: the sentence feeder, the synthesis
//! worker, and the gate that holds synthesized audio back until the LLM
//! text is fully emitted.
//!
//! Synthesis overlaps the LLM stream, but the event contract requires all
//! LLM chunks before `tts-start`. The [`TtsGate`] squares that: while the
//! LLM phase runs, every pipeline await also drains the worker's output
//! into a buffer, so the worker never wedges on a full channel; afterwards
//! the buffered audio is emitted in order, followed by whatever is still
//! being synthesized.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use vx_domain::{Error, ErrorCode, Result};
use vx_providers::{AudioFormat, SpeechAudio, TtsProvider};
use vx_sessions::TurnToken;

use super::chunker::SentenceChunker;
use super::{RaceOutcome, TurnAbort};

use futures_util::StreamExt;

/// Deadline used for awaits that have no timeout of their own; the turn
/// token is the real bound.
const FAR_FUTURE: Duration = Duration::from_secs(3600);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker events + gate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug)]
pub(crate) enum TtsWorkerEvent {
    Chunk { pcm: Vec<u8>, sample_rate: u32 },
    /// Both the streaming call and the one-shot fallback failed; the
    /// sentence is skipped.
    SentenceFailed { code: ErrorCode, message: String },
}

pub(crate) struct TtsGate {
    rx: mpsc::Receiver<TtsWorkerEvent>,
    buffered: VecDeque<TtsWorkerEvent>,
    closed: bool,
}

impl TtsGate {
    pub(crate) fn new(rx: mpsc::Receiver<TtsWorkerEvent>) -> Self {
        Self {
            rx,
            buffered: VecDeque::new(),
            closed: false,
        }
    }

    /// Drive `fut` while absorbing worker output into the buffer.
    pub(crate) async fn run_while<F: Future>(&mut self, fut: F) -> F::Output {
        tokio::pin!(fut);
        loop {
            if self.closed {
                return fut.await;
            }
            tokio::select! {
                out = &mut fut => return out,
                ev = self.rx.recv() => match ev {
                    Some(e) => self.buffered.push_back(e),
                    None => self.closed = true,
                },
            }
        }
    }

    /// Race a pipeline await against the turn token and a deadline, with
    /// the gate absorbing worker output the whole time.
    pub(crate) async fn race<F: Future>(
        &mut self,
        token: &TurnToken,
        deadline: Instant,
        fut: F,
    ) -> RaceOutcome<F::Output> {
        self.run_while(async {
            tokio::select! {
                biased;
                _ = token.cancelled() => RaceOutcome::Cancelled,
                res = tokio::time::timeout_at(deadline, fut) => match res {
                    Ok(out) => RaceOutcome::Done(out),
                    Err(_) => RaceOutcome::TimedOut,
                },
            }
        })
        .await
    }

    /// Next worker event once the LLM phase is over: buffered audio
    /// first, then the live channel.
    pub(crate) async fn next(&mut self) -> Option<TtsWorkerEvent> {
        if let Some(ev) = self.buffered.pop_front() {
            return Some(ev);
        }
        if self.closed {
            return None;
        }
        match self.rx.recv().await {
            Some(ev) => Some(ev),
            None => {
                self.closed = true;
                None
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sentence feeder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Splits streamed LLM text into sentences and hands them to the worker.
pub(crate) struct SpeechFeeder {
    chunker: SentenceChunker,
    tx: mpsc::Sender<String>,
}

impl SpeechFeeder {
    pub(crate) fn new(tx: mpsc::Sender<String>) -> Self {
        Self {
            chunker: SentenceChunker::new(),
            tx,
        }
    }

    pub(crate) async fn feed(
        &mut self,
        gate: &mut TtsGate,
        token: &TurnToken,
        delta: &str,
    ) -> std::result::Result<(), TurnAbort> {
        for sentence in self.chunker.push(delta) {
            send_sentence(&self.tx, gate, token, sentence).await?;
        }
        Ok(())
    }

    /// Flush the non-terminated tail and close the sentence channel.
    pub(crate) async fn finish(
        mut self,
        gate: &mut TtsGate,
        token: &TurnToken,
    ) -> std::result::Result<(), TurnAbort> {
        if let Some(tail) = self.chunker.flush() {
            send_sentence(&self.tx, gate, token, tail).await?;
        }
        Ok(())
    }
}

async fn send_sentence(
    tx: &mpsc::Sender<String>,
    gate: &mut TtsGate,
    token: &TurnToken,
    sentence: String,
) -> std::result::Result<(), TurnAbort> {
    let deadline = Instant::now() + FAR_FUTURE;
    match gate.race(token, deadline, tx.send(sentence)).await {
        RaceOutcome::Cancelled => Err(TurnAbort::Cancelled),
        // The worker exiting early just means nothing left to speak to.
        RaceOutcome::Done(_) => Ok(()),
        RaceOutcome::TimedOut => Ok(()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Spawn the synthesis worker. It consumes sentences until the channel
/// closes or the token cancels, emitting PCM chunks in sentence order.
pub(crate) fn spawn_tts_worker(
    tts: Arc<dyn TtsProvider>,
    token: TurnToken,
    sentence_timeout: Duration,
    sentence_rx: mpsc::Receiver<String>,
) -> mpsc::Receiver<TtsWorkerEvent> {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(worker_loop(tts, token, sentence_timeout, sentence_rx, tx));
    rx
}

async fn worker_loop(
    tts: Arc<dyn TtsProvider>,
    token: TurnToken,
    sentence_timeout: Duration,
    mut sentence_rx: mpsc::Receiver<String>,
    tx: mpsc::Sender<TtsWorkerEvent>,
) {
    loop {
        let sentence = match token.guard(sentence_rx.recv()).await {
            None | Some(None) => break,
            Some(Some(sentence)) => sentence,
        };
        if !synth_sentence(&*tts, &token, sentence_timeout, &sentence, &tx).await {
            break;
        }
    }
}

/// Synthesize one sentence. Returns false when the turn is over
/// (cancelled, or the consumer is gone).
async fn synth_sentence(
    tts: &dyn TtsProvider,
    token: &TurnToken,
    sentence_timeout: Duration,
    sentence: &str,
    tx: &mpsc::Sender<TtsWorkerEvent>,
) -> bool {
    if tts.supports_streaming() {
        match stream_sentence(tts, token, sentence_timeout, sentence).await {
            StreamResult::Complete(chunks) => {
                let sample_rate = stream_rate(tts);
                for pcm in chunks {
                    if !send(token, tx, TtsWorkerEvent::Chunk { pcm, sample_rate }).await {
                        return false;
                    }
                }
                return true;
            }
            StreamResult::Cancelled => return false,
            StreamResult::Failed(e) => {
                tracing::debug!(error = %e, "streaming synthesis failed, falling back");
            }
        }
    }

    // One-shot path: the only path for non-streaming providers, the
    // fallback for a failed stream.
    match token.guard(tokio::time::timeout(sentence_timeout, tts.speak(sentence))).await {
        None => false,
        Some(Err(_)) => {
            send(
                token,
                tx,
                TtsWorkerEvent::SentenceFailed {
                    code: ErrorCode::TtsTimeout,
                    message: format!("synthesis timed out after {sentence_timeout:?}"),
                },
            )
            .await
        }
        Some(Ok(Err(e))) => {
            send(
                token,
                tx,
                TtsWorkerEvent::SentenceFailed {
                    code: ErrorCode::TtsError,
                    message: e.to_string(),
                },
            )
            .await
        }
        Some(Ok(Ok(audio))) => match into_pcm(audio) {
            Ok((pcm, sample_rate)) => {
                send(token, tx, TtsWorkerEvent::Chunk { pcm, sample_rate }).await
            }
            Err(e) => {
                send(
                    token,
                    tx,
                    TtsWorkerEvent::SentenceFailed {
                        code: ErrorCode::TtsError,
                        message: e.to_string(),
                    },
                )
                .await
            }
        },
    }
}

enum StreamResult {
    Complete(Vec<Vec<u8>>),
    Failed(Error),
    Cancelled,
}

/// Run the streaming call for one sentence, buffering its chunks so a
/// mid-stream failure can fall back to a single clean one-shot block.
async fn stream_sentence(
    tts: &dyn TtsProvider,
    token: &TurnToken,
    sentence_timeout: Duration,
    sentence: &str,
) -> StreamResult {
    let deadline = Instant::now() + sentence_timeout;

    let stream = match token
        .guard(tokio::time::timeout_at(deadline, tts.speak_stream(sentence)))
        .await
    {
        None => return StreamResult::Cancelled,
        Some(Err(_)) => return StreamResult::Failed(Error::Timeout("tts stream".into())),
        Some(Ok(Err(e))) => return StreamResult::Failed(e),
        Some(Ok(Ok(stream))) => stream,
    };
    let mut stream = stream;

    let mut chunks = Vec::new();
    loop {
        match token
            .guard(tokio::time::timeout_at(deadline, stream.next()))
            .await
        {
            None => return StreamResult::Cancelled,
            Some(Err(_)) => return StreamResult::Failed(Error::Timeout("tts stream".into())),
            Some(Ok(None)) => break,
            Some(Ok(Some(Err(e)))) => return StreamResult::Failed(e),
            Some(Ok(Some(Ok(chunk)))) => chunks.push(chunk),
        }
    }
    StreamResult::Complete(chunks)
}

fn stream_rate(tts: &dyn TtsProvider) -> u32 {
    match tts.stream_format() {
        AudioFormat::Pcm16 { sample_rate } => sample_rate,
        // Encoded stream formats would need a decoder here; contract-wise
        // the adapters request PCM.
        _ => 16_000,
    }
}

fn into_pcm(audio: SpeechAudio) -> Result<(Vec<u8>, u32)> {
    match audio.format {
        AudioFormat::Pcm16 { sample_rate } => Ok((audio.audio, sample_rate)),
        AudioFormat::Wav => vx_audio::wav::parse_pcm16(&audio.audio),
        other => Err(Error::Tts(format!(
            "cannot decode `{}` output without a codec",
            other.as_str()
        ))),
    }
}

async fn send(token: &TurnToken, tx: &mpsc::Sender<TtsWorkerEvent>, ev: TtsWorkerEvent) -> bool {
    matches!(token.guard(tx.send(ev)).await, Some(Ok(())))
}
