//! Hysteresis speech segmenter.
//!
//! Consumes PCM at the negotiated rate, resamples to 16 kHz, scores
//! 512-sample windows through the configured VAD, and emits
//! `SpeechStart` / `SpeechEnd` events. A pre-roll ring buffer recovers the
//! syllables spoken before the detector fired.
//!
//! State machine:
//!
//! ```text
//! IDLE ── p>enter for ≥ min_speech_ms ──▶ SPEAKING
//! SPEAKING ── p<exit for ≥ min_silence_ms, or max_utterance_ms ──▶ IDLE
//! ```

use std::collections::VecDeque;

use vx_domain::config::VadConfig;
use vx_domain::Result;

use crate::resample::PcmResampler;
use crate::vad::{create_detector, VoiceActivityDetector, VAD_WINDOW};
use crate::wav;

/// Rate the VAD and STT consume; the delivered utterance is at this rate.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Audio time covered by one scored window.
const WINDOW_MS: u32 = (VAD_WINDOW as u32 * 1000) / TARGET_SAMPLE_RATE;

/// Input block handed to the resampler per call (10 ms at 48 kHz).
const RESAMPLE_BLOCK: usize = 480;

#[derive(Debug, Clone)]
pub enum SegmenterEvent {
    SpeechStart,
    /// A complete utterance: 16 kHz mono PCM wrapped in a RIFF header.
    SpeechEnd { wav: Vec<u8>, duration_ms: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Speaking,
}

pub struct SpeechSegmenter {
    vad: Box<dyn VoiceActivityDetector>,
    resampler: PcmResampler,
    cfg: VadConfig,
    state: State,
    /// 16 kHz samples awaiting a full scoring window.
    window_buf: Vec<f32>,
    /// Last `pre_roll_ms` of audio while idle.
    pre_roll: VecDeque<i16>,
    /// The active speech window, pre-roll included.
    accum: Vec<i16>,
    /// Samples of the accumulator that came from pre-roll.
    pre_roll_len: usize,
    speech_run_ms: u32,
    silence_run_ms: u32,
}

impl SpeechSegmenter {
    /// Build a segmenter for one connection. Fails when the configured VAD
    /// backend cannot initialize — fatal for that connection only.
    pub fn new(cfg: &VadConfig) -> Result<Self> {
        let vad = create_detector(cfg)?;
        let resampler = PcmResampler::new(cfg.input_sample_rate, TARGET_SAMPLE_RATE, RESAMPLE_BLOCK)?;
        Ok(Self {
            vad,
            resampler,
            cfg: cfg.clone(),
            state: State::Idle,
            window_buf: Vec::with_capacity(VAD_WINDOW * 2),
            pre_roll: VecDeque::new(),
            accum: Vec::new(),
            pre_roll_len: 0,
            speech_run_ms: 0,
            silence_run_ms: 0,
        })
    }

    /// Feed a frame of signed-16-bit PCM at the configured input rate.
    /// Returns any boundary events crossed while consuming it.
    pub fn push(&mut self, pcm: &[i16]) -> Result<Vec<SegmenterEvent>> {
        let as_f32: Vec<f32> = pcm.iter().map(|&s| s as f32 / 32_768.0).collect();
        let resampled = self.resampler.process(&as_f32)?;
        self.window_buf.extend_from_slice(&resampled);

        let mut events = Vec::new();
        while self.window_buf.len() >= VAD_WINDOW {
            let window: Vec<f32> = self.window_buf.drain(..VAD_WINDOW).collect();
            let p = self.vad.score(&window)?;
            let samples: Vec<i16> = window
                .iter()
                .map(|&s| (s * 32_768.0).clamp(-32_768.0, 32_767.0) as i16)
                .collect();
            self.step(p, &samples, &mut events)?;
        }
        Ok(events)
    }

    fn step(&mut self, p: f32, samples: &[i16], events: &mut Vec<SegmenterEvent>) -> Result<()> {
        match self.state {
            State::Idle => {
                self.push_pre_roll(samples);
                if p > self.cfg.enter_threshold {
                    self.speech_run_ms += WINDOW_MS;
                } else {
                    self.speech_run_ms = 0;
                }
                if self.speech_run_ms >= self.cfg.min_speech_ms {
                    // The onset run is inside the pre-roll ring, so draining
                    // it captures both the pre-roll and the detected speech.
                    self.accum = self.pre_roll.drain(..).collect();
                    self.pre_roll_len = self.accum.len().saturating_sub(
                        (self.speech_run_ms * TARGET_SAMPLE_RATE / 1000) as usize,
                    );
                    self.state = State::Speaking;
                    self.speech_run_ms = 0;
                    self.silence_run_ms = 0;
                    events.push(SegmenterEvent::SpeechStart);
                }
            }
            State::Speaking => {
                self.accum.extend_from_slice(samples);
                if p < self.cfg.exit_threshold {
                    self.silence_run_ms += WINDOW_MS;
                } else {
                    self.silence_run_ms = 0;
                }

                let duration_ms =
                    (self.accum.len() as u64 * 1000 / TARGET_SAMPLE_RATE as u64) as u32;
                if self.silence_run_ms >= self.cfg.min_silence_ms
                    || duration_ms >= self.cfg.max_utterance_ms
                {
                    if let Some(ev) = self.finalize(duration_ms)? {
                        events.push(ev);
                    }
                }
            }
        }
        Ok(())
    }

    /// Close the active utterance. Returns `None` when the utterance is too
    /// short to form a turn.
    fn finalize(&mut self, duration_ms: u32) -> Result<Option<SegmenterEvent>> {
        let speech_samples = self.accum.len() - self.pre_roll_len;
        let min_samples = (self.cfg.min_utterance_ms * TARGET_SAMPLE_RATE / 1000) as usize;

        let event = if speech_samples >= min_samples {
            let wav = wav::wrap_pcm16(&self.accum, TARGET_SAMPLE_RATE)?;
            Some(SegmenterEvent::SpeechEnd { wav, duration_ms })
        } else {
            tracing::debug!(speech_samples, "utterance below minimum, dropped");
            None
        };

        self.accum = Vec::new();
        self.pre_roll_len = 0;
        self.pre_roll.clear();
        self.speech_run_ms = 0;
        self.silence_run_ms = 0;
        self.state = State::Idle;
        self.vad.reset();
        Ok(event)
    }

    fn push_pre_roll(&mut self, samples: &[i16]) {
        let cap = (self.cfg.pre_roll_ms * TARGET_SAMPLE_RATE / 1000) as usize;
        self.pre_roll.extend(samples.iter().copied());
        while self.pre_roll.len() > cap {
            self.pre_roll.pop_front();
        }
    }
}
