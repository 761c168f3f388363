//! Audio ingress for voxgate: sample-rate conversion, voice activity
//! detection, and the hysteresis segmenter that turns a PCM stream into
//! discrete utterances.

pub mod resample;
pub mod segmenter;
pub mod vad;
pub mod wav;

pub use segmenter::{SegmenterEvent, SpeechSegmenter, TARGET_SAMPLE_RATE};
pub use vad::{create_detector, VoiceActivityDetector, VAD_WINDOW};
