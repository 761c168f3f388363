//! Voice activity detection backends.
//!
//! The `VoiceActivityDetector` trait is the extensibility point: the
//! segmenter scores fixed 512-sample windows and applies hysteresis on top,
//! so backends only need to produce a per-window speech probability.

pub mod energy;

#[cfg(feature = "onnx")]
pub mod silero;

use vx_domain::config::{VadBackendKind, VadConfig};
use vx_domain::{Error, Result};

pub use energy::EnergyVad;
#[cfg(feature = "onnx")]
pub use silero::SileroVad;

/// Window size scored by every backend: 512 samples at 16 kHz = 32 ms.
pub const VAD_WINDOW: usize = 512;

/// Trait for all VAD implementations.
///
/// Implementors may be stateful (RNN hidden state, smoothing); `reset` is
/// called at every utterance boundary.
pub trait VoiceActivityDetector: Send + Sync {
    /// Score one [`VAD_WINDOW`]-sample window of 16 kHz mono f32 audio,
    /// returning a speech probability in `[0, 1]`.
    fn score(&mut self, window: &[f32]) -> Result<f32>;

    /// Clear internal state.
    fn reset(&mut self);
}

/// Build the detector selected by config. Fails when the silero backend is
/// requested but the model cannot be loaded (or the `onnx` feature is off).
pub fn create_detector(cfg: &VadConfig) -> Result<Box<dyn VoiceActivityDetector>> {
    match cfg.backend {
        VadBackendKind::Energy => Ok(Box::new(EnergyVad::default())),
        VadBackendKind::Silero => {
            #[cfg(feature = "onnx")]
            {
                let path = cfg
                    .model_path
                    .as_ref()
                    .ok_or_else(|| Error::VadInit("silero backend needs vad.model_path".into()))?;
                Ok(Box::new(SileroVad::load(path)?))
            }
            #[cfg(not(feature = "onnx"))]
            {
                Err(Error::VadInit(
                    "silero backend requires building with the `onnx` feature".into(),
                ))
            }
        }
    }
}
