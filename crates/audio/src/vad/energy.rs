//! Energy-based VAD: maps window RMS to a pseudo-probability.
//!
//! A window at the reference RMS scores 0.5 (the segmenter's default enter
//! threshold); twice the reference saturates at 1.0. Crude next to a neural
//! model, but dependency-free and good enough for tests and quiet rooms.

use vx_domain::Result;

use super::VoiceActivityDetector;

#[derive(Debug, Clone)]
pub struct EnergyVad {
    /// RMS level that maps to a score of 0.5. Typical quiet-microphone
    /// values sit around 0.01–0.05.
    reference_rms: f32,
}

impl EnergyVad {
    pub fn new(reference_rms: f32) -> Self {
        Self { reference_rms }
    }

    fn rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
        (sum_sq / samples.len() as f32).sqrt()
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new(0.02)
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn score(&mut self, window: &[f32]) -> Result<f32> {
        let rms = Self::rms(window);
        Ok((rms / (2.0 * self.reference_rms)).clamp(0.0, 1.0))
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_scores_zero() {
        let mut vad = EnergyVad::default();
        assert_eq!(vad.score(&vec![0.0; 512]).unwrap(), 0.0);
    }

    #[test]
    fn reference_rms_scores_half() {
        let mut vad = EnergyVad::new(0.02);
        // ±0.02 square wave has RMS exactly 0.02.
        let window: Vec<f32> = (0..512)
            .map(|i| if i % 2 == 0 { 0.02 } else { -0.02 })
            .collect();
        let p = vad.score(&window).unwrap();
        assert!((p - 0.5).abs() < 1e-4, "p={p}");
    }

    #[test]
    fn loud_audio_saturates() {
        let mut vad = EnergyVad::new(0.02);
        assert_eq!(vad.score(&vec![0.5; 512]).unwrap(), 1.0);
    }

    #[test]
    fn empty_window_is_silence() {
        let mut vad = EnergyVad::default();
        assert_eq!(vad.score(&[]).unwrap(), 0.0);
    }
}
