//! Sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! Browsers negotiate media at 48 kHz; the VAD and STT run at 16 kHz.
//! `PcmResampler` bridges that gap on the connection task. When the rates
//! already match it is a passthrough and no rubato session is created.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use vx_domain::{Error, Result};

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct PcmResampler {
    /// `None` when input rate == output rate (passthrough mode).
    inner: Option<FastFixedIn<f32>>,
    /// Holds partial input blocks between calls.
    input_buf: Vec<f32>,
    /// Input samples rubato consumes per process call.
    block: usize,
    /// Pre-allocated `[1][output_frames_max]` output buffer.
    output_buf: Vec<Vec<f32>>,
}

impl PcmResampler {
    /// `block` is the input frame count handed to rubato per call; inputs
    /// of any size are accepted and accumulated internally.
    pub fn new(input_rate: u32, output_rate: u32, block: usize) -> Result<Self> {
        if input_rate == output_rate {
            return Ok(Self {
                inner: None,
                input_buf: Vec::new(),
                block,
                output_buf: Vec::new(),
            });
        }

        let ratio = output_rate as f64 / input_rate as f64;
        let inner = FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, block, 1)
            .map_err(|e| Error::Audio(format!("resampler init: {e}")))?;

        let max_out = inner.output_frames_max();
        let output_buf = vec![vec![0f32; max_out]; 1];

        tracing::debug!(input_rate, output_rate, block, "resampling enabled");

        Ok(Self {
            inner: Some(inner),
            input_buf: Vec::new(),
            block,
            output_buf,
        })
    }

    /// Feed samples, returning whatever resampled output is ready (possibly
    /// empty while rubato's input block fills up).
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let Some(ref mut inner) = self.inner else {
            return Ok(samples.to_vec());
        };

        self.input_buf.extend_from_slice(samples);

        let mut out = Vec::new();
        while self.input_buf.len() >= self.block {
            let input = &self.input_buf[..self.block];
            let (_, produced) = inner
                .process_into_buffer(&[input], &mut self.output_buf, None)
                .map_err(|e| Error::Audio(format!("resampler: {e}")))?;
            out.extend_from_slice(&self.output_buf[0][..produced]);
            self.input_buf.drain(..self.block);
        }
        Ok(out)
    }

    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }
}
