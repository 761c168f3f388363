//! Silero VAD neural backend (ONNX).
//!
//! Runs the Silero VAD model from <https://github.com/snakers4/silero-vad>
//! one 512-sample window at a time. Exports of the model disagree on
//! tensor names and on the recurrent interface (v3/v4 keep separate LSTM
//! `h`/`c` tensors, v5 a single GRU `state` tensor), so the session's
//! declared inputs and outputs decide which wiring to use.

use std::path::Path;

use ndarray::{Array1, Array2, Array3};
use ort::session::builder::SessionBuilder;
use ort::session::SessionInputValue;
use ort::value::Value;

use vx_domain::{Error, Result};

use super::{VoiceActivityDetector, VAD_WINDOW};

/// Hidden units per layer in the v3/v4 LSTM export.
const LSTM_UNITS: usize = 64;
/// Hidden units per layer in the v5 GRU export.
const GRU_UNITS: usize = 128;

/// The recurrent interface of a particular model export, carrying its
/// tensor names and the state passed between windows.
enum Recurrent {
    Lstm {
        h_in: String,
        c_in: String,
        h_out: String,
        c_out: String,
        h: Vec<f32>,
        c: Vec<f32>,
    },
    Gru {
        state_in: String,
        state_out: String,
        state: Vec<f32>,
    },
    /// No recognizable recurrent tensors; each window scores on its own.
    Stateless,
}

impl Recurrent {
    fn detect(inputs: &[String], outputs: &[String]) -> Self {
        if let (Some(h_in), Some(c_in), Some(h_out), Some(c_out)) = (
            pick(inputs, &["h", "state_h"]),
            pick(inputs, &["c", "state_c"]),
            pick(outputs, &["hn", "state_hn"]),
            pick(outputs, &["cn", "state_cn"]),
        ) {
            return Recurrent::Lstm {
                h_in,
                c_in,
                h_out,
                c_out,
                h: vec![0.0; 2 * LSTM_UNITS],
                c: vec![0.0; 2 * LSTM_UNITS],
            };
        }

        if let (Some(state_in), Some(state_out)) = (
            pick(inputs, &["state", "h_0", "hidden"]),
            pick(outputs, &["stateN", "state_out", "hn_out"]),
        ) {
            return Recurrent::Gru {
                state_in,
                state_out,
                state: vec![0.0; 2 * GRU_UNITS],
            };
        }

        Recurrent::Stateless
    }

    fn reset(&mut self) {
        match self {
            Recurrent::Lstm { h, c, .. } => {
                h.fill(0.0);
                c.fill(0.0);
            }
            Recurrent::Gru { state, .. } => state.fill(0.0),
            Recurrent::Stateless => {}
        }
    }

    fn variant(&self) -> &'static str {
        match self {
            Recurrent::Lstm { .. } => "lstm",
            Recurrent::Gru { .. } => "gru",
            Recurrent::Stateless => "stateless",
        }
    }
}

pub struct SileroVad {
    session: ort::session::Session,
    audio_input: String,
    rate_input: Option<String>,
    prob_output: String,
    recurrent: Recurrent,
}

impl SileroVad {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::VadInit(format!("model not found: {}", path.display())));
        }

        let session = SessionBuilder::new()
            .map_err(init_err)?
            .commit_from_file(path)
            .map_err(init_err)?;

        let inputs: Vec<String> = session.inputs().iter().map(|o| o.name().to_string()).collect();
        let outputs: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();

        let audio_input = pick(&inputs, &["input", "audio", "x"])
            .or_else(|| inputs.first().cloned())
            .ok_or_else(|| Error::VadInit("silero model declares no inputs".into()))?;
        let rate_input = pick(&inputs, &["sr", "sample_rate"]);
        let prob_output = pick(&outputs, &["output", "speech_prob", "prob"])
            .or_else(|| outputs.first().cloned())
            .ok_or_else(|| Error::VadInit("silero model declares no outputs".into()))?;

        let recurrent = Recurrent::detect(&inputs, &outputs);
        tracing::info!(
            path = %path.display(),
            variant = recurrent.variant(),
            "silero vad ready"
        );

        Ok(Self {
            session,
            audio_input,
            rate_input,
            prob_output,
            recurrent,
        })
    }

    fn score_window(&mut self, window: &[f32]) -> Result<f32> {
        let mut feeds: Vec<(String, SessionInputValue<'static>)> = Vec::with_capacity(4);
        feeds.push((self.audio_input.clone(), audio_tensor(window)?));
        if let Some(rate_input) = &self.rate_input {
            feeds.push((rate_input.clone(), rate_tensor()?));
        }
        match &self.recurrent {
            Recurrent::Lstm { h_in, c_in, h, c, .. } => {
                feeds.push((h_in.clone(), state_tensor(h)?));
                feeds.push((c_in.clone(), state_tensor(c)?));
            }
            Recurrent::Gru { state_in, state, .. } => {
                feeds.push((state_in.clone(), state_tensor(state)?));
            }
            Recurrent::Stateless => {}
        }

        let results = self.session.run(feeds).map_err(run_err)?;

        let prob = {
            let value = results.get(self.prob_output.as_str()).unwrap_or(&results[0]);
            let (_, data) = value.try_extract_tensor::<f32>().map_err(run_err)?;
            data.first().copied().unwrap_or(0.0)
        };

        // Carry the recurrent state into the next window.
        let fetch = |name: &str, dst: &mut Vec<f32>| -> Result<bool> {
            match results.get(name) {
                Some(value) => {
                    let (_, data) = value.try_extract_tensor::<f32>().map_err(run_err)?;
                    *dst = data.to_vec();
                    Ok(true)
                }
                None => Ok(false),
            }
        };
        let carried = match &mut self.recurrent {
            Recurrent::Stateless => true,
            Recurrent::Lstm { h_out, c_out, h, c, .. } => {
                fetch(h_out, h)? && fetch(c_out, c)?
            }
            Recurrent::Gru { state_out, state, .. } => fetch(state_out, state)?,
        };
        if !carried {
            tracing::warn!("recurrent outputs missing from model, continuing stateless");
            self.recurrent = Recurrent::Stateless;
        }

        Ok(prob.clamp(0.0, 1.0))
    }
}

impl VoiceActivityDetector for SileroVad {
    fn score(&mut self, window: &[f32]) -> Result<f32> {
        if window.len() != VAD_WINDOW {
            return Err(Error::Audio(format!(
                "silero expects {VAD_WINDOW}-sample windows, got {}",
                window.len()
            )));
        }
        self.score_window(window)
    }

    fn reset(&mut self) {
        self.recurrent.reset();
    }
}

// ── Tensor plumbing ────────────────────────────────────────────────

fn audio_tensor(window: &[f32]) -> Result<SessionInputValue<'static>> {
    let arr = Array2::from_shape_vec((1, window.len()), window.to_vec()).map_err(shape_err)?;
    Ok(Value::from_array(arr).map_err(run_err)?.into())
}

fn rate_tensor() -> Result<SessionInputValue<'static>> {
    let arr = Array1::from_elem(1, 16_000i64);
    Ok(Value::from_array(arr).map_err(run_err)?.into())
}

/// Recurrent state is `[layers, batch, units]` = `[2, 1, n]`; the unit
/// count follows from the buffer length.
fn state_tensor(data: &[f32]) -> Result<SessionInputValue<'static>> {
    let units = data.len() / 2;
    let arr = Array3::from_shape_vec((2, 1, units), data.to_vec()).map_err(shape_err)?;
    Ok(Value::from_array(arr).map_err(run_err)?.into())
}

/// First declared tensor name that matches any accepted spelling.
fn pick(declared: &[String], accepted: &[&str]) -> Option<String> {
    declared
        .iter()
        .find(|name| accepted.iter().any(|a| name.eq_ignore_ascii_case(a)))
        .cloned()
}

fn init_err(e: ort::Error) -> Error {
    Error::VadInit(e.to_string())
}

fn run_err(e: ort::Error) -> Error {
    Error::Audio(format!("vad inference: {e}"))
}

fn shape_err(e: ndarray::ShapeError) -> Error {
    Error::Audio(format!("vad tensor shape: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn detects_lstm_interface() {
        let r = Recurrent::detect(
            &names(&["input", "sr", "h", "c"]),
            &names(&["output", "hn", "cn"]),
        );
        assert!(matches!(r, Recurrent::Lstm { .. }));
    }

    #[test]
    fn detects_gru_interface() {
        let r = Recurrent::detect(&names(&["input", "sr", "state"]), &names(&["output", "stateN"]));
        match r {
            Recurrent::Gru { state, .. } => assert_eq!(state.len(), 2 * GRU_UNITS),
            other => panic!("expected gru, got {}", other.variant()),
        }
    }

    #[test]
    fn incomplete_lstm_tensors_fall_back() {
        // Inputs look like an LSTM but the state outputs are absent.
        let r = Recurrent::detect(&names(&["input", "h", "c"]), &names(&["output"]));
        assert!(matches!(r, Recurrent::Stateless));
    }

    #[test]
    fn pick_is_case_insensitive_and_honors_declaration_order() {
        let declared = names(&["Audio", "SR"]);
        assert_eq!(pick(&declared, &["input", "audio", "x"]).as_deref(), Some("Audio"));
        assert_eq!(pick(&declared, &["missing"]), None);
    }

    #[test]
    fn reset_zeroes_state() {
        let mut r = Recurrent::Gru {
            state_in: "state".into(),
            state_out: "stateN".into(),
            state: vec![0.5; 2 * GRU_UNITS],
        };
        r.reset();
        match r {
            Recurrent::Gru { state, .. } => assert!(state.iter().all(|v| *v == 0.0)),
            _ => unreachable!(),
        }
    }
}
