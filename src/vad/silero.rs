//! Silero VAD through ONNX Runtime

use std::path::Path;

use ndarray::{Array2, Array3, Ix3, arr1};
use ort::{GraphOptimizationLevel, Session};

use super::SpeechDetector;
use crate::audio::{AudioFrame, FrameFormat};
use crate::{Error, Result};

/// Recurrent state shape expected by the v5 model
const STATE_SHAPE: (usize, usize, usize) = (2, 1, 128);

/// Silero model scoring fixed windows of audio
///
/// The model only accepts 512-sample windows at 16kHz (256 at 8kHz), so
/// frames are re-buffered and each frame reports the probability of the
/// most recently completed window.
pub struct SileroVad {
    session: Session,
    state: Array3<f32>,
    context: Vec<f32>,
    pending: Vec<f32>,
    window: usize,
    sample_rate: i64,
    probability: f32,
}

impl SileroVad {
    /// Load the model from an ONNX file
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the sample rate is unsupported or the model can't be loaded
    pub fn open(path: &Path, format: FrameFormat) -> Result<Self> {
        let (window, context) = match format.sample_rate {
            16000 => (512, 64),
            8000 => (256, 32),
            other => {
                return Err(Error::Config(format!(
                    "silero vad needs 8000 or 16000 Hz audio, not {other}"
                )));
            }
        };

        let session = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.with_intra_threads(1))
            .and_then(|b| b.commit_from_file(path))
            .map_err(|e| Error::Config(format!("failed to load {}: {e}", path.display())))?;

        tracing::info!(path = %path.display(), window, "silero vad loaded");

        Ok(Self {
            session,
            state: Array3::zeros(STATE_SHAPE),
            context: vec![0.0; context],
            pending: Vec::with_capacity(window * 2),
            window,
            sample_rate: i64::from(format.sample_rate),
            probability: 0.0,
        })
    }

    fn infer(&mut self, chunk: &[f32]) -> std::result::Result<f32, String> {
        let mut samples = Vec::with_capacity(self.context.len() + chunk.len());
        samples.extend_from_slice(&self.context);
        samples.extend_from_slice(chunk);
        let len = samples.len();
        let input = Array2::from_shape_vec((1, len), samples).map_err(|e| e.to_string())?;
        let sr = arr1(&[self.sample_rate]);

        let outputs = self
            .session
            .run(
                ort::inputs![
                    "input" => input.view(),
                    "state" => self.state.view(),
                    "sr" => sr.view(),
                ]
                .map_err(|e| e.to_string())?,
            )
            .map_err(|e| e.to_string())?;

        let probability = outputs
            .get("output")
            .ok_or("missing output")?
            .try_extract_tensor::<f32>()
            .map_err(|e| e.to_string())?
            .iter()
            .next()
            .copied()
            .ok_or("empty output")?;

        self.state = outputs
            .get("stateN")
            .ok_or("missing stateN")?
            .try_extract_tensor::<f32>()
            .map_err(|e| e.to_string())?
            .to_owned()
            .into_dimensionality::<Ix3>()
            .map_err(|e| e.to_string())?;

        let tail = chunk.len().saturating_sub(self.context.len());
        self.context.copy_from_slice(&chunk[tail..]);
        Ok(probability)
    }
}

impl SpeechDetector for SileroVad {
    fn speech_probability(&mut self, frame: &AudioFrame) -> f32 {
        self.pending.extend_from_slice(frame.samples());

        while self.pending.len() >= self.window {
            let chunk: Vec<f32> = self.pending.drain(..self.window).collect();
            match self.infer(&chunk) {
                Ok(p) => self.probability = p.clamp(0.0, 1.0),
                Err(e) => {
                    tracing::warn!(seq = frame.seq(), error = %e, "silero inference failed");
                    self.probability = 0.0;
                }
            }
        }

        tracing::trace!(seq = frame.seq(), probability = self.probability, "vad");
        self.probability
    }

    fn reset(&mut self) {
        self.state.fill(0.0);
        self.context.fill(0.0);
        self.pending.clear();
        self.probability = 0.0;
    }
}
