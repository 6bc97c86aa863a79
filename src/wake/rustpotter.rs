//! Keyword spotting with a trained rustpotter model

use std::path::Path;

use rustpotter::{Rustpotter, RustpotterConfig, SampleFormat};

use super::WakeModel;
use crate::audio::{AudioFrame, FrameFormat};
use crate::{Error, Result};

/// Wake model backed by a rustpotter `.rpw` file
///
/// Rustpotter consumes its own frame size, so capture frames are
/// re-buffered and a frame scores 1 when any completed chunk detected the
/// wake word.
pub struct RustpotterWakeModel {
    detector: Rustpotter,
    pending: Vec<f32>,
    chunk: usize,
}

impl RustpotterWakeModel {
    /// Load a model for mono f32 audio of `format`
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the detector can't be built or the model can't be read
    pub fn open(path: &Path, format: FrameFormat, threshold: f32) -> Result<Self> {
        let mut config = RustpotterConfig::default();
        config.fmt.sample_rate = format.sample_rate as usize;
        config.fmt.channels = 1;
        config.fmt.sample_format = SampleFormat::F32;
        config.detector.threshold = threshold;

        let mut detector = Rustpotter::new(&config)
            .map_err(|e| Error::Config(format!("failed to create wake detector: {e}")))?;
        detector
            .add_wakeword_from_file("wake", &path.to_string_lossy())
            .map_err(|e| Error::Config(format!("failed to load {}: {e}", path.display())))?;

        let chunk = detector.get_samples_per_frame();
        tracing::info!(path = %path.display(), chunk, "wake word model loaded");

        Ok(Self {
            detector,
            pending: Vec::with_capacity(chunk * 2),
            chunk,
        })
    }
}

impl WakeModel for RustpotterWakeModel {
    fn score(&mut self, frame: &AudioFrame) -> f32 {
        self.pending.extend_from_slice(frame.samples());

        let mut detected = false;
        while self.pending.len() >= self.chunk {
            let chunk: Vec<f32> = self.pending.drain(..self.chunk).collect();
            if let Some(detection) = self.detector.process_f32(&chunk) {
                tracing::debug!(seq = frame.seq(), score = detection.score, "rustpotter detection");
                detected = true;
            }
        }

        if detected { 1.0 } else { 0.0 }
    }

    fn reset(&mut self) {
        self.pending.clear();
    }

    fn matches_phrase(&self) -> bool {
        true
    }
}
