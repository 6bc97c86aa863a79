//! Acknowledgment sounds
//!
//! A chime when the wake phrase is heard and a short cue while the backend
//! is thinking. Either can be replaced by a WAV file.

use std::path::Path;

use super::{PlaybackKind, PlaybackRequest};
use crate::Result;

/// Sample rate of synthesized cues
const CUE_SAMPLE_RATE: u32 = 24000;

/// Which acknowledgment to play
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    /// Played when the wake phrase is detected
    WakeChime,
    /// Played before waiting on the reasoning backend
    Processing,
}

impl Cue {
    /// Load the cue from `path`, or synthesize the built-in tone
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read
    pub fn request(self, path: Option<&Path>) -> Result<PlaybackRequest> {
        if let Some(path) = path {
            let bytes = std::fs::read(path)?;
            tracing::debug!(cue = ?self, path = %path.display(), "loaded cue file");
            return Ok(PlaybackRequest::wav(PlaybackKind::Cue, bytes));
        }

        let samples = match self {
            // Two rising notes
            Self::WakeChime => [tone(880.0, 0.09, 0.25), tone(1320.0, 0.12, 0.25)].concat(),
            Self::Processing => tone(660.0, 0.15, 0.15),
        };
        Ok(PlaybackRequest::pcm(PlaybackKind::Cue, samples, CUE_SAMPLE_RATE))
    }
}

/// Sine tone with a short linear fade at both ends to avoid clicks
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn tone(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (CUE_SAMPLE_RATE as f32 * duration_secs) as usize;
    let fade = (num_samples / 10).max(1);

    (0..num_samples)
        .map(|i| {
            let t = i as f32 / CUE_SAMPLE_RATE as f32;
            let edge = i.min(num_samples - 1 - i);
            let envelope = (edge as f32 / fade as f32).min(1.0);
            (2.0 * std::f32::consts::PI * frequency * t).sin() * amplitude * envelope
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioEncoding, samples_to_wav};

    #[test]
    fn test_synthesized_cues_differ() {
        let chime = Cue::WakeChime.request(None).unwrap();
        let processing = Cue::Processing.request(None).unwrap();
        assert_eq!(chime.encoding(), AudioEncoding::Pcm);
        assert_eq!(chime.kind, PlaybackKind::Cue);

        let (a, _) = chime.into_samples().unwrap();
        let (b, _) = processing.into_samples().unwrap();
        assert_ne!(a.len(), b.len());
        assert!(a.iter().all(|s| s.abs() <= 0.25));
        // Faded edges
        assert!(a[0].abs() < 1e-6);
    }

    #[test]
    fn test_cue_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chime.wav");
        std::fs::write(&path, samples_to_wav(&[0.1; 100], 16000).unwrap()).unwrap();

        let request = Cue::WakeChime.request(Some(&path)).unwrap();
        assert_eq!(request.encoding(), AudioEncoding::Wav);
    }

    #[test]
    fn test_missing_cue_file_is_error() {
        assert!(
            Cue::Processing
                .request(Some(Path::new("/nonexistent/one_moment.wav")))
                .is_err()
        );
    }
}
