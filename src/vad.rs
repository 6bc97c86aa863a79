//! Voice activity detection
//!
//! Produces a per-frame speech probability in [0, 1] that drives the
//! endpointing recorder. The bundled detector maps RMS energy onto that
//! scale; with the `silero` feature the Silero model can be used instead.

#[cfg(feature = "silero")]
mod silero;

use std::fmt;
use std::str::FromStr;

use crate::audio::{AudioFrame, FrameFormat};
use crate::config::VadConfig;
use crate::{Error, Result};

#[cfg(feature = "silero")]
pub use silero::SileroVad;

/// Scores frames for speech
pub trait SpeechDetector: Send {
    /// Probability in [0, 1] that the frame contains speech
    fn speech_probability(&mut self, frame: &AudioFrame) -> f32;

    /// Forget any acoustic context carried between frames
    fn reset(&mut self) {}
}

/// RMS energy at or below which a frame scores 0
const DEFAULT_FLOOR: f32 = 0.01;

/// RMS energy at or above which a frame scores 1
const DEFAULT_CEILING: f32 = 0.05;

/// Energy-based detector
///
/// Linear between a noise floor and a ceiling, so the default threshold of
/// 0.5 corresponds to an RMS of 0.03.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    floor: f32,
    ceiling: f32,
}

impl EnergyVad {
    /// Create a detector with explicit energy bounds
    #[must_use]
    pub fn new(floor: f32, ceiling: f32) -> Self {
        let ceiling = if ceiling > floor { ceiling } else { floor + f32::EPSILON };
        Self { floor, ceiling }
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new(DEFAULT_FLOOR, DEFAULT_CEILING)
    }
}

impl SpeechDetector for EnergyVad {
    fn speech_probability(&mut self, frame: &AudioFrame) -> f32 {
        let energy = frame.rms();
        let probability = ((energy - self.floor) / (self.ceiling - self.floor)).clamp(0.0, 1.0);
        tracing::trace!(seq = frame.seq(), energy, probability, "vad");
        probability
    }
}

/// Which detector scores frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEngine {
    Energy,
    Silero,
}

impl FromStr for VadEngine {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "energy" => Ok(Self::Energy),
            "silero" => Ok(Self::Silero),
            other => Err(Error::Config(format!("unknown vad engine: {other}"))),
        }
    }
}

impl fmt::Display for VadEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Energy => "energy",
            Self::Silero => "silero",
        })
    }
}

/// Build the configured detector
///
/// # Errors
///
/// Returns `Error::Config` if the Silero model can't be loaded or the
/// binary was built without the `silero` feature
pub fn detector_from_config(
    config: &VadConfig,
    format: FrameFormat,
) -> Result<Box<dyn SpeechDetector>> {
    tracing::debug!(engine = %config.engine, "speech detector selected");
    match config.engine {
        VadEngine::Energy => Ok(Box::new(EnergyVad::default())),
        VadEngine::Silero => silero_detector(config, format),
    }
}

#[cfg(feature = "silero")]
fn silero_detector(config: &VadConfig, format: FrameFormat) -> Result<Box<dyn SpeechDetector>> {
    let path = config
        .model_path
        .as_deref()
        .ok_or_else(|| Error::Config("vad.model_path is required for silero".to_string()))?;
    Ok(Box::new(SileroVad::open(path, format)?))
}

#[cfg(not(feature = "silero"))]
fn silero_detector(_: &VadConfig, _: FrameFormat) -> Result<Box<dyn SpeechDetector>> {
    Err(Error::Config(
        "silero vad requires building with the `silero` feature".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(level: f32) -> AudioFrame {
        AudioFrame::new(0, vec![level; 320])
    }

    #[test]
    fn test_silence_scores_zero() {
        let mut vad = EnergyVad::default();
        assert!(vad.speech_probability(&constant(0.0)).abs() < f32::EPSILON);
    }

    #[test]
    fn test_loud_scores_one() {
        let mut vad = EnergyVad::default();
        assert!((vad.speech_probability(&constant(0.3)) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_midpoint_is_half() {
        let mut vad = EnergyVad::default();
        let p = vad.speech_probability(&constant(0.03));
        assert!((p - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_engine_parsing() {
        assert_eq!("Silero".parse::<VadEngine>().unwrap(), VadEngine::Silero);
        assert_eq!("energy".parse::<VadEngine>().unwrap(), VadEngine::Energy);
        assert!("webrtc".parse::<VadEngine>().is_err());
    }

    #[test]
    fn test_energy_engine_built_by_default() {
        let format = FrameFormat::from_millis(16000, 32);
        let mut detector = detector_from_config(&VadConfig::default(), format).unwrap();
        let loud = AudioFrame::new(0, vec![0.3; 512]);
        assert!((detector.speech_probability(&loud) - 1.0).abs() < f32::EPSILON);
    }

    #[cfg(not(feature = "silero"))]
    #[test]
    fn test_silero_needs_feature() {
        let config = VadConfig {
            engine: VadEngine::Silero,
            model_path: Some("silero_vad.onnx".into()),
            ..VadConfig::default()
        };
        let format = FrameFormat::from_millis(16000, 32);
        let err = detector_from_config(&config, format).err().unwrap();
        assert!(matches!(err, Error::Config(msg) if msg.contains("silero")));
    }

    #[cfg(feature = "silero")]
    #[test]
    fn test_missing_silero_model_is_config_error() {
        let config = VadConfig {
            engine: VadEngine::Silero,
            model_path: Some("/nonexistent/silero_vad.onnx".into()),
            ..VadConfig::default()
        };
        let format = FrameFormat::from_millis(16000, 32);
        assert!(matches!(
            detector_from_config(&config, format),
            Err(Error::Config(_))
        ));
    }
}
