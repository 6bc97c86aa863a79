//! Wake phrase detection
//!
//! A [`WakeModel`] scores each frame; [`WakeDetector`] turns scores into
//! discrete wake events, counting only the rising edge and suppressing
//! re-triggers inside a cool-down window (echo of the phrase itself,
//! reverberation).
//!
//! Without a trained model the energy gate only knows that someone spoke,
//! so the turn controller confirms the phrase against the transcript.

#[cfg(feature = "wake-word")]
mod rustpotter;

use crate::audio::{AudioFrame, FrameFormat};
use crate::config::WakeConfig;
use crate::Result;

#[cfg(feature = "wake-word")]
pub use self::rustpotter::RustpotterWakeModel;

/// Minimum audio energy threshold to consider speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Loudest-to-quietest frame energy ratio a burst needs to count as speech
const MODULATION_RATIO: f32 = 2.0;

/// Per-frame wake phrase scorer
///
/// Implementations may keep a short acoustic context across calls but must
/// be deterministic for a given input stream.
pub trait WakeModel: Send {
    /// Score in [0, 1] that the wake phrase just completed
    fn score(&mut self, frame: &AudioFrame) -> f32;

    /// Forget acoustic context
    fn reset(&mut self) {}

    /// Whether a detection means the phrase itself was heard
    ///
    /// When false the transcript must start with the phrase for the turn
    /// to proceed.
    fn matches_phrase(&self) -> bool {
        false
    }
}

/// Fires on a sustained, modulated burst of energy
///
/// A stand-in for setups without a trained model. The score is 1 once the
/// run of contiguous loud frames is `min_active_frames` long and its energy
/// varies the way syllables do; steady sounds such as a tone or fan never
/// fire. Any speech can pass this gate, so it does not match the phrase.
#[derive(Debug, Clone)]
pub struct EnergyWakeModel {
    min_active_frames: usize,
    active_run: usize,
    quietest: f32,
    loudest: f32,
}

impl EnergyWakeModel {
    #[must_use]
    pub fn new(min_active_frames: usize) -> Self {
        Self {
            min_active_frames: min_active_frames.max(1),
            active_run: 0,
            quietest: f32::MAX,
            loudest: 0.0,
        }
    }
}

impl WakeModel for EnergyWakeModel {
    fn score(&mut self, frame: &AudioFrame) -> f32 {
        let energy = frame.rms();
        if energy <= ENERGY_THRESHOLD {
            self.reset();
            return 0.0;
        }

        self.active_run += 1;
        self.quietest = self.quietest.min(energy);
        self.loudest = self.loudest.max(energy);

        let sustained = self.active_run >= self.min_active_frames;
        let modulated = self.loudest >= self.quietest * MODULATION_RATIO;
        if sustained && modulated { 1.0 } else { 0.0 }
    }

    fn reset(&mut self) {
        self.active_run = 0;
        self.quietest = f32::MAX;
        self.loudest = 0.0;
    }
}

/// Build the configured wake model
///
/// # Errors
///
/// Returns `Error::Config` if the model file can't be loaded or the binary
/// was built without the `wake-word` feature
pub fn model_from_config(config: &WakeConfig, format: FrameFormat) -> Result<Box<dyn WakeModel>> {
    match &config.model_path {
        None => {
            tracing::warn!(
                phrase = %config.phrase,
                "no wake word model configured, using energy gate with transcript check"
            );
            Ok(Box::new(EnergyWakeModel::new(config.min_active_frames)))
        }
        Some(path) => trained_model(path, config, format),
    }
}

#[cfg(feature = "wake-word")]
fn trained_model(
    path: &std::path::Path,
    config: &WakeConfig,
    format: FrameFormat,
) -> Result<Box<dyn WakeModel>> {
    Ok(Box::new(RustpotterWakeModel::open(path, format, config.threshold)?))
}

#[cfg(not(feature = "wake-word"))]
fn trained_model(
    path: &std::path::Path,
    _: &WakeConfig,
    _: FrameFormat,
) -> Result<Box<dyn WakeModel>> {
    Err(crate::Error::Config(format!(
        "wake.model_path {} requires building with the `wake-word` feature",
        path.display()
    )))
}

/// Turns per-frame scores into wake events
pub struct WakeDetector {
    model: Box<dyn WakeModel>,
    phrase: String,
    threshold: f32,
    cooldown_frames: u64,
    above: bool,
    last_event: Option<u64>,
}

impl WakeDetector {
    /// Create a detector for frames of `format`
    #[must_use]
    pub fn new(model: Box<dyn WakeModel>, config: &WakeConfig, format: FrameFormat) -> Self {
        let cooldown_frames = format.frames_reaching(config.cooldown) as u64;

        tracing::debug!(
            phrase = %config.phrase,
            threshold = config.threshold,
            cooldown_frames,
            "wake detector initialized"
        );

        Self {
            model,
            phrase: config.phrase.clone(),
            threshold: config.threshold,
            cooldown_frames,
            above: false,
            last_event: None,
        }
    }

    /// Evaluate one frame; true exactly when a new wake event starts
    pub fn evaluate(&mut self, frame: &AudioFrame) -> bool {
        let score = self.model.score(frame);
        let above = score >= self.threshold;
        let rising = above && !self.above;
        self.above = above;

        if !rising {
            return false;
        }

        if let Some(last) = self.last_event {
            let since = frame.seq().saturating_sub(last);
            if since < self.cooldown_frames {
                tracing::debug!(seq = frame.seq(), since, "wake re-trigger suppressed");
                return false;
            }
        }

        self.last_event = Some(frame.seq());
        tracing::info!(phrase = %self.phrase, seq = frame.seq(), score, "wake phrase detected");
        true
    }

    /// Reset acoustic context before listening again
    ///
    /// The cool-down survives a reset so the tail of a reply can't re-wake
    /// the assistant.
    pub fn reset(&mut self) {
        self.model.reset();
        self.above = false;
    }

    /// The configured wake phrase
    #[must_use]
    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    /// Whether the model's detections already confirm the phrase
    #[must_use]
    pub fn matches_phrase(&self) -> bool {
        self.model.matches_phrase()
    }
}

/// Remove a leading wake phrase from a transcript
///
/// Matching is per word, ignoring case and punctuation, so
/// `"Hey Beacon, what's up?"` with phrase `"hey beacon"` yields `"what's up?"`.
/// Returns `None` if the transcript doesn't start with the phrase.
#[must_use]
pub fn strip_wake_phrase(transcript: &str, phrase: &str) -> Option<String> {
    let is_separator = |c: char| c.is_whitespace() || c.is_ascii_punctuation();
    let mut rest = transcript;

    for expected in phrase.split_whitespace().map(normalize_word) {
        let trimmed = rest.trim_start_matches(is_separator);
        let end = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
        let (word, tail) = trimmed.split_at(end);
        if normalize_word(word) != expected {
            return None;
        }
        rest = tail;
    }

    Some(rest.trim_start_matches(is_separator).trim_end().to_string())
}

fn normalize_word(word: &str) -> String {
    word.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::time::Duration;

    /// Scores 1.0 for frames whose first sample is positive
    struct Flag;

    impl WakeModel for Flag {
        fn score(&mut self, frame: &AudioFrame) -> f32 {
            if frame.samples()[0] > 0.0 { 1.0 } else { 0.0 }
        }
    }

    fn detector(cooldown: Duration) -> WakeDetector {
        let config = WakeConfig {
            cooldown,
            ..WakeConfig::default()
        };
        WakeDetector::new(Box::new(Flag), &config, FrameFormat::from_millis(16000, 20))
    }

    fn frame(seq: u64, trigger: bool) -> AudioFrame {
        AudioFrame::new(seq, vec![if trigger { 1.0 } else { 0.0 }; 4])
    }

    #[test]
    fn test_consecutive_triggers_count_once() {
        let mut det = detector(Duration::ZERO);
        assert!(det.evaluate(&frame(0, true)));
        assert!(!det.evaluate(&frame(1, true)));
        assert!(!det.evaluate(&frame(2, true)));
    }

    #[test]
    fn test_retrigger_within_cooldown_suppressed() {
        // 20ms frames: 200ms apart is 10 frames, 1s cool-down is 50
        let mut det = detector(Duration::from_secs(1));
        let mut events = 0;
        for seq in 0..30 {
            if det.evaluate(&frame(seq, seq == 0 || seq == 10)) {
                events += 1;
            }
        }
        assert_eq!(events, 1);
    }

    #[test]
    fn test_retrigger_after_cooldown_counts() {
        let mut det = detector(Duration::from_secs(1));
        assert!(det.evaluate(&frame(0, true)));
        assert!(!det.evaluate(&frame(1, false)));
        assert!(det.evaluate(&frame(50, true)));
    }

    fn level(seq: u64, level: f32) -> AudioFrame {
        AudioFrame::new(seq, vec![level; 320])
    }

    #[test]
    fn test_energy_model_is_binary() {
        let mut model = EnergyWakeModel::new(4);

        // Below the run length the score is 0, not a fraction of the threshold
        for (seq, l) in [(0, 0.1), (1, 0.3), (2, 0.1)] {
            assert!(model.score(&level(seq, l)).abs() < f32::EPSILON);
        }
        assert!((model.score(&level(3, 0.3)) - 1.0).abs() < f32::EPSILON);

        // A quiet frame breaks the run
        assert!(model.score(&level(4, 0.0)).abs() < f32::EPSILON);
        assert!(model.score(&level(5, 0.3)).abs() < f32::EPSILON);
    }

    #[test]
    fn test_energy_model_ignores_steady_sound() {
        let mut model = EnergyWakeModel::new(4);
        for seq in 0..50 {
            assert!(model.score(&level(seq, 0.2)).abs() < f32::EPSILON);
        }
        assert!(!model.matches_phrase());
    }

    #[test]
    fn test_default_model_is_energy_gate() {
        let model =
            model_from_config(&WakeConfig::default(), FrameFormat::from_millis(16000, 20)).unwrap();
        assert!(!model.matches_phrase());
    }

    #[cfg(not(feature = "wake-word"))]
    #[test]
    fn test_trained_model_needs_feature() {
        let config = WakeConfig {
            model_path: Some("hey-beacon.rpw".into()),
            ..WakeConfig::default()
        };
        let err = model_from_config(&config, FrameFormat::from_millis(16000, 20))
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(msg) if msg.contains("wake-word")));
    }

    #[cfg(feature = "wake-word")]
    #[test]
    fn test_missing_trained_model_is_config_error() {
        let config = WakeConfig {
            model_path: Some("/nonexistent/hey-beacon.rpw".into()),
            ..WakeConfig::default()
        };
        assert!(matches!(
            model_from_config(&config, FrameFormat::from_millis(16000, 20)),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_strip_wake_phrase() {
        assert_eq!(
            strip_wake_phrase("Hey Beacon, what's the weather?", "hey beacon").as_deref(),
            Some("what's the weather?")
        );
        assert_eq!(strip_wake_phrase("Hey Beacon", "hey beacon").as_deref(), Some(""));
        assert!(strip_wake_phrase("  turn on the lights ", "hey beacon").is_none());
        // Only a leading phrase counts
        assert!(strip_wake_phrase("ask hey beacon later", "hey beacon").is_none());
    }
}
