//! Endpointing: deciding when the user has stopped talking
//!
//! [`EndpointingRecorder`] is a pure state machine fed one frame and its
//! speech probability at a time:
//!
//! ```text
//!            speech (debounced)          below threshold
//!   Armed ─────────────────────▶ Recording ─────────────▶ TrailingSilence
//!     │                            ▲  │                      │  │
//!     │ no speech                  │  └──── max duration ────┼──┼──▶ Done(max-duration)
//!     ▼                            └──── back above ─────────┘  │
//!   Done(no-speech)                                             └──▶ Done(silence)
//! ```
//!
//! Any state goes to `Done(cancelled)` on [`EndpointingRecorder::cancel`].
//! Durations are counted in frames, never wall-clock time, so capture
//! jitter can't skew decisions.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::audio::{AudioFrame, FrameFormat, FrameSource, samples_to_wav};
use crate::config::VadConfig;
use crate::shutdown::Shutdown;
use crate::vad::SpeechDetector;
use crate::{Error, Result};

/// Why a recording session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Trailing silence reached the silence timeout
    Silence,
    /// Recorded duration reached the hard ceiling
    MaxDuration,
    /// Shutdown or capture failure
    Cancelled,
    /// Speech never started
    NoSpeech,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Silence => "silence",
            Self::MaxDuration => "max-duration",
            Self::Cancelled => "cancelled",
            Self::NoSpeech => "no-speech",
        })
    }
}

/// Recorder state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    /// Waiting for the first speech
    Armed,
    /// Accumulating speech
    Recording,
    /// Below threshold, counting toward the silence timeout
    TrailingSilence,
    /// Finalized
    Done(TerminationReason),
}

impl RecorderState {
    #[must_use]
    pub const fn is_done(self) -> bool {
        matches!(self, Self::Done(_))
    }
}

/// Audio collected during one recording session
#[derive(Debug)]
pub struct Utterance {
    frames: Vec<AudioFrame>,
    format: FrameFormat,
    started_at: DateTime<Utc>,
    reason: TerminationReason,
}

impl Utterance {
    /// Frames in capture order
    #[must_use]
    pub fn frames(&self) -> &[AudioFrame] {
        &self.frames
    }

    #[must_use]
    pub const fn format(&self) -> FrameFormat {
        self.format
    }

    /// When the recording session began
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub const fn reason(&self) -> TerminationReason {
        self.reason
    }

    /// Total duration, from frame count
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.format.duration_of(self.frames.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// All samples, concatenated
    #[must_use]
    pub fn samples(&self) -> Vec<f32> {
        self.frames
            .iter()
            .flat_map(|f| f.samples().iter().copied())
            .collect()
    }

    /// Serialize as 16-bit mono WAV
    ///
    /// # Errors
    ///
    /// Returns error if WAV encoding fails
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        samples_to_wav(&self.samples(), self.format.sample_rate)
    }
}

/// Recording stopped by a capture failure, with what was captured so far
#[derive(Debug, thiserror::Error)]
#[error("recording interrupted: {error}")]
pub struct Interrupted {
    /// Partial utterance, finalized as `Cancelled`
    pub partial: Utterance,
    /// The underlying failure
    #[source]
    pub error: Error,
}

/// Frame-count equivalents of the configured durations
#[derive(Debug, Clone, Copy)]
struct Limits {
    silence: usize,
    max: usize,
    grace: usize,
    no_speech: usize,
    pre_roll: usize,
    debounce: usize,
}

impl Limits {
    fn new(config: &VadConfig, format: FrameFormat) -> Self {
        Self {
            silence: format.frames_reaching(config.silence_timeout).max(1),
            max: format.frames_within(config.max_recording).max(1),
            grace: format.frames_reaching(config.grace),
            no_speech: format.frames_reaching(config.no_speech_timeout).max(1),
            pre_roll: format.frames_within(config.pre_roll),
            debounce: config.start_debounce_frames.max(1),
        }
    }
}

/// One recording session
#[derive(Debug)]
pub struct EndpointingRecorder {
    threshold: f32,
    format: FrameFormat,
    limits: Limits,
    state: RecorderState,
    frames: Vec<AudioFrame>,
    pre_roll: VecDeque<AudioFrame>,
    armed_frames: usize,
    speech_run: usize,
    silence_run: usize,
    grace_remaining: usize,
    started_at: DateTime<Utc>,
    last_seq: Option<u64>,
}

impl EndpointingRecorder {
    /// Start a session that waits in `Armed` for speech
    #[must_use]
    pub fn new(config: &VadConfig, format: FrameFormat) -> Self {
        let limits = Limits::new(config, format);
        Self {
            threshold: config.threshold,
            format,
            limits,
            state: RecorderState::Armed,
            frames: Vec::new(),
            pre_roll: VecDeque::with_capacity(limits.pre_roll + limits.debounce),
            armed_frames: 0,
            speech_run: 0,
            silence_run: 0,
            grace_remaining: 0,
            started_at: Utc::now(),
            last_seq: None,
        }
    }

    /// Start recording immediately
    ///
    /// Used after a wake event: frames inside the grace window count as
    /// speech whatever their probability, so the first word isn't clipped.
    #[must_use]
    pub fn start_unconditionally(config: &VadConfig, format: FrameFormat) -> Self {
        let mut recorder = Self::new(config, format);
        recorder.state = RecorderState::Recording;
        recorder.grace_remaining = recorder.limits.grace;
        tracing::debug!(grace_frames = recorder.limits.grace, "recording started");
        recorder
    }

    #[must_use]
    pub const fn state(&self) -> RecorderState {
        self.state
    }

    /// Duration accumulated so far
    #[must_use]
    pub fn recorded_duration(&self) -> Duration {
        self.format.duration_of(self.frames.len())
    }

    /// Feed one frame with its speech probability
    ///
    /// Frames pushed after `Done` are ignored.
    pub fn push(&mut self, frame: AudioFrame, probability: f32) -> RecorderState {
        if let RecorderState::Done(reason) = self.state {
            tracing::trace!(seq = frame.seq(), %reason, "frame after endpoint ignored");
            return self.state;
        }

        self.last_seq = Some(frame.seq());

        // Equal to threshold counts as speech
        let is_speech = probability >= self.threshold;

        match self.state {
            RecorderState::Armed => self.push_armed(frame, is_speech),
            RecorderState::Recording | RecorderState::TrailingSilence => {
                self.push_active(frame, is_speech);
            }
            RecorderState::Done(_) => {}
        }
        self.state
    }

    /// End the session now, keeping whatever was captured
    pub fn cancel(&mut self) -> RecorderState {
        if !self.state.is_done() {
            self.pre_roll.clear();
            self.transition(RecorderState::Done(TerminationReason::Cancelled));
        }
        self.state
    }

    /// Hand off the utterance; an unfinished session counts as cancelled
    #[must_use]
    pub fn finish(self) -> Utterance {
        let reason = match self.state {
            RecorderState::Done(reason) => reason,
            _ => TerminationReason::Cancelled,
        };
        Utterance {
            frames: self.frames,
            format: self.format,
            started_at: self.started_at,
            reason,
        }
    }

    /// Check that `frame` directly follows the last pushed frame
    ///
    /// While `Armed` a gap only restarts the pre-roll and debounce.
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if frames were lost after recording started,
    /// since the utterance would be missing audio
    pub fn check_contiguous(&mut self, frame: &AudioFrame) -> Result<()> {
        let Some(last) = self.last_seq else {
            return Ok(());
        };
        let expected = last + 1;
        if frame.seq() == expected || self.state.is_done() {
            return Ok(());
        }

        let lost = frame.seq().saturating_sub(expected);
        if self.state == RecorderState::Armed {
            tracing::debug!(expected, got = frame.seq(), "capture gap while armed");
            self.pre_roll.clear();
            self.speech_run = 0;
            return Ok(());
        }

        tracing::warn!(expected, got = frame.seq(), "capture gap while recording");
        Err(Error::Device(format!(
            "capture gap while recording: {lost} frames lost"
        )))
    }

    /// Drive the session from a frame source until it ends
    ///
    /// Shutdown finalizes with `Cancelled` and returns the partial utterance.
    ///
    /// # Errors
    ///
    /// If the source fails or ends, or frames go missing mid-utterance,
    /// returns [`Interrupted`] carrying the partial utterance and the
    /// underlying error.
    pub async fn run(
        mut self,
        source: &mut dyn FrameSource,
        vad: &mut dyn SpeechDetector,
        shutdown: &mut Shutdown,
    ) -> std::result::Result<Utterance, Interrupted> {
        loop {
            let next = tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    tracing::debug!("recording cancelled by shutdown");
                    self.cancel();
                    return Ok(self.finish());
                }
                next = source.next_frame() => next,
            };

            match next {
                Ok(Some(frame)) => {
                    if let Err(error) = self.check_contiguous(&frame) {
                        self.cancel();
                        return Err(Interrupted {
                            partial: self.finish(),
                            error,
                        });
                    }
                    let probability = vad.speech_probability(&frame);
                    if self.push(frame, probability).is_done() {
                        return Ok(self.finish());
                    }
                }
                Ok(None) => {
                    self.cancel();
                    return Err(Interrupted {
                        partial: self.finish(),
                        error: Error::Device("capture stream ended".to_string()),
                    });
                }
                Err(error) => {
                    tracing::error!(%error, "capture failed while recording");
                    self.cancel();
                    return Err(Interrupted {
                        partial: self.finish(),
                        error,
                    });
                }
            }
        }
    }

    fn push_armed(&mut self, frame: AudioFrame, is_speech: bool) {
        self.armed_frames += 1;
        self.speech_run = if is_speech { self.speech_run + 1 } else { 0 };

        if self.pre_roll.len() >= self.limits.pre_roll + self.limits.debounce {
            self.pre_roll.pop_front();
        }
        self.pre_roll.push_back(frame);

        if self.speech_run >= self.limits.debounce {
            self.frames.extend(self.pre_roll.drain(..));
            let excess = self.frames.len().saturating_sub(self.limits.max);
            self.frames.drain(..excess);
            self.transition(RecorderState::Recording);
            if self.frames.len() >= self.limits.max {
                self.transition(RecorderState::Done(TerminationReason::MaxDuration));
            }
        } else if self.armed_frames >= self.limits.no_speech {
            self.pre_roll.clear();
            self.transition(RecorderState::Done(TerminationReason::NoSpeech));
        }
    }

    fn push_active(&mut self, frame: AudioFrame, is_speech: bool) {
        self.frames.push(frame);

        let speech = if self.grace_remaining > 0 {
            self.grace_remaining -= 1;
            true
        } else {
            is_speech
        };

        if speech {
            self.silence_run = 0;
            self.transition(RecorderState::Recording);
        } else {
            self.silence_run += 1;
            self.transition(RecorderState::TrailingSilence);
        }

        // The ceiling always wins over silence
        if self.frames.len() >= self.limits.max {
            self.transition(RecorderState::Done(TerminationReason::MaxDuration));
        } else if self.silence_run >= self.limits.silence {
            let keep = self.frames.len() - self.silence_run;
            self.frames.truncate(keep);
            self.transition(RecorderState::Done(TerminationReason::Silence));
        }
    }

    fn transition(&mut self, next: RecorderState) {
        if next == self.state {
            return;
        }
        if next.is_done() {
            tracing::debug!(
                from = ?self.state,
                to = ?next,
                duration = ?self.recorded_duration(),
                "endpoint reached"
            );
        } else {
            tracing::trace!(from = ?self.state, to = ?next, "endpointing transition");
        }
        self.state = next;
    }
}
