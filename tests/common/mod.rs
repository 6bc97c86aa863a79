//! Shared test utilities
//!
//! Scripted stand-ins for the microphone, the speech models and the HTTP
//! collaborators, so turns can run without audio hardware or network.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use beacon_voice::audio::{
    AudioFrame, Completed, FrameFormat, FrameSource, PlaybackKind, PlaybackRequest, PlaybackSink,
};
use beacon_voice::config::ConfigFile;
use beacon_voice::error::ServiceFailure;
use beacon_voice::services::{Backend, Synthesizer, Transcriber};
use beacon_voice::turn::{Collaborators, TurnController};
use beacon_voice::vad::SpeechDetector;
use beacon_voice::wake::{WakeDetector, WakeModel};
use beacon_voice::{Config, Error, Result, TurnState};

/// First-sample value that marks a wake frame
pub const WAKE: f32 = 2.0;

/// Speech probability used for voiced frames
pub const SPEECH: f32 = 0.9;

/// Speech probability used for silent frames
pub const SILENCE: f32 = 0.0;

/// 20ms frames at 16kHz, so durations divide evenly
#[must_use]
pub fn test_format() -> FrameFormat {
    FrameFormat::from_millis(16000, 20)
}

/// Defaults with 20ms frames, no cues, 2s silence timeout
#[must_use]
pub fn test_config() -> Config {
    let mut config = Config::resolve(ConfigFile::default(), |_| None).expect("default config");
    config.audio.frame_ms = 20;
    config.audio.chime_on_wake = false;
    config.audio.processing_cue = false;
    config.vad.silence_timeout = Duration::from_secs(2);
    config.gateway.session = "voice-test".to_string();
    config.turn.call_timeout = Duration::from_secs(5);
    config
}

/// One scripted capture event
#[derive(Debug, Clone)]
pub enum Step {
    /// A frame whose samples all equal the value
    Frame(f32),
    /// A device failure
    Fail(String),
    /// Frames lost before reaching the queue; only the sequence advances
    Skip(u64),
}

/// Build a script: `(value, count)` runs of frames
#[must_use]
pub fn script(runs: &[(f32, usize)]) -> Vec<Step> {
    runs.iter()
        .flat_map(|&(value, count)| std::iter::repeat_n(Step::Frame(value), count))
        .collect()
}

/// Shared view of the controller's state, filled in after construction
#[derive(Clone, Default)]
pub struct StateObserver {
    rx: Arc<OnceLock<watch::Receiver<TurnState>>>,
}

impl StateObserver {
    pub fn attach(&self, rx: watch::Receiver<TurnState>) {
        let _ = self.rx.set(rx);
    }

    #[must_use]
    pub fn current(&self) -> Option<TurnState> {
        self.rx.get().map(|rx| *rx.borrow())
    }
}

/// Replays a fixed script of frames
pub struct ScriptedSource {
    format: FrameFormat,
    steps: VecDeque<Step>,
    next_seq: u64,
    /// Block forever instead of ending once the script runs out
    hold_open: bool,
    observer: StateObserver,
    /// Controller state at each frame pull
    pub pulls: Arc<Mutex<Vec<Option<TurnState>>>>,
    pub discards: Arc<AtomicUsize>,
}

impl ScriptedSource {
    #[must_use]
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            format: test_format(),
            steps: steps.into(),
            next_seq: 0,
            hold_open: false,
            observer: StateObserver::default(),
            pulls: Arc::default(),
            discards: Arc::default(),
        }
    }

    #[must_use]
    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: StateObserver) -> Self {
        self.observer = observer;
        self
    }
}

#[async_trait(?Send)]
impl FrameSource for ScriptedSource {
    fn format(&self) -> FrameFormat {
        self.format
    }

    async fn next_frame(&mut self) -> Result<Option<AudioFrame>> {
        self.pulls.lock().unwrap().push(self.observer.current());

        while let Some(Step::Skip(lost)) = self.steps.front() {
            self.next_seq += lost;
            self.steps.pop_front();
        }

        match self.steps.pop_front() {
            Some(Step::Frame(value)) => {
                let frame = AudioFrame::new(self.next_seq, vec![value; self.format.samples_per_frame]);
                self.next_seq += 1;
                // Let other tasks (shutdown, timers) run between frames
                tokio::task::yield_now().await;
                Ok(Some(frame))
            }
            Some(Step::Fail(reason)) => Err(Error::Device(reason)),
            Some(Step::Skip(_)) => unreachable!("skips consumed above"),
            None if self.hold_open => std::future::pending().await,
            None => Ok(None),
        }
    }

    fn discard_pending(&mut self) -> usize {
        self.discards.fetch_add(1, Ordering::SeqCst);
        0
    }
}

/// Speech probability is the frame's first sample, clamped to [0, 1]
pub struct ScriptedVad;

impl SpeechDetector for ScriptedVad {
    fn speech_probability(&mut self, frame: &AudioFrame) -> f32 {
        frame.samples().first().copied().unwrap_or(0.0).clamp(0.0, 1.0)
    }
}

/// Scores 1.0 on frames marked with [`WAKE`]
pub struct ScriptedWake {
    /// Act like a trained model rather than an energy gate
    pub hears_phrase: bool,
}

impl WakeModel for ScriptedWake {
    fn score(&mut self, frame: &AudioFrame) -> f32 {
        if frame.samples().first().copied().unwrap_or(0.0) >= WAKE {
            1.0
        } else {
            0.0
        }
    }

    fn matches_phrase(&self) -> bool {
        self.hears_phrase
    }
}

/// Wake detector over [`ScriptedWake`] that vouches for the phrase
#[must_use]
pub fn scripted_wake(config: &Config) -> WakeDetector {
    WakeDetector::new(
        Box::new(ScriptedWake { hears_phrase: true }),
        &config.wake,
        test_format(),
    )
}

/// Returns queued results in order, repeating the last one
pub struct Canned<T: Clone> {
    results: Mutex<VecDeque<std::result::Result<T, ServiceFailure>>>,
    delay: Duration,
    /// Inputs received, in order
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl<T: Clone> Canned<T> {
    #[must_use]
    pub fn new(results: Vec<std::result::Result<T, ServiceFailure>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            delay: Duration::ZERO,
            calls: Arc::default(),
        }
    }

    #[must_use]
    pub fn ok(value: T) -> Self {
        Self::new(vec![Ok(value)])
    }

    #[must_use]
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    async fn next(&self, input: String) -> std::result::Result<T, ServiceFailure> {
        self.calls.lock().unwrap().push(input);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut results = self.results.lock().unwrap();
        if results.len() > 1 {
            results.pop_front().unwrap()
        } else {
            results.front().cloned().unwrap()
        }
    }
}

#[async_trait]
impl Transcriber for Canned<String> {
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String> {
        self.next(format!("{} bytes", wav.len()))
            .await
            .map_err(Error::Transcription)
    }
}

#[async_trait]
impl Backend for Canned<String> {
    async fn respond(&self, text: &str, session: &str) -> Result<String> {
        self.next(format!("{session}: {text}"))
            .await
            .map_err(Error::Backend)
    }
}

/// Synthesizes a short silent buffer for any text
pub struct SilentSynthesizer {
    pub calls: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Synthesizer for SilentSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<PlaybackRequest> {
        self.calls.lock().unwrap().push(text.to_string());
        Ok(PlaybackRequest::pcm(PlaybackKind::Reply, vec![0.0; 240], 24000))
    }
}

/// What the recording sink does with a reply once recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkBehavior {
    /// Finish immediately
    #[default]
    Complete,
    /// Never finish a reply
    Block,
    /// Fail every reply
    Fail,
}

/// Records every playback with the controller state at the time
pub struct RecordingSink {
    observer: StateObserver,
    behavior: SinkBehavior,
    pub plays: Arc<Mutex<Vec<(PlaybackKind, Option<TurnState>)>>>,
}

#[async_trait]
impl PlaybackSink for RecordingSink {
    async fn play(&mut self, request: PlaybackRequest) -> Result<Completed> {
        let state = self.observer.current();
        self.plays.lock().unwrap().push((request.kind, state));
        if request.kind == PlaybackKind::Reply {
            match self.behavior {
                SinkBehavior::Complete => {}
                SinkBehavior::Block => std::future::pending::<()>().await,
                SinkBehavior::Fail => {
                    return Err(Error::Playback("output stream closed".to_string()));
                }
            }
        }
        let (samples, rate) = request.into_samples()?;
        #[allow(clippy::cast_precision_loss)]
        let duration = Duration::from_secs_f64(samples.len() as f64 / f64::from(rate));
        Ok(Completed { duration })
    }
}

/// Handles onto everything a harness records
pub struct Harness {
    pub controller: TurnController,
    pub pulls: Arc<Mutex<Vec<Option<TurnState>>>>,
    pub plays: Arc<Mutex<Vec<(PlaybackKind, Option<TurnState>)>>>,
    pub transcriber_calls: Arc<Mutex<Vec<String>>>,
    pub backend_calls: Arc<Mutex<Vec<String>>>,
    pub synthesized: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    /// Kinds of everything played, in order
    #[must_use]
    pub fn played_kinds(&self) -> Vec<PlaybackKind> {
        self.plays.lock().unwrap().iter().map(|(kind, _)| *kind).collect()
    }
}

/// Knobs for [`harness_with`]
#[derive(Debug, Clone, Copy)]
pub struct Options {
    /// Whether the wake model vouches for the phrase
    pub hears_phrase: bool,
    pub sink: SinkBehavior,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            hears_phrase: true,
            sink: SinkBehavior::Complete,
        }
    }
}

/// Build a controller over scripted capture and canned collaborators
pub fn harness(
    config: &Config,
    source: ScriptedSource,
    transcriber: Canned<String>,
    backend: Canned<String>,
) -> Harness {
    harness_with(config, source, transcriber, backend, Options::default())
}

/// [`harness`] with a non-default wake model or sink
pub fn harness_with(
    config: &Config,
    source: ScriptedSource,
    transcriber: Canned<String>,
    backend: Canned<String>,
    options: Options,
) -> Harness {
    let observer = StateObserver::default();
    let source = source.with_observer(observer.clone());
    let pulls = Arc::clone(&source.pulls);

    let transcriber_calls = Arc::clone(&transcriber.calls);
    let backend_calls = Arc::clone(&backend.calls);
    let synthesized = Arc::new(Mutex::new(Vec::new()));
    let plays = Arc::new(Mutex::new(Vec::new()));

    let collaborators = Collaborators {
        transcriber: Box::new(transcriber),
        backend: Box::new(backend),
        synthesizer: Box::new(SilentSynthesizer {
            calls: Arc::clone(&synthesized),
        }),
        playback: Box::new(RecordingSink {
            observer: observer.clone(),
            behavior: options.sink,
            plays: Arc::clone(&plays),
        }),
    };

    let controller = TurnController::new(
        config,
        Box::new(source),
        WakeDetector::new(
            Box::new(ScriptedWake {
                hears_phrase: options.hears_phrase,
            }),
            &config.wake,
            test_format(),
        ),
        Box::new(ScriptedVad),
        collaborators,
    )
    .expect("controller");
    observer.attach(controller.subscribe_state());

    Harness {
        controller,
        pulls,
        plays,
        transcriber_calls,
        backend_calls,
        synthesized,
    }
}
