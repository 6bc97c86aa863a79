//! Turn controller - the orchestrating state machine
//!
//! One turn is wake → capture → transcribe → reason → synthesize → speak,
//! then back to listening. The pipeline is strictly half-duplex: frames are
//! only pulled while `Idle` or `Capturing`, and playback only happens
//! outside `Capturing`. Every per-turn failure is caught here and reported;
//! only a dead capture stream ends [`TurnController::run`].

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::sync::{broadcast, watch};

use crate::audio::{Completed, Cue, FrameSource, PlaybackKind, PlaybackRequest, PlaybackSink};
use crate::config::{Config, VadConfig};
use crate::endpoint::{EndpointingRecorder, TerminationReason, Utterance};
use crate::error::{FailureClass, ServiceFailure};
use crate::services::{Backend, Services, Synthesizer, Transcriber};
use crate::shutdown::Shutdown;
use crate::vad::SpeechDetector;
use crate::wake::{WakeDetector, strip_wake_phrase};
use crate::{Error, Result};

/// Consecutive device failures after which the controller gives up
const MAX_DEVICE_FAILURES: u32 = 5;

/// Buffered turn events per subscriber
const EVENT_CAPACITY: usize = 64;

/// Where the controller is within a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// Listening for the wake phrase
    Idle,
    /// Endpointing recorder active
    Capturing,
    Transcribing,
    Reasoning,
    Synthesizing,
    /// Playback active
    Speaking,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Capturing => "capturing",
            Self::Transcribing => "transcribing",
            Self::Reasoning => "reasoning",
            Self::Synthesizing => "synthesizing",
            Self::Speaking => "speaking",
        })
    }
}

/// Observable progress of a turn
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    StateChanged(TurnState),
    WakeDetected {
        seq: u64,
    },
    UtteranceCaptured {
        duration: Duration,
        reason: TerminationReason,
    },
    /// Utterance dropped without a transcription attempt
    UtteranceIgnored {
        reason: &'static str,
    },
    Transcript(String),
    Reply(String),
    /// Exactly one per failed turn
    Failed {
        class: FailureClass,
        message: String,
    },
    TurnCompleted,
}

/// How a single turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Ignored(&'static str),
    Failed(FailureClass),
    Cancelled,
}

/// External collaborators the controller calls into
pub struct Collaborators {
    pub transcriber: Box<dyn Transcriber>,
    pub backend: Box<dyn Backend>,
    pub synthesizer: Box<dyn Synthesizer>,
    pub playback: Box<dyn PlaybackSink>,
}

impl Collaborators {
    /// Pair the HTTP services with a playback sink
    #[must_use]
    pub fn new(services: Services, playback: Box<dyn PlaybackSink>) -> Self {
        Self {
            transcriber: services.transcriber,
            backend: services.backend,
            synthesizer: services.synthesizer,
            playback,
        }
    }
}

/// What listening produced
enum Heard {
    Wake(u64),
    Shutdown,
    StreamEnded,
}

/// Drives turns from a frame source
///
/// Owns the only live [`TurnState`]; tests construct a fresh controller per
/// case.
pub struct TurnController {
    source: Box<dyn FrameSource>,
    wake: WakeDetector,
    vad: Box<dyn SpeechDetector>,
    collaborators: Collaborators,
    vad_config: VadConfig,
    min_utterance: Duration,
    session: String,
    call_timeout: Duration,
    announce_failures: bool,
    chime: Option<PlaybackRequest>,
    processing_cue: Option<PlaybackRequest>,
    state: watch::Sender<TurnState>,
    events: broadcast::Sender<TurnEvent>,
}

impl TurnController {
    /// Create a controller in `Idle`
    ///
    /// # Errors
    ///
    /// Returns error if a configured cue file cannot be loaded
    pub fn new(
        config: &Config,
        source: Box<dyn FrameSource>,
        wake: WakeDetector,
        vad: Box<dyn SpeechDetector>,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let chime = config
            .audio
            .chime_on_wake
            .then(|| Cue::WakeChime.request(config.audio.chime_path.as_deref()))
            .transpose()?;
        let processing_cue = config
            .audio
            .processing_cue
            .then(|| Cue::Processing.request(config.audio.processing_cue_path.as_deref()))
            .transpose()?;

        let (state, _) = watch::channel(TurnState::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            source,
            wake,
            vad,
            collaborators,
            vad_config: config.vad.clone(),
            min_utterance: config.audio.min_utterance,
            session: config.gateway.session.clone(),
            call_timeout: config.turn.call_timeout,
            announce_failures: config.turn.announce_failures,
            chime,
            processing_cue,
            state,
            events,
        })
    }

    /// Current turn state
    #[must_use]
    pub fn state(&self) -> TurnState {
        *self.state.borrow()
    }

    /// Watch the turn state
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<TurnState> {
        self.state.subscribe()
    }

    /// Receive turn events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TurnEvent> {
        self.events.subscribe()
    }

    /// Run turns until shutdown
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if the capture stream ends or keeps failing
    #[allow(clippy::future_not_send)]
    pub async fn run(&mut self, mut shutdown: Shutdown) -> Result<()> {
        tracing::info!(phrase = %self.wake.phrase(), "listening for wake phrase");

        let mut device_failures = 0;
        while !shutdown.is_triggered() {
            match self.run_turn(&mut shutdown).await? {
                TurnOutcome::Failed(FailureClass::Device) => {
                    device_failures += 1;
                    if device_failures >= MAX_DEVICE_FAILURES {
                        return Err(Error::Device(format!(
                            "capture failed {device_failures} times in a row"
                        )));
                    }
                }
                TurnOutcome::Cancelled => {}
                _ => device_failures = 0,
            }
        }

        self.reset();
        tracing::info!("turn controller stopped");
        Ok(())
    }

    /// Run one turn, from listening back to `Idle`
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` only if the capture stream has ended; every
    /// other failure is reported and folded into the outcome.
    #[allow(clippy::future_not_send)]
    pub async fn run_turn(&mut self, shutdown: &mut Shutdown) -> Result<TurnOutcome> {
        self.reset();

        let seq = match self.listen(shutdown).await {
            Ok(Heard::Wake(seq)) => seq,
            Ok(Heard::Shutdown) => return Ok(TurnOutcome::Cancelled),
            Ok(Heard::StreamEnded) => {
                tracing::error!("capture stream ended");
                return Err(Error::Device("capture stream ended".to_string()));
            }
            Err(e) => return Ok(self.fail(e, shutdown).await),
        };
        self.emit(TurnEvent::WakeDetected { seq });

        let outcome = match self.converse(shutdown).await {
            Ok(outcome) => outcome,
            Err(e) => self.fail(e, shutdown).await,
        };

        self.reset();
        Ok(outcome)
    }

    /// Everything after the wake event
    #[allow(clippy::future_not_send)]
    async fn converse(&mut self, shutdown: &mut Shutdown) -> Result<TurnOutcome> {
        if let Some(chime) = self.chime.clone() {
            self.play_cue(chime, shutdown).await?;
        }
        // The chime itself must not land in the utterance
        let bled = self.source.discard_pending();
        if bled > 0 {
            tracing::trace!(frames = bled, "discarded frames captured during chime");
        }

        self.set_state(TurnState::Capturing);
        let utterance = self.capture(shutdown).await?;
        if utterance.reason() == TerminationReason::Cancelled {
            return Ok(TurnOutcome::Cancelled);
        }
        self.emit(TurnEvent::UtteranceCaptured {
            duration: utterance.duration(),
            reason: utterance.reason(),
        });

        if utterance.reason() == TerminationReason::NoSpeech {
            return Ok(self.ignore("no speech"));
        }
        if utterance.duration() < self.min_utterance {
            return Ok(self.ignore("too short"));
        }

        let wav = utterance.to_wav()?;
        drop(utterance);

        let limit = self.call_timeout;

        self.set_state(TurnState::Transcribing);
        let transcript = guarded(
            self.collaborators.transcriber.transcribe(wav),
            limit,
            shutdown,
            Error::Transcription,
        )
        .await?;
        if transcript.trim().is_empty() {
            return Err(Error::Transcription(ServiceFailure::EmptyResult));
        }
        let transcript = match strip_wake_phrase(&transcript, self.wake.phrase()) {
            Some(request) => request,
            None if self.wake.matches_phrase() => transcript.trim().to_string(),
            None => {
                tracing::debug!(transcript = %transcript, "transcript lacks wake phrase");
                return Ok(self.ignore("no wake phrase"));
            }
        };
        if transcript.is_empty() {
            return Err(Error::Transcription(ServiceFailure::EmptyResult));
        }
        tracing::info!(transcript = %transcript, "heard");
        self.emit(TurnEvent::Transcript(transcript.clone()));

        if let Some(cue) = self.processing_cue.clone() {
            self.play_cue(cue, shutdown).await?;
        }

        self.set_state(TurnState::Reasoning);
        let reply = guarded(
            self.collaborators.backend.respond(&transcript, &self.session),
            limit,
            shutdown,
            Error::Backend,
        )
        .await?;
        if reply.trim().is_empty() {
            return Err(Error::Backend(ServiceFailure::EmptyResult));
        }
        self.emit(TurnEvent::Reply(reply.clone()));

        self.set_state(TurnState::Synthesizing);
        let request = guarded(
            self.collaborators.synthesizer.synthesize(&reply),
            limit,
            shutdown,
            Error::Synthesis,
        )
        .await?;

        self.set_state(TurnState::Speaking);
        let completed = self.play(request, shutdown).await?;

        tracing::info!(spoken = ?completed.duration, "turn completed");
        self.emit(TurnEvent::TurnCompleted);
        Ok(TurnOutcome::Completed)
    }

    /// Evaluate frames until a wake event
    #[allow(clippy::future_not_send)]
    async fn listen(&mut self, shutdown: &mut Shutdown) -> Result<Heard> {
        loop {
            let next = tokio::select! {
                biased;
                () = shutdown.cancelled() => return Ok(Heard::Shutdown),
                next = self.source.next_frame() => next?,
            };

            let Some(frame) = next else {
                return Ok(Heard::StreamEnded);
            };
            if self.wake.evaluate(&frame) {
                return Ok(Heard::Wake(frame.seq()));
            }
        }
    }

    /// Record one utterance; the recorder is the only frame consumer meanwhile
    #[allow(clippy::future_not_send)]
    async fn capture(&mut self, shutdown: &mut Shutdown) -> Result<Utterance> {
        let format = self.source.format();
        let recorder = if self.vad_config.start_on_wake {
            EndpointingRecorder::start_unconditionally(&self.vad_config, format)
        } else {
            EndpointingRecorder::new(&self.vad_config, format)
        };

        recorder
            .run(self.source.as_mut(), self.vad.as_mut(), shutdown)
            .await
            .map_err(|interrupted| {
                tracing::warn!(
                    partial = ?interrupted.partial.duration(),
                    "recording interrupted, discarding partial utterance"
                );
                interrupted.error
            })
    }

    async fn play(&mut self, request: PlaybackRequest, shutdown: &mut Shutdown) -> Result<Completed> {
        let playback = &mut self.collaborators.playback;
        tokio::select! {
            biased;
            () = shutdown.cancelled() => Err(Error::Cancelled),
            result = playback.play(request) => result,
        }
    }

    /// Play an acknowledgment sound; only cancellation is propagated
    async fn play_cue(&mut self, cue: PlaybackRequest, shutdown: &mut Shutdown) -> Result<()> {
        match self.play(cue, shutdown).await {
            Ok(_) => Ok(()),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                tracing::warn!(error = %e, "cue playback failed");
                Ok(())
            }
        }
    }

    fn ignore(&self, reason: &'static str) -> TurnOutcome {
        tracing::info!(reason, "utterance ignored");
        self.emit(TurnEvent::UtteranceIgnored { reason });
        TurnOutcome::Ignored(reason)
    }

    /// Report a per-turn failure; cancellation is not a fault
    #[allow(clippy::future_not_send)]
    async fn fail(&mut self, error: Error, shutdown: &mut Shutdown) -> TurnOutcome {
        let class = error.failure_class();
        if !class.is_fault() {
            tracing::debug!(state = %self.state(), "turn cancelled");
            return TurnOutcome::Cancelled;
        }

        if class == FailureClass::Device {
            tracing::error!(error = %error, state = %self.state(), "turn failed");
        } else {
            tracing::warn!(error = %error, %class, state = %self.state(), "turn failed");
        }
        self.emit(TurnEvent::Failed {
            class,
            message: error.to_string(),
        });

        let spoken = matches!(class, FailureClass::Transcription | FailureClass::Backend);
        if self.announce_failures && spoken && !shutdown.is_triggered() {
            self.announce(class, shutdown).await;
        }

        TurnOutcome::Failed(class)
    }

    /// Speak a failure notice; failures here are logged only
    async fn announce(&mut self, class: FailureClass, shutdown: &mut Shutdown) {
        let notice = class.notice();
        let synthesized = guarded(
            self.collaborators.synthesizer.synthesize(notice),
            self.call_timeout,
            shutdown,
            Error::Synthesis,
        )
        .await;

        let mut request = match synthesized {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, notice, "failed to synthesize failure notice");
                return;
            }
        };
        request.kind = PlaybackKind::Notice;

        self.set_state(TurnState::Speaking);
        if let Err(e) = self.play(request, shutdown).await {
            tracing::warn!(error = %e, notice, "failed to play failure notice");
        }
    }

    /// Return to `Idle`, dropping everything left over from the last turn
    fn reset(&mut self) {
        let stale = self.source.discard_pending();
        if stale > 0 {
            tracing::debug!(frames = stale, "discarded stale frames");
        }
        self.wake.reset();
        self.vad.reset();
        self.set_state(TurnState::Idle);
    }

    fn set_state(&self, next: TurnState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "turn state");
            self.emit(TurnEvent::StateChanged(next));
        }
    }

    fn emit(&self, event: TurnEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Bound an external call by the call timeout and shutdown
async fn guarded<T>(
    call: impl Future<Output = Result<T>>,
    limit: Duration,
    shutdown: &mut Shutdown,
    on_timeout: fn(ServiceFailure) -> Error,
) -> Result<T> {
    tokio::select! {
        biased;
        () = shutdown.cancelled() => Err(Error::Cancelled),
        result = tokio::time::timeout(limit, call) => {
            result.unwrap_or_else(|_| Err(on_timeout(ServiceFailure::Timeout)))
        }
    }
}
