//! Endpointing integration tests

mod common;

use std::time::Duration;

use beacon_voice::audio::AudioFrame;
use beacon_voice::config::VadConfig;
use beacon_voice::endpoint::{EndpointingRecorder, RecorderState, TerminationReason};
use beacon_voice::{Error, shutdown};

use common::{SILENCE, SPEECH, ScriptedSource, ScriptedVad, Step, script, test_format};

/// 200ms silence timeout, 1s ceiling, no grace, 60ms pre-roll
fn config() -> VadConfig {
    VadConfig {
        threshold: 0.5,
        silence_timeout: Duration::from_millis(200),
        max_recording: Duration::from_secs(1),
        grace: Duration::ZERO,
        start_debounce_frames: 1,
        no_speech_timeout: Duration::from_millis(400),
        pre_roll: Duration::from_millis(60),
        start_on_wake: true,
        ..VadConfig::default()
    }
}

struct Pusher {
    seq: u64,
}

impl Pusher {
    fn push_n(&mut self, rec: &mut EndpointingRecorder, probability: f32, n: usize) -> RecorderState {
        let mut state = rec.state();
        for _ in 0..n {
            let frame = AudioFrame::new(self.seq, vec![probability; 320]);
            self.seq += 1;
            state = rec.push(frame, probability);
        }
        state
    }
}

/// Deterministic speech probabilities in [0, 1)
struct Lcg(u64);

impl Lcg {
    #[allow(clippy::cast_precision_loss)]
    fn next(&mut self) -> f32 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (self.0 >> 40) as f32 / (1u64 << 24) as f32
    }
}

#[test]
fn test_short_dip_does_not_finalize() {
    let mut rec = EndpointingRecorder::start_unconditionally(&config(), test_format());
    let mut p = Pusher { seq: 0 };

    p.push_n(&mut rec, SPEECH, 10);
    assert_eq!(p.push_n(&mut rec, SILENCE, 9), RecorderState::TrailingSilence);
    assert_eq!(p.push_n(&mut rec, SPEECH, 1), RecorderState::Recording);

    // The silence count starts over after the dip
    assert_eq!(p.push_n(&mut rec, SILENCE, 9), RecorderState::TrailingSilence);
    assert_eq!(
        p.push_n(&mut rec, SILENCE, 1),
        RecorderState::Done(TerminationReason::Silence)
    );

    let utterance = rec.finish();
    assert_eq!(utterance.frames().len(), 20);
    assert_eq!(utterance.duration(), Duration::from_millis(400));
}

#[test]
fn test_silence_of_exactly_timeout_finalizes() {
    let mut rec = EndpointingRecorder::start_unconditionally(&config(), test_format());
    let mut p = Pusher { seq: 0 };

    p.push_n(&mut rec, SPEECH, 5);
    assert!(!p.push_n(&mut rec, SILENCE, 9).is_done());
    assert_eq!(
        p.push_n(&mut rec, SILENCE, 1),
        RecorderState::Done(TerminationReason::Silence)
    );
}

#[test]
fn test_duration_never_exceeds_ceiling() {
    let max_frames = 50;

    for seed in 0..32 {
        let mut rng = Lcg(seed);
        let mut rec = EndpointingRecorder::start_unconditionally(&config(), test_format());
        let mut p = Pusher { seq: 0 };

        let mut pushed = 0;
        while !rec.state().is_done() {
            p.push_n(&mut rec, rng.next(), 1);
            pushed += 1;
            assert!(pushed <= max_frames, "seed {seed} ran past the ceiling");
        }

        let utterance = rec.finish();
        assert!(utterance.duration() <= Duration::from_secs(1), "seed {seed}");
        assert!(matches!(
            utterance.reason(),
            TerminationReason::Silence | TerminationReason::MaxDuration
        ));
    }
}

#[test]
fn test_frames_after_endpoint_ignored() {
    let mut rec = EndpointingRecorder::start_unconditionally(&config(), test_format());
    let mut p = Pusher { seq: 0 };

    p.push_n(&mut rec, SPEECH, 60);
    assert_eq!(rec.state(), RecorderState::Done(TerminationReason::MaxDuration));
    assert_eq!(rec.recorded_duration(), Duration::from_secs(1));
}

#[tokio::test]
async fn test_run_flushes_pre_roll() {
    let mut source = ScriptedSource::new(script(&[(SILENCE, 5), (SPEECH, 10), (SILENCE, 10)]));
    let (_trigger, mut shutdown) = shutdown::channel();

    let utterance = EndpointingRecorder::new(&config(), test_format())
        .run(&mut source, &mut ScriptedVad, &mut shutdown)
        .await
        .unwrap();

    assert_eq!(utterance.reason(), TerminationReason::Silence);
    let seqs: Vec<u64> = utterance.frames().iter().map(AudioFrame::seq).collect();
    assert_eq!(seqs, (2..15).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_run_gives_up_without_speech() {
    let mut source = ScriptedSource::new(script(&[(SILENCE, 30)]));
    let pulls = source.pulls.clone();
    let (_trigger, mut shutdown) = shutdown::channel();

    let utterance = EndpointingRecorder::new(&config(), test_format())
        .run(&mut source, &mut ScriptedVad, &mut shutdown)
        .await
        .unwrap();

    assert_eq!(utterance.reason(), TerminationReason::NoSpeech);
    assert!(utterance.is_empty());
    assert_eq!(pulls.lock().unwrap().len(), 20);
}

#[tokio::test]
async fn test_shutdown_returns_partial() {
    let mut source = ScriptedSource::new(script(&[(SPEECH, 10)])).hold_open();
    let (trigger, mut shutdown) = shutdown::channel();

    let recorder = EndpointingRecorder::start_unconditionally(&config(), test_format());
    let mut vad = ScriptedVad;
    let (result, ()) = tokio::join!(
        recorder.run(&mut source, &mut vad, &mut shutdown),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.trigger();
        }
    );

    let utterance = result.unwrap();
    assert_eq!(utterance.reason(), TerminationReason::Cancelled);
    assert_eq!(utterance.frames().len(), 10);
}

#[tokio::test]
async fn test_device_error_interrupts_with_partial() {
    let mut steps = script(&[(SPEECH, 5)]);
    steps.push(Step::Fail("unplugged".to_string()));
    let mut source = ScriptedSource::new(steps);
    let (_trigger, mut shutdown) = shutdown::channel();

    let interrupted = EndpointingRecorder::start_unconditionally(&config(), test_format())
        .run(&mut source, &mut ScriptedVad, &mut shutdown)
        .await
        .unwrap_err();

    assert_eq!(interrupted.partial.frames().len(), 5);
    assert_eq!(interrupted.partial.reason(), TerminationReason::Cancelled);
    assert!(matches!(&interrupted.error, Error::Device(msg) if msg == "unplugged"));
    assert_eq!(
        interrupted.to_string(),
        "recording interrupted: device error: unplugged"
    );
}

#[tokio::test]
async fn test_capture_gap_interrupts_recording() {
    let mut steps = script(&[(SPEECH, 6)]);
    steps.push(Step::Skip(4));
    steps.extend(script(&[(SPEECH, 20)]));
    let mut source = ScriptedSource::new(steps);
    let (_trigger, mut shutdown) = shutdown::channel();

    let interrupted = EndpointingRecorder::start_unconditionally(&config(), test_format())
        .run(&mut source, &mut ScriptedVad, &mut shutdown)
        .await
        .unwrap_err();

    // The frame after the gap is not part of the partial utterance
    assert_eq!(interrupted.partial.frames().len(), 6);
    assert_eq!(interrupted.partial.reason(), TerminationReason::Cancelled);
    assert!(matches!(&interrupted.error, Error::Device(msg) if msg.contains("4 frames lost")));
}

#[tokio::test]
async fn test_stream_end_interrupts() {
    let mut source = ScriptedSource::new(script(&[(SPEECH, 3)]));
    let (_trigger, mut shutdown) = shutdown::channel();

    let interrupted = EndpointingRecorder::start_unconditionally(&config(), test_format())
        .run(&mut source, &mut ScriptedVad, &mut shutdown)
        .await
        .unwrap_err();

    assert_eq!(interrupted.partial.frames().len(), 3);
    assert!(matches!(interrupted.error, Error::Device(_)));
}
