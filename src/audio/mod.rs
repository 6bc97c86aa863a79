//! Audio capture, framing and playback
//!
//! Capture produces fixed-size frames through a bounded queue; playback is a
//! swappable [`PlaybackSink`]. STT and TTS live in `services`.

mod capture;
mod cue;
mod frame;
mod playback;
mod queue;

pub use capture::{DeviceInfo, FrameSource, MicrophoneSource, list_devices, samples_to_wav};
pub use cue::Cue;
pub use frame::{AudioFrame, FrameChunker, FrameFormat, rms};
pub use playback::{
    AudioEncoding, AudioPayload, Completed, CommandPlayback, CpalPlayback, PlaybackBackend,
    PlaybackKind, PlaybackRequest, PlaybackSink, open_sink,
};
pub use queue::FrameQueue;
