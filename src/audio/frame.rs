//! Fixed-size PCM frames

use std::sync::Arc;
use std::time::Duration;

/// Sample rate and frame size shared by every frame of a capture stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    /// Samples per second (mono)
    pub sample_rate: u32,
    /// Samples in one frame
    pub samples_per_frame: usize,
}

impl FrameFormat {
    /// Create a format from an explicit frame size
    #[must_use]
    pub const fn new(sample_rate: u32, samples_per_frame: usize) -> Self {
        Self {
            sample_rate,
            samples_per_frame,
        }
    }

    /// Create a format from a frame length in milliseconds
    #[must_use]
    pub fn from_millis(sample_rate: u32, frame_ms: u32) -> Self {
        let samples = u64::from(sample_rate) * u64::from(frame_ms) / 1000;
        Self::new(sample_rate, usize::try_from(samples).unwrap_or(usize::MAX))
    }

    /// Duration of one frame
    #[must_use]
    pub fn frame_duration(&self) -> Duration {
        self.duration_of(1)
    }

    /// Duration of `frames` frames, by sample count rather than wall clock
    #[must_use]
    pub fn duration_of(&self, frames: usize) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let samples = (frames as u128) * (self.samples_per_frame as u128);
        let nanos = samples * 1_000_000_000 / u128::from(self.sample_rate);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Smallest number of frames whose total duration reaches `duration`
    #[must_use]
    pub fn frames_reaching(&self, duration: Duration) -> usize {
        let needed = self.samples_in(duration);
        let per = self.samples_per_frame.max(1) as u128;
        usize::try_from(needed.div_ceil(per)).unwrap_or(usize::MAX)
    }

    /// Largest number of frames whose total duration stays within `duration`
    #[must_use]
    pub fn frames_within(&self, duration: Duration) -> usize {
        let allowed = self.samples_in(duration);
        let per = self.samples_per_frame.max(1) as u128;
        usize::try_from(allowed / per).unwrap_or(usize::MAX)
    }

    /// Samples covering `duration`, rounded to the nearest sample
    fn samples_in(&self, duration: Duration) -> u128 {
        let scaled = duration.as_nanos() * u128::from(self.sample_rate);
        (scaled + 500_000_000) / 1_000_000_000
    }
}

/// A fixed-duration slice of mono PCM samples
///
/// Immutable once produced. Cloning shares the sample buffer.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    seq: u64,
    samples: Arc<[f32]>,
}

impl AudioFrame {
    /// Create a frame with its position in the capture stream
    #[must_use]
    pub fn new(seq: u64, samples: Vec<f32>) -> Self {
        Self {
            seq,
            samples: samples.into(),
        }
    }

    /// Monotonically increasing sequence index
    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }

    /// Raw samples in [-1.0, 1.0]
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// RMS energy of the frame
    #[must_use]
    pub fn rms(&self) -> f32 {
        rms(&self.samples)
    }
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Cuts an arbitrary-length sample stream into sequenced frames
///
/// Used inside the capture callback, where the driver hands over
/// buffers of whatever size it likes.
#[derive(Debug)]
pub struct FrameChunker {
    format: FrameFormat,
    channels: usize,
    pending: Vec<f32>,
    next_seq: u64,
}

impl FrameChunker {
    /// Create a chunker for interleaved input with `channels` channels
    #[must_use]
    pub fn new(format: FrameFormat, channels: usize) -> Self {
        Self {
            format,
            channels: channels.max(1),
            pending: Vec::with_capacity(format.samples_per_frame * 2),
            next_seq: 0,
        }
    }

    /// Feed interleaved samples, calling `emit` for every completed frame
    pub fn push(&mut self, interleaved: &[f32], mut emit: impl FnMut(AudioFrame)) {
        if self.channels == 1 {
            self.pending.extend_from_slice(interleaved);
        } else {
            #[allow(clippy::cast_precision_loss)]
            let scale = 1.0 / self.channels as f32;
            self.pending.extend(
                interleaved
                    .chunks(self.channels)
                    .map(|frame| frame.iter().sum::<f32>() * scale),
            );
        }

        let size = self.format.samples_per_frame;
        if size == 0 {
            return;
        }
        while self.pending.len() >= size {
            let rest = self.pending.split_off(size);
            let samples = std::mem::replace(&mut self.pending, rest);
            emit(AudioFrame::new(self.next_seq, samples));
            self.next_seq += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_durations() {
        let format = FrameFormat::from_millis(16000, 20);
        assert_eq!(format.samples_per_frame, 320);
        assert_eq!(format.frame_duration(), Duration::from_millis(20));
        assert_eq!(format.duration_of(150), Duration::from_secs(3));
    }

    #[test]
    fn test_frame_counts_round_in_the_right_direction() {
        // 32ms frames: 1.5s is 46.875 frames
        let format = FrameFormat::from_millis(16000, 32);
        assert_eq!(format.frames_reaching(Duration::from_millis(1500)), 47);
        assert_eq!(format.frames_within(Duration::from_millis(1500)), 46);

        let exact = FrameFormat::from_millis(16000, 20);
        assert_eq!(exact.frames_reaching(Duration::from_secs(2)), 100);
        assert_eq!(exact.frames_within(Duration::from_secs(2)), 100);
    }

    #[test]
    fn test_chunker_sequences_frames() {
        let mut chunker = FrameChunker::new(FrameFormat::new(16000, 4), 1);
        let mut frames = Vec::new();

        chunker.push(&[0.1; 6], |f| frames.push(f));
        assert_eq!(frames.len(), 1);

        chunker.push(&[0.2; 6], |f| frames.push(f));
        assert_eq!(frames.len(), 3);
        assert_eq!(
            frames.iter().map(AudioFrame::seq).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(frames[1].samples(), &[0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn test_chunker_downmixes_stereo() {
        let mut chunker = FrameChunker::new(FrameFormat::new(16000, 2), 2);
        let mut frames = Vec::new();

        chunker.push(&[1.0, 0.0, 0.5, 0.5], |f| frames.push(f));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].samples(), &[0.5, 0.5]);
    }

    #[test]
    fn test_energy_calculation() {
        let silence = AudioFrame::new(0, vec![0.0; 100]);
        assert!(silence.rms() < 0.001);

        let loud = AudioFrame::new(1, vec![0.5; 100]);
        assert!(loud.rms() > 0.4);
    }
}
