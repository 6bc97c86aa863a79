//! Bounded hand-off between the capture callback and the turn loop
//!
//! The capture callback runs on a driver thread and must never block, so a
//! full queue drops its oldest frame. The turn loop discards everything
//! pending whenever it returns to idle, so overflow while a turn is busy
//! elsewhere never reaches the endpointing recorder.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;

use super::AudioFrame;
use crate::{Error, Result};

#[derive(Debug, Default)]
struct QueueState {
    frames: VecDeque<AudioFrame>,
    dropped: u64,
    closed: bool,
    failure: Option<String>,
}

/// Single-consumer bounded frame queue with drop-oldest backpressure
#[derive(Debug)]
pub struct FrameQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

impl FrameQueue {
    /// Create a queue holding at most `capacity` frames
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    /// Enqueue a frame, evicting the oldest one if full
    ///
    /// Returns false if a frame was evicted or the queue is closed.
    pub fn push(&self, frame: AudioFrame) -> bool {
        let mut kept = true;
        if let Ok(mut state) = self.state.lock() {
            if state.closed {
                return false;
            }
            if state.frames.len() >= self.capacity {
                state.frames.pop_front();
                state.dropped += 1;
                kept = false;
                if state.dropped.is_power_of_two() {
                    tracing::warn!(dropped = state.dropped, "capture queue full, dropping oldest frames");
                }
            }
            state.frames.push_back(frame);
        }
        self.notify.notify_one();
        kept
    }

    /// Mark the stream as finished; pending frames are still delivered
    pub fn close(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
        }
        self.notify.notify_one();
    }

    /// Terminate the stream with a device error after pending frames drain
    pub fn fail(&self, reason: impl Into<String>) {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
            state.failure.get_or_insert_with(|| reason.into());
        }
        self.notify.notify_one();
    }

    /// Wait for the next frame
    ///
    /// Returns `Ok(None)` once a closed stream has drained.
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if the stream failed or no frame arrived within `timeout`
    pub async fn recv(&self, timeout: Duration) -> Result<Option<AudioFrame>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut state = self
                    .state
                    .lock()
                    .map_err(|_| Error::Device("capture queue poisoned".to_string()))?;
                if let Some(frame) = state.frames.pop_front() {
                    return Ok(Some(frame));
                }
                if let Some(reason) = &state.failure {
                    return Err(Error::Device(reason.clone()));
                }
                if state.closed {
                    return Ok(None);
                }
            }

            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return Err(Error::Device(format!(
                    "no audio frame within {}ms",
                    timeout.as_millis()
                )));
            }
        }
    }

    /// Drop every pending frame, returning how many were discarded
    pub fn clear(&self) -> usize {
        self.state.lock().map_or(0, |mut state| {
            let n = state.frames.len();
            state.frames.clear();
            n
        })
    }

    /// Number of frames currently queued
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().map_or(0, |state| state.frames.len())
    }

    /// Whether no frames are queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total frames evicted by overflow
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.state.lock().map_or(0, |state| state.dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(seq: u64) -> AudioFrame {
        AudioFrame::new(seq, vec![0.0; 4])
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let queue = FrameQueue::new(2);
        assert!(queue.push(frame(0)));
        assert!(queue.push(frame(1)));
        assert!(!queue.push(frame(2)));
        assert_eq!(queue.dropped(), 1);

        let first = tokio_test::block_on(queue.recv(Duration::from_millis(10)))
            .unwrap()
            .unwrap();
        assert_eq!(first.seq(), 1);
    }

    #[test]
    fn test_failure_after_pending_frames() {
        let queue = FrameQueue::new(4);
        queue.push(frame(0));
        queue.fail("device unplugged");

        let got = tokio_test::block_on(queue.recv(Duration::from_millis(10))).unwrap();
        assert_eq!(got.map(|f| f.seq()), Some(0));

        let err = tokio_test::block_on(queue.recv(Duration::from_millis(10))).unwrap_err();
        assert!(matches!(err, Error::Device(_)));
    }

    #[test]
    fn test_closed_stream_ends() {
        let queue = FrameQueue::new(4);
        queue.close();
        assert!(!queue.push(frame(0)));
        let got = tokio_test::block_on(queue.recv(Duration::from_millis(10))).unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_read_timeout() {
        let queue = FrameQueue::new(4);
        let err = queue.recv(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, Error::Device(_)));
    }

    #[tokio::test]
    async fn test_wakes_waiting_consumer() {
        let queue = std::sync::Arc::new(FrameQueue::new(4));
        let producer = std::sync::Arc::clone(&queue);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            producer.push(frame(7));
        });

        let got = queue.recv(Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(got.seq(), 7);
    }

    #[test]
    fn test_clear() {
        let queue = FrameQueue::new(4);
        queue.push(frame(0));
        queue.push(frame(1));
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
    }
}
