//! Bounded hand-off queue between the decoder thread and the output callback.
//!
//! Samples are interleaved `f32`. The producer blocks when the queue is full; the
//! output callback only ever takes what is already buffered. Closing the queue
//! (normally or with a failure) wakes every waiter.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Thread-safe bounded queue of interleaved audio samples.
pub struct SampleQueue {
    channels: usize,
    capacity_samples: usize,
    inner: Mutex<QueueInner>,
    changed: Condvar,
}

struct QueueInner {
    samples: VecDeque<f32>,
    closed: bool,
    failure: Option<String>,
}

/// Queue capacity in samples for `seconds` of audio at `(rate_hz, channels)`.
///
/// Non-finite or non-positive durations fall back to two seconds.
pub fn capacity_for(rate_hz: u32, channels: usize, seconds: f32) -> usize {
    let seconds = if seconds.is_finite() && seconds > 0.0 {
        seconds
    } else {
        2.0
    };
    let frames = (rate_hz as f32 * seconds).ceil() as usize;
    frames.max(1).saturating_mul(channels.max(1))
}

impl SampleQueue {
    pub fn new(channels: usize, capacity_samples: usize) -> Self {
        let channels = channels.max(1);
        Self {
            channels,
            capacity_samples: capacity_samples.max(channels),
            inner: Mutex::new(QueueInner {
                samples: VecDeque::with_capacity(capacity_samples),
                closed: false,
                failure: None,
            }),
            changed: Condvar::new(),
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append samples, blocking while the queue is full.
    ///
    /// Returns `false` if the queue was closed before every sample was accepted.
    pub fn push_blocking(&self, samples: &[f32]) -> bool {
        let mut rest = samples;
        while !rest.is_empty() {
            let mut g = self.lock();
            while g.samples.len() >= self.capacity_samples && !g.closed {
                g = self
                    .changed
                    .wait(g)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
            if g.closed {
                return false;
            }
            let room = self.capacity_samples - g.samples.len();
            let take = room.min(rest.len());
            g.samples.extend(&rest[..take]);
            rest = &rest[take..];
            drop(g);
            self.changed.notify_all();
        }
        true
    }

    /// Take up to `max_frames` whole frames without blocking.
    ///
    /// Returns `None` when nothing is buffered.
    pub fn pop_available(&self, max_frames: usize) -> Option<Vec<f32>> {
        let mut g = self.lock();
        let frames = (g.samples.len() / self.channels).min(max_frames.max(1));
        if frames == 0 {
            return None;
        }
        let out: Vec<f32> = g.samples.drain(..frames * self.channels).collect();
        drop(g);
        self.changed.notify_all();
        Some(out)
    }

    /// Mark the stream as complete. Buffered samples remain poppable.
    pub fn close(&self) {
        self.lock().closed = true;
        self.changed.notify_all();
    }

    /// Close the queue and record why the producer gave up.
    ///
    /// Only the first failure is kept.
    pub fn fail(&self, message: impl Into<String>) {
        let mut g = self.lock();
        g.closed = true;
        if g.failure.is_none() {
            g.failure = Some(message.into());
        }
        drop(g);
        self.changed.notify_all();
    }

    /// Close the queue and drop everything buffered.
    pub fn abort(&self) {
        let mut g = self.lock();
        g.closed = true;
        g.samples.clear();
        drop(g);
        self.changed.notify_all();
    }

    pub fn failure(&self) -> Option<String> {
        self.lock().failure.clone()
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Closed and fully consumed.
    #[cfg(test)]
    pub fn is_drained(&self) -> bool {
        let g = self.lock();
        g.closed && g.samples.is_empty()
    }

    /// Block until the queue drains or `cancel` is raised.
    ///
    /// Returns `true` when the queue drained on its own.
    pub fn wait_drained_or_cancel(&self, cancel: &AtomicBool) -> bool {
        let mut g = self.lock();
        loop {
            if cancel.load(Ordering::Relaxed) {
                return false;
            }
            if g.closed && g.samples.is_empty() {
                return true;
            }
            g = self
                .changed
                .wait_timeout(g, DRAIN_POLL)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn capacity_for_uses_fallback_for_bad_durations() {
        assert_eq!(capacity_for(44_100, 2, 1.0), 88_200);
        assert_eq!(capacity_for(44_100, 2, 0.0), 176_400);
        assert_eq!(capacity_for(44_100, 2, f32::NAN), 176_400);
    }

    #[test]
    fn pop_available_returns_whole_frames_only() {
        let q = SampleQueue::new(2, 16);
        assert!(q.push_blocking(&[0.1, 0.2, 0.3, 0.4, 0.5]));
        let out = q.pop_available(8).unwrap();
        assert_eq!(out, vec![0.1, 0.2, 0.3, 0.4]);
        assert!(q.pop_available(8).is_none());
    }

    #[test]
    fn push_after_close_is_rejected() {
        let q = SampleQueue::new(1, 4);
        q.close();
        assert!(!q.push_blocking(&[1.0]));
    }

    #[test]
    fn blocked_producer_wakes_on_abort() {
        let q = Arc::new(SampleQueue::new(1, 2));
        let producer = {
            let q = q.clone();
            std::thread::spawn(move || q.push_blocking(&[1.0, 2.0, 3.0, 4.0]))
        };
        std::thread::sleep(Duration::from_millis(20));
        q.abort();
        assert!(!producer.join().unwrap());
        assert!(q.is_drained());
    }

    #[test]
    fn fail_keeps_first_message() {
        let q = SampleQueue::new(2, 8);
        q.fail("first");
        q.fail("second");
        assert_eq!(q.failure().as_deref(), Some("first"));
        assert!(q.is_closed());
    }

    #[test]
    fn wait_drained_or_cancel_reports_cancel() {
        let q = SampleQueue::new(1, 4);
        assert!(q.push_blocking(&[1.0]));
        let cancel = AtomicBool::new(true);
        assert!(!q.wait_drained_or_cancel(&cancel));

        cancel.store(false, Ordering::Relaxed);
        q.close();
        let _ = q.pop_available(4);
        assert!(q.wait_drained_or_cancel(&cancel));
    }
}
