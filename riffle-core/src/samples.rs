//! Decoded-PCM sample FIFO shared with the audio output side.
//!
//! Single producer (the demuxer / seek engine on the caller's thread),
//! single consumer (a mixer pulling at its own rate). The producer never
//! assumes the queue is empty or full at any particular call.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

pub struct SampleQueue {
    samples: Mutex<VecDeque<i16>>,
    pushed: AtomicU64,
    popped: AtomicU64,
}

impl SampleQueue {
    pub fn new() -> Self {
        Self {
            samples: Mutex::new(VecDeque::new()),
            pushed: AtomicU64::new(0),
            popped: AtomicU64::new(0),
        }
    }

    /// Append decoded samples (producer side).
    pub fn push_samples(&self, samples: &[i16]) {
        let mut queue = self.samples.lock();
        queue.extend(samples.iter().copied());
        self.pushed.fetch_add(samples.len() as u64, Ordering::Relaxed);
    }

    /// Pull up to `out.len()` samples (consumer side). Returns how many were
    /// written; the rest of `out` is untouched.
    pub fn read_buffer(&self, out: &mut [i16]) -> usize {
        let mut queue = self.samples.lock();
        let count = out.len().min(queue.len());
        for (slot, sample) in out.iter_mut().zip(queue.drain(..count)) {
            *slot = sample;
        }
        self.popped.fetch_add(count as u64, Ordering::Relaxed);
        count
    }

    /// Discard `n` samples from the head without playing them. Returns how
    /// many were actually discarded.
    pub fn skip(&self, n: u64) -> u64 {
        let mut queue = self.samples.lock();
        let count = (n as usize).min(queue.len());
        queue.drain(..count);
        self.popped.fetch_add(count as u64, Ordering::Relaxed);
        count as u64
    }

    pub fn clear(&self) {
        let mut queue = self.samples.lock();
        let count = queue.len();
        queue.clear();
        self.popped.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    /// Lifetime count of samples ever pushed.
    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    /// Lifetime count of samples consumed (read, skipped or cleared).
    pub fn popped(&self) -> u64 {
        self.popped.load(Ordering::Relaxed)
    }
}

impl Default for SampleQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_then_read() {
        let queue = SampleQueue::new();
        queue.push_samples(&[1, 2, 3, 4]);

        let mut out = [0i16; 3];
        assert_eq!(queue.read_buffer(&mut out), 3);
        assert_eq!(out, [1, 2, 3]);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_read_from_empty_queue() {
        let queue = SampleQueue::new();
        let mut out = [7i16; 4];
        assert_eq!(queue.read_buffer(&mut out), 0);
        assert_eq!(out, [7; 4]); // untouched
    }

    #[test]
    fn test_skip_clamps_to_queue_length() {
        let queue = SampleQueue::new();
        queue.push_samples(&[10, 20, 30]);
        assert_eq!(queue.skip(2), 2);

        let mut out = [0i16; 1];
        queue.read_buffer(&mut out);
        assert_eq!(out[0], 30);

        assert_eq!(queue.skip(100), 0);
    }

    #[test]
    fn test_counters() {
        let queue = SampleQueue::new();
        queue.push_samples(&[0; 8]);
        queue.skip(3);
        let mut out = [0i16; 2];
        queue.read_buffer(&mut out);
        queue.clear();

        assert_eq!(queue.pushed(), 8);
        assert_eq!(queue.popped(), 8);
        assert!(queue.is_empty());
    }
}
