//! Sample averaging.

use std::collections::VecDeque;

/// Fixed-capacity window of recent samples with a readiness threshold.
///
/// The oldest sample is evicted when a new one arrives at capacity. The mean
/// is only reported once at least `minimum_samples` values are held.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    /// Buffer of recent values
    buffer: VecDeque<u32>,
    /// Window size in samples
    capacity: usize,
    /// Samples required before an average is reported
    minimum_samples: usize,
    /// Running sum for efficient calculation
    sum: u64,
}

impl SampleBuffer {
    /// Create a buffer. Capacity is at least one sample.
    pub fn new(capacity: usize, minimum_samples: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
            minimum_samples: minimum_samples.clamp(1, capacity),
            sum: 0,
        }
    }

    /// Add a new value and return the average if the buffer is ready.
    pub fn push(&mut self, value: u32) -> Option<u32> {
        if self.buffer.len() == self.capacity {
            if let Some(old) = self.buffer.pop_front() {
                self.sum -= old as u64;
            }
        }
        self.buffer.push_back(value);
        self.sum += value as u64;

        self.average()
    }

    /// Truncating integer mean, or `None` below the readiness threshold.
    pub fn average(&self) -> Option<u32> {
        if self.is_ready() {
            Some((self.sum / self.buffer.len() as u64) as u32)
        } else {
            None
        }
    }

    pub fn is_ready(&self) -> bool {
        self.buffer.len() >= self.minimum_samples
    }

    /// Reset the window.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.sum = 0;
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
