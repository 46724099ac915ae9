//! Bounded rolling windows of per-frame samples.

use std::collections::VecDeque;

use crate::metrics::FrameMetrics;
use crate::types::Point;

/// Capacity of each metric window.
pub const MAX_HISTORY: usize = 15;
/// Capacity of the face position window.
pub const MAX_POSITION_HISTORY: usize = 10;

/// Fixed-capacity FIFO: pushing at capacity evicts the oldest sample.
#[derive(Debug, Clone, PartialEq)]
pub struct RollingWindow<T> {
    buf: VecDeque<T>,
    capacity: usize,
}

impl<T> RollingWindow<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `value`, returning the evicted sample if the window was full.
    pub fn push(&mut self, value: T) -> Option<T> {
        if self.capacity == 0 {
            return Some(value);
        }
        let evicted = if self.buf.len() >= self.capacity {
            self.buf.pop_front()
        } else {
            None
        };
        self.buf.push_back(value);
        evicted
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn first(&self) -> Option<&T> {
        self.buf.front()
    }

    pub fn latest(&self) -> Option<&T> {
        self.buf.back()
    }

    /// Sample `k` positions from the end: `back(1)` is the newest.
    pub fn back(&self, k: usize) -> Option<&T> {
        if k == 0 || k > self.buf.len() {
            return None;
        }
        self.buf.get(self.buf.len() - k)
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.buf.iter()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

impl RollingWindow<f32> {
    /// Population variance; 0 for an empty window.
    pub fn variance(&self) -> f32 {
        if self.buf.is_empty() {
            return 0.0;
        }
        let n = self.buf.len() as f32;
        let mean = self.buf.iter().sum::<f32>() / n;
        self.buf.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n
    }

    /// Newest minus second-newest; 0 with fewer than two samples.
    pub fn derivative(&self) -> f32 {
        match (self.back(1), self.back(2)) {
            (Some(last), Some(prev)) => last - prev,
            _ => 0.0,
        }
    }
}

/// Three metric windows evicted in lockstep.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricHistory {
    pub brightness: RollingWindow<f32>,
    pub edge_density: RollingWindow<f32>,
    pub contrast: RollingWindow<f32>,
}

impl MetricHistory {
    pub fn new() -> Self {
        Self {
            brightness: RollingWindow::new(MAX_HISTORY),
            edge_density: RollingWindow::new(MAX_HISTORY),
            contrast: RollingWindow::new(MAX_HISTORY),
        }
    }

    pub fn push(&mut self, sample: FrameMetrics) {
        self.brightness.push(sample.brightness);
        self.edge_density.push(sample.edge_density);
        self.contrast.push(sample.contrast);
    }

    pub fn len(&self) -> usize {
        self.brightness.len()
    }

    pub fn is_empty(&self) -> bool {
        self.brightness.is_empty()
    }

    pub fn clear(&mut self) {
        self.brightness.clear();
        self.edge_density.clear();
        self.contrast.clear();
    }
}

impl Default for MetricHistory {
    fn default() -> Self {
        Self::new()
    }
}

pub type PositionHistory = RollingWindow<Point>;

pub fn position_history() -> PositionHistory {
    RollingWindow::new(MAX_POSITION_HISTORY)
}
