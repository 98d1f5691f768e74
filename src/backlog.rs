use crate::sample::Sample;
use crate::statistics::{Statistics, StatisticsEngine};
use std::cell::OnceCell;
use std::collections::VecDeque;

/// Bounded, oldest-first sequence of samples with a lazily computed
/// statistics cache.
///
/// Every mutation drops the cache; the next [`Backlog::statistics`] call
/// recomputes it from scratch. The live sequence is never handed out.
#[derive(Debug, Default)]
pub struct Backlog {
    /// 0 = unbounded
    capacity: usize,
    items: VecDeque<Sample>,
    stats: OnceCell<Statistics>,
}

impl Backlog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity.min(1024)),
            stats: OnceCell::new(),
        }
    }

    /// Rebuild a backlog from a persisted sequence, keeping the newest
    /// `capacity` samples.
    pub fn from_samples(capacity: usize, samples: Vec<Sample>) -> Self {
        let mut backlog = Self {
            capacity,
            items: VecDeque::from(samples),
            stats: OnceCell::new(),
        };
        backlog.enforce_capacity();
        backlog
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change the capacity, evicting oldest samples if it shrank below the
    /// current length.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.enforce_capacity();
    }

    /// Append the newest sample, evicting the oldest one first when full.
    pub fn append(&mut self, sample: Sample) {
        if self.capacity > 0 && self.items.len() >= self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(sample);
        self.invalidate();
    }

    /// Remove the oldest sample. No-op on an empty backlog.
    pub fn evict_oldest(&mut self) {
        self.items.pop_front();
        self.invalidate();
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.invalidate();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn first(&self) -> Option<Sample> {
        self.items.front().copied()
    }

    pub fn last(&self) -> Option<Sample> {
        self.items.back().copied()
    }

    /// Cached statistics over the current content
    pub fn statistics(&self) -> &Statistics {
        self.stats.get_or_init(|| StatisticsEngine::compute(&self.items))
    }

    /// Copy of the current content, oldest first
    pub fn snapshot(&self) -> Vec<Sample> {
        self.items.iter().copied().collect()
    }

    fn enforce_capacity(&mut self) {
        if self.capacity == 0 || self.items.len() <= self.capacity {
            return;
        }
        let excess = self.items.len() - self.capacity;
        self.items.drain(..excess);
        self.invalidate();
    }

    fn invalidate(&mut self) {
        self.stats.take();
    }
}
