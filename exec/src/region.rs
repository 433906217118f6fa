//! Code buffer region allocation and LRU tracking.

use std::sync::atomic::{AtomicU64, Ordering};

/// Bump allocator over the regions of the code buffer. Guarded by
/// the engine's translate lock.
#[derive(Debug)]
pub(crate) struct RegionAlloc {
    bounds: Vec<(usize, usize)>,
    /// Region currently being filled.
    current: usize,
    /// Next free offset in the current region.
    next: usize,
    /// Whether each region holds any code.
    used: Vec<bool>,
}

impl RegionAlloc {
    pub(crate) fn new(bounds: Vec<(usize, usize)>) -> Self {
        let n = bounds.len();
        let next = bounds[0].0;
        Self {
            bounds,
            current: 0,
            next,
            used: vec![false; n],
        }
    }

    pub(crate) fn current(&self) -> usize {
        self.current
    }

    /// Free window `[start, limit)` of the current region.
    pub(crate) fn window(&self) -> (usize, usize) {
        (self.next, self.bounds[self.current].1)
    }

    pub(crate) fn is_used(&self, region: usize) -> bool {
        self.used[region]
    }

    /// Whether nothing was emitted into the current region yet.
    pub(crate) fn current_is_empty(&self) -> bool {
        !self.used[self.current]
    }

    /// Account for `size` bytes emitted at the start of the window.
    pub(crate) fn commit(&mut self, size: usize) {
        self.used[self.current] = true;
        // Keep TB starts word aligned.
        self.next = (self.next + size + 7) & !7;
        self.next = self.next.min(self.bounds[self.current].1);
    }

    /// Move to a region that holds no code, if any.
    pub(crate) fn switch_to_unused(&mut self) -> bool {
        match self.used.iter().position(|u| !u) {
            Some(r) => {
                self.reset_to(r);
                true
            }
            None => false,
        }
    }

    /// Make `region` empty and current.
    pub(crate) fn reset_to(&mut self, region: usize) {
        self.used[region] = false;
        self.current = region;
        self.next = self.bounds[region].0;
    }

    /// Forget all code.
    pub(crate) fn reset_all(&mut self) {
        self.used.fill(false);
        self.reset_to(0);
    }
}

/// Per-region last-use ticks.
#[derive(Debug)]
pub(crate) struct RegionLru {
    ticks: Box<[AtomicU64]>,
    clock: AtomicU64,
}

impl RegionLru {
    pub(crate) fn new(nb_regions: usize) -> Self {
        Self {
            ticks: (0..nb_regions).map(|_| AtomicU64::new(0)).collect(),
            clock: AtomicU64::new(0),
        }
    }

    pub(crate) fn touch(&self, region: usize) {
        let now = self.clock.fetch_add(1, Ordering::Relaxed) + 1;
        self.ticks[region].store(now, Ordering::Relaxed);
    }

    /// Least recently used region among the `eligible` ones, ties
    /// going to the lowest index.
    pub(crate) fn victim(&self, eligible: impl Fn(usize) -> bool) -> Option<usize> {
        self.ticks
            .iter()
            .enumerate()
            .filter(|(i, _)| eligible(*i))
            .min_by_key(|(i, t)| (t.load(Ordering::Relaxed), *i))
            .map(|(i, _)| i)
    }
}
