//! Amortized check scheduling.
//!
//! Spreads "check one file" work evenly across the checking interval instead
//! of bursting all checks at once: with N watched paths and an interval of I
//! seconds, one path becomes due every I/N seconds of accumulated tick time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// How many single-path checks a tick owes, and the time slice each consumes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TickPlan {
    pub due: usize,
    pub slice: f64,
}

/// Accumulated tick time plus the round-robin cursor over the combined
/// [modules..., resources...] sequence.
#[derive(Debug, Clone)]
pub(crate) struct CheckState {
    time: f64,
    cursor: usize,
    interval: f64,
}

impl CheckState {
    pub fn new(interval: f64) -> Self {
        Self {
            time: 0.0,
            cursor: 0,
            interval,
        }
    }

    pub fn interval(&self) -> f64 {
        self.interval
    }

    /// Interval validity is the store's concern; the state just holds it.
    pub fn set_interval(&mut self, interval: f64) {
        self.interval = interval;
    }

    /// Zero the accumulated time and the cursor.
    pub fn reset(&mut self) {
        self.time = 0.0;
        self.cursor = 0;
    }

    /// Accumulate `delta` seconds and compute how many checks are due.
    ///
    /// Due checks are capped at `count`: after a long pause every path is
    /// checked once and the backlog is dropped rather than replayed.
    pub fn plan(&mut self, delta: f64, count: usize) -> TickPlan {
        if count == 0 {
            return TickPlan { due: 0, slice: 0.0 };
        }
        self.time += delta;
        let slice = self.interval / count as f64;
        let due = ((self.time / slice).floor() as usize).min(count);
        TickPlan { due, slice }
    }

    /// Consume one due check: yields the entry index and advances the cursor.
    pub fn next_index(&mut self, slice: f64, count: usize) -> usize {
        let index = self.cursor % count;
        self.cursor = (index + 1) % count;
        self.time -= slice;
        index
    }

    /// Called after an un-aborted tick; a full pass zeroes the residue so a
    /// runaway backlog cannot build up.
    pub fn finish(&mut self, plan: TickPlan, count: usize) {
        if plan.due == count {
            self.time = 0.0;
        }
    }
}

/// Cooperative cancellation flag for the in-progress tick.
///
/// Cheap to clone; loaders receive one through
/// [`LoadContext`](crate::loader::LoadContext) and may request a reset while
/// the scheduler is mid-tick. The store consults the flag after every
/// single-path check, abandons the remaining checks, and zeroes the cursor,
/// so a loader that mutated the watched set never races a stale cursor.
#[derive(Debug, Clone, Default)]
pub struct ResetHandle(Arc<AtomicBool>);

impl ResetHandle {
    /// Request that the scheduler abort and reset at its next check boundary.
    pub fn request(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Consume the request, returning whether one was pending.
    pub(crate) fn take(&self) -> bool {
        self.0.swap(false, Ordering::Relaxed)
    }
}
