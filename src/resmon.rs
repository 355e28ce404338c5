//! Resource monitor
//!
//! Feature-gated under the `resource-monitor` feature.
//! Keeps current and peak values of the resources the memory manager takes
//! from the operating system, and remembers which ones changed since they were
//! last reported.

use std::sync::atomic::{AtomicBool, AtomicIsize, Ordering};

/// Monitored resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    /// Bytes of chunks held from the operating system.
    SystemMemoryAllocation = 0,
    /// Number of chunks held from the operating system.
    ChunkCount = 1,
}

impl Counter {
    pub const ALL: [Counter; COUNTERS] = [Counter::SystemMemoryAllocation, Counter::ChunkCount];
}

const COUNTERS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reading {
    Current,
    Peak,
}

#[derive(Debug, Default)]
pub struct ResourceMonitor {
    current: [AtomicIsize; COUNTERS],
    peak: [AtomicIsize; COUNTERS],
    changed: [AtomicBool; COUNTERS],
}

impl ResourceMonitor {
    pub const fn new() -> Self {
        Self {
            current: [const { AtomicIsize::new(0) }; COUNTERS],
            peak: [const { AtomicIsize::new(0) }; COUNTERS],
            changed: [const { AtomicBool::new(false) }; COUNTERS],
        }
    }

    /// Adds `delta` to `counter`, raising its peak if needed.
    pub fn update(&self, counter: Counter, delta: isize) {
        let ix = counter as usize;
        let value = self.current[ix].fetch_add(delta, Ordering::Relaxed) + delta;

        self.peak[ix].fetch_max(value, Ordering::Relaxed);
        self.changed[ix].store(true, Ordering::Release);
    }

    pub fn value(&self, counter: Counter, reading: Reading) -> isize {
        let ix = counter as usize;
        match reading {
            Reading::Current => self.current[ix].load(Ordering::Relaxed),
            Reading::Peak => self.peak[ix].load(Ordering::Relaxed),
        }
    }

    /// Returns the first counter changed since the last call and clears its
    /// flag.
    pub fn take_change(&self) -> Option<Counter> {
        Counter::ALL
            .into_iter()
            .find(|&counter| self.changed[counter as usize].swap(false, Ordering::AcqRel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_current_and_peak() {
        let monitor = ResourceMonitor::new();

        monitor.update(Counter::SystemMemoryAllocation, 4096);
        monitor.update(Counter::SystemMemoryAllocation, 4096);
        monitor.update(Counter::SystemMemoryAllocation, -8192);

        assert_eq!(monitor.value(Counter::SystemMemoryAllocation, Reading::Current), 0);
        assert_eq!(monitor.value(Counter::SystemMemoryAllocation, Reading::Peak), 8192);
        assert_eq!(monitor.value(Counter::ChunkCount, Reading::Peak), 0);
    }

    #[test]
    fn changes_are_reported_once() {
        let monitor = ResourceMonitor::new();
        assert_eq!(monitor.take_change(), None);

        monitor.update(Counter::ChunkCount, 1);
        monitor.update(Counter::SystemMemoryAllocation, 100);

        assert_eq!(monitor.take_change(), Some(Counter::SystemMemoryAllocation));
        assert_eq!(monitor.take_change(), Some(Counter::ChunkCount));
        assert_eq!(monitor.take_change(), None);
    }
}
