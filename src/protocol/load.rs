//! Device-wide load detection
//!
//! Runs on every inbound initiation during the very flood it defends
//! against, so it is atomics only: a one-second arrival window with a
//! counter, and a sticky "under load until" deadline so enforcement
//! does not flap between consecutive packets.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Width of the arrival-counting window
pub const LOAD_WINDOW: Duration = Duration::from_secs(1);

/// How long the device stays under load after the threshold was last
/// crossed
pub const UNDER_LOAD_AFTER: Duration = Duration::from_secs(1);

/// Default arrivals per window before MAC2 enforcement activates
pub const DEFAULT_LOAD_THRESHOLD: u32 = 128;

/// Lock-free detector of handshake-initiation floods
pub struct LoadMonitor {
    epoch: Instant,
    threshold: u32,
    window_start_ms: AtomicU64,
    arrivals: AtomicU32,
    under_load_until_ms: AtomicU64,
}

impl LoadMonitor {
    /// Create a monitor with the default threshold
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_LOAD_THRESHOLD)
    }

    /// Create a monitor with a custom arrivals-per-window threshold
    pub fn with_threshold(threshold: u32) -> Self {
        Self {
            epoch: Instant::now(),
            threshold,
            window_start_ms: AtomicU64::new(0),
            arrivals: AtomicU32::new(0),
            under_load_until_ms: AtomicU64::new(0),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Record an inbound handshake initiation
    ///
    /// Counting across a concurrent window roll is approximate; the
    /// threshold is a shedding heuristic, not an exact quota.
    pub fn note_handshake_initiation(&self) {
        let now = self.now_ms();

        let start = self.window_start_ms.load(Ordering::Relaxed);
        if now.saturating_sub(start) >= LOAD_WINDOW.as_millis() as u64
            && self
                .window_start_ms
                .compare_exchange(start, now, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            self.arrivals.store(0, Ordering::Relaxed);
        }

        let seen = self.arrivals.fetch_add(1, Ordering::Relaxed) + 1;
        if seen > self.threshold {
            self.under_load_until_ms
                .store(now + UNDER_LOAD_AFTER.as_millis() as u64, Ordering::Relaxed);
        }
    }

    /// Whether MAC2 enforcement should be active
    pub fn is_under_load(&self) -> bool {
        self.now_ms() < self.under_load_until_ms.load(Ordering::Relaxed)
    }
}

impl Default for LoadMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_monitor_not_under_load() {
        let monitor = LoadMonitor::new();
        assert!(!monitor.is_under_load());
    }

    #[test]
    fn test_threshold_must_be_exceeded() {
        let monitor = LoadMonitor::with_threshold(4);

        for _ in 0..4 {
            monitor.note_handshake_initiation();
        }
        assert!(!monitor.is_under_load());

        monitor.note_handshake_initiation();
        assert!(monitor.is_under_load());
    }

    #[test]
    fn test_under_load_is_sticky_within_tail() {
        let monitor = LoadMonitor::with_threshold(1);

        monitor.note_handshake_initiation();
        monitor.note_handshake_initiation();

        // repeated reads inside the tail keep reporting load
        assert!(monitor.is_under_load());
        assert!(monitor.is_under_load());
    }

    #[test]
    fn test_concurrent_notes() {
        use std::sync::Arc;

        let monitor = Arc::new(LoadMonitor::with_threshold(16));
        let mut handles = Vec::new();

        for _ in 0..4 {
            let monitor = Arc::clone(&monitor);
            handles.push(std::thread::spawn(move || {
                for _ in 0..32 {
                    monitor.note_handshake_initiation();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(monitor.is_under_load());
    }
}
