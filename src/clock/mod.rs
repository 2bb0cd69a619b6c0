//! Clock alignment between a peer's monotonic clock and the session timeline.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Milliseconds on the shared logical timeline.
pub type LogicalMs = i64;

/// Source of local monotonic time in milliseconds.
pub trait MonotonicClock: Send + Sync {
    fn now_ms(&self) -> LogicalMs;
}

/// Monotonic clock anchored to the wall clock at construction.
///
/// Readings are epoch-millisecond scaled but never go backwards, because
/// everything after the anchor is measured with `Instant`.
pub struct SystemClock {
    anchor_epoch_ms: LogicalMs,
    anchor: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            anchor_epoch_ms: chrono::Utc::now().timestamp_millis(),
            anchor: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock for SystemClock {
    fn now_ms(&self) -> LogicalMs {
        self.anchor_epoch_ms + self.anchor.elapsed().as_millis() as LogicalMs
    }
}

/// Hand-driven clock for tests and simulations.
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_ms: LogicalMs) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start_ms)),
        }
    }

    pub fn set(&self, ms: LogicalMs) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: LogicalMs) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl MonotonicClock for ManualClock {
    fn now_ms(&self) -> LogicalMs {
        self.now.load(Ordering::SeqCst)
    }
}

/// Maps local monotonic time onto the logical timeline with a single offset.
#[derive(Clone)]
pub struct ClockAligner {
    clock: Arc<dyn MonotonicClock>,
    offset: LogicalMs,
}

impl ClockAligner {
    pub fn new(clock: Arc<dyn MonotonicClock>) -> Self {
        Self { clock, offset: 0 }
    }

    /// Fix the offset so that `now()` reads `reference` at this instant.
    ///
    /// Without a reference the local clock is used as-is. Only called when a
    /// recording starts; the offset stays put for the rest of the session.
    pub fn align(&mut self, reference: Option<LogicalMs>) {
        self.offset = match reference {
            Some(reference) => self.clock.now_ms().saturating_sub(reference),
            None => 0,
        };
    }

    pub fn now(&self) -> LogicalMs {
        self.clock.now_ms().saturating_sub(self.offset)
    }

    pub fn offset(&self) -> LogicalMs {
        self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_with_reference_maps_now_to_reference() {
        let clock = ManualClock::new(50_000);
        let mut aligner = ClockAligner::new(Arc::new(clock.clone()));

        aligner.align(Some(1_000));
        assert_eq!(aligner.offset(), 49_000);
        assert_eq!(aligner.now(), 1_000);

        clock.advance(250);
        assert_eq!(aligner.now(), 1_250);
    }

    #[test]
    fn test_align_without_reference_uses_local_time() {
        let clock = ManualClock::new(7_000);
        let mut aligner = ClockAligner::new(Arc::new(clock.clone()));

        aligner.align(Some(1_000));
        aligner.align(None);
        assert_eq!(aligner.offset(), 0);
        assert_eq!(aligner.now(), 7_000);
    }

    #[test]
    fn test_offset_does_not_drift_between_alignments() {
        let clock = ManualClock::new(10_000);
        let mut aligner = ClockAligner::new(Arc::new(clock.clone()));
        aligner.align(Some(0));

        for _ in 0..10 {
            clock.advance(100);
        }
        assert_eq!(aligner.offset(), 10_000);
        assert_eq!(aligner.now(), 1_000);
    }

    #[test]
    fn test_extreme_reference_saturates() {
        let clock = ManualClock::new(5_000);
        let mut aligner = ClockAligner::new(Arc::new(clock.clone()));

        aligner.align(Some(LogicalMs::MIN));
        assert_eq!(aligner.offset(), LogicalMs::MAX);
        assert_eq!(aligner.now(), 5_000 - LogicalMs::MAX);

        aligner.align(Some(LogicalMs::MAX));
        clock.advance(1);
        assert_eq!(aligner.now(), LogicalMs::MAX);
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
        assert!(a > 1_600_000_000_000);
    }
}
