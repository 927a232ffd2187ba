//! Frame clock: a monotonically increasing frame counter readable
//! lock-free via a two-guard-word sequence lock.
//!
//! Writer: bump `guard1` (now odd), write the fields, bump `guard2` (now
//! even, equal to `guard1`). Reader: read `guard2`, read the fields, read
//! `guard1`, and accept the read only if `guard1 == guard2` and both are
//! even. A plain increment without a fence is not sufficient on relaxed
//! memory architectures — every guard bump is `Release` and every guard
//! read is `Acquire`.

use std::sync::atomic::{AtomicU64, Ordering};

/// A consistent snapshot of the engine's transport time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSnapshot {
    pub frame: u64,
    pub usecs: u64,
    pub frame_rate: u32,
}

pub struct FrameClock {
    guard1: AtomicU64,
    frame: AtomicU64,
    usecs: AtomicU64,
    frame_rate: AtomicU64,
    guard2: AtomicU64,
}

impl FrameClock {
    pub fn new(frame_rate: u32) -> Self {
        FrameClock {
            guard1: AtomicU64::new(0),
            frame: AtomicU64::new(0),
            usecs: AtomicU64::new(0),
            frame_rate: AtomicU64::new(frame_rate as u64),
            guard2: AtomicU64::new(0),
        }
    }

    /// Advance the frame counter by `nframes`. Only the cycle executor
    /// calls this, so no synchronization among writers is needed — only
    /// between this single writer and concurrent readers.
    pub fn advance(&self, nframes: u32, usecs_now: u64) {
        let next_frame = self.frame.load(Ordering::Relaxed) + nframes as u64;
        self.guard1.fetch_add(1, Ordering::Release);
        self.frame.store(next_frame, Ordering::Relaxed);
        self.usecs.store(usecs_now, Ordering::Relaxed);
        self.guard2.store(
            self.guard1.load(Ordering::Relaxed),
            Ordering::Release,
        );
    }

    /// Lock-free read of a consistent `(frame, usecs, frame_rate)` triple.
    /// Retries until it observes a settled (even) pair of equal guards.
    pub fn read(&self) -> TimeSnapshot {
        loop {
            let g2 = self.guard2.load(Ordering::Acquire);
            let frame = self.frame.load(Ordering::Relaxed);
            let usecs = self.usecs.load(Ordering::Relaxed);
            let frame_rate = self.frame_rate.load(Ordering::Relaxed);
            let g1 = self.guard1.load(Ordering::Acquire);
            if g1 == g2 && g1 % 2 == 0 {
                return TimeSnapshot {
                    frame,
                    usecs,
                    frame_rate: frame_rate as u32,
                };
            }
            std::hint::spin_loop();
        }
    }

    pub fn set_frame_rate(&self, frame_rate: u32) {
        self.guard1.fetch_add(1, Ordering::Release);
        self.frame_rate.store(frame_rate as u64, Ordering::Relaxed);
        self.guard2.store(
            self.guard1.load(Ordering::Relaxed),
            Ordering::Release,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_after_advance_is_consistent() {
        let clock = FrameClock::new(48_000);
        clock.advance(256, 1_000);
        let snap = clock.read();
        assert_eq!(snap.frame, 256);
        assert_eq!(snap.usecs, 1_000);
        assert_eq!(snap.frame_rate, 48_000);
    }

    #[test]
    fn frame_is_monotonic_across_cycles() {
        let clock = FrameClock::new(48_000);
        let mut last = 0;
        for i in 1..=10u64 {
            clock.advance(256, i * 1_000);
            let snap = clock.read();
            assert!(snap.frame >= last);
            last = snap.frame;
        }
        assert_eq!(last, 2560);
    }
}
