//! Driver Adapter: owns the hardware driver handle and routes per-cycle
//! callbacks into the Cycle Executor. The driver itself is out of scope
//! (spec §1) — this module only defines the trait boundary plus the
//! restart/rolling-average bookkeeping that sits on the engine side of it.

use std::time::Duration;

use crate::config::EngineConfig;

/// Outcome of a single `wait()` on the driver.
pub struct WaitResult {
    pub nframes: u32,
    pub status: i32,
    pub delayed_usecs: u64,
}

/// The hardware I/O driver interface. Implementations live outside this
/// crate in production; [`crate::driver::null::NullDriver`] is the
/// deterministic test double used by the end-to-end suite.
pub trait Driver: Send {
    fn attach(&mut self) -> std::io::Result<()>;
    fn detach(&mut self);
    fn start(&mut self) -> std::io::Result<()>;
    fn stop(&mut self) -> std::io::Result<()>;
    fn read(&mut self, nframes: u32) -> std::io::Result<()>;
    fn write(&mut self, nframes: u32) -> std::io::Result<()>;
    /// `nframes == 0` signals a driver-internal restart (the adapter
    /// broadcasts an XRun and continues); `status < 0` is fatal.
    fn wait(&mut self) -> WaitResult;
    fn null_cycle(&mut self, nframes: u32);
    fn period_usecs(&self) -> u64;
}

/// Owns one [`Driver`] and the rolling-average / restart bookkeeping that
/// sits on top of it.
pub struct DriverAdapter<D: Driver> {
    driver: D,
    rolling_interval: u32,
}

impl<D: Driver> DriverAdapter<D> {
    pub fn new(mut driver: D, cfg: &EngineConfig) -> std::io::Result<Self> {
        driver.attach()?;
        let period_usecs = driver.period_usecs().max(1);
        let rolling_interval = ((cfg.rolling_interval_ms as u64 * 1000) / period_usecs) as u32;
        Ok(DriverAdapter {
            driver,
            rolling_interval: rolling_interval.max(1),
        })
    }

    pub fn rolling_interval(&self) -> u32 {
        self.rolling_interval
    }

    pub fn period_usecs(&self) -> u64 {
        self.driver.period_usecs()
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn wait(&mut self) -> WaitResult {
        self.driver.wait()
    }

    pub fn period(&self) -> Duration {
        Duration::from_micros(self.period_usecs())
    }
}

/// A minimal always-on backend: sleeps out the period in real time and
/// never fails. Stands in for a real hardware backend the same way
/// jackd's own "dummy" driver does — not a test double, just the
/// simplest possible implementation of the trait, usable as `enginedc`'s
/// default when no real backend is wired in.
pub mod dummy {
    use super::*;

    pub struct DummyDriver {
        period_frames: u32,
        sample_rate: u32,
    }

    impl DummyDriver {
        pub fn new(period_frames: u32, sample_rate: u32) -> Self {
            DummyDriver {
                period_frames,
                sample_rate,
            }
        }
    }

    impl Driver for DummyDriver {
        fn attach(&mut self) -> std::io::Result<()> {
            Ok(())
        }
        fn detach(&mut self) {}
        fn start(&mut self) -> std::io::Result<()> {
            Ok(())
        }
        fn stop(&mut self) -> std::io::Result<()> {
            Ok(())
        }
        fn read(&mut self, _nframes: u32) -> std::io::Result<()> {
            Ok(())
        }
        fn write(&mut self, _nframes: u32) -> std::io::Result<()> {
            Ok(())
        }
        fn wait(&mut self) -> WaitResult {
            std::thread::sleep(Duration::from_micros(self.period_usecs()));
            WaitResult {
                nframes: self.period_frames,
                status: 0,
                delayed_usecs: 0,
            }
        }
        fn null_cycle(&mut self, _nframes: u32) {}
        fn period_usecs(&self) -> u64 {
            (self.period_frames as u64) * 1_000_000 / (self.sample_rate as u64)
        }
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod null {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// A deterministic test double: `wait()` always succeeds with a caller
    /// configurable `nframes`/`delayed_usecs`, and read/write/start/stop
    /// never fail unless told to.
    pub struct NullDriver {
        pub period_frames: u32,
        pub sample_rate: u32,
        pub next_delayed_usecs: AtomicU64,
        pub started: std::sync::atomic::AtomicBool,
        pub stop_count: std::sync::atomic::AtomicU64,
        pub start_count: std::sync::atomic::AtomicU64,
    }

    impl NullDriver {
        pub fn new(period_frames: u32, sample_rate: u32) -> Self {
            NullDriver {
                period_frames,
                sample_rate,
                next_delayed_usecs: AtomicU64::new(0),
                started: std::sync::atomic::AtomicBool::new(false),
                stop_count: std::sync::atomic::AtomicU64::new(0),
                start_count: std::sync::atomic::AtomicU64::new(0),
            }
        }

        pub fn set_next_delayed_usecs(&self, v: u64) {
            self.next_delayed_usecs.store(v, Ordering::SeqCst);
        }
    }

    impl Driver for NullDriver {
        fn attach(&mut self) -> std::io::Result<()> {
            Ok(())
        }
        fn detach(&mut self) {}
        fn start(&mut self) -> std::io::Result<()> {
            self.started.store(true, Ordering::SeqCst);
            self.start_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn stop(&mut self) -> std::io::Result<()> {
            self.started.store(false, Ordering::SeqCst);
            self.stop_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn read(&mut self, _nframes: u32) -> std::io::Result<()> {
            Ok(())
        }
        fn write(&mut self, _nframes: u32) -> std::io::Result<()> {
            Ok(())
        }
        fn wait(&mut self) -> WaitResult {
            WaitResult {
                nframes: self.period_frames,
                status: 0,
                delayed_usecs: self.next_delayed_usecs.swap(0, Ordering::SeqCst),
            }
        }
        fn null_cycle(&mut self, _nframes: u32) {}
        fn period_usecs(&self) -> u64 {
            (self.period_frames as u64) * 1_000_000 / (self.sample_rate as u64)
        }
    }
}
