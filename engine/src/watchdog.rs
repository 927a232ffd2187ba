//! Watchdog & Fault Isolator: a dedicated thread that wakes every 5
//! seconds and verifies the cycle thread set its liveness flag since the
//! last wake. If not, the cycle thread is presumed stalled and this
//! thread kills it out from under the engine.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::error;

use crate::engine::Engine;

const WAKE_INTERVAL: Duration = Duration::from_secs(5);

/// Priority the watchdog thread should request from the OS scheduler:
/// `min(99, rtpriority + 10)`, kept elevated over the cycle thread so it
/// can actually preempt a stuck one.
pub fn priority(rtpriority: u8) -> u8 {
    (rtpriority as u32 + 10).min(99) as u8
}

/// Runs until `shutdown` is observed set. Intended to be spawned on its
/// own `std::thread`.
pub fn run(engine: Arc<Engine>, shutdown: Arc<std::sync::atomic::AtomicBool>) {
    loop {
        thread::sleep(WAKE_INTERVAL);
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        if engine.watchdog_check.swap(false, Ordering::SeqCst) {
            continue;
        }
        error!("cycle thread appears stalled, engine watchdog firing");
        let stalled_pid = engine.current_client_pid.load(Ordering::SeqCst);
        if stalled_pid > 0 {
            kill_process_group(stalled_pid);
        }
        kill_process_group(std::process::id() as i32);
        return;
    }
}

fn kill_process_group(pid: i32) {
    // A negative pid targets the whole process group in POSIX kill(2).
    let pgid = Pid::from_raw(-pid);
    if let Err(e) = kill(pgid, Signal::SIGKILL) {
        error!(pid, error = %e, "failed to signal stalled process group");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_is_capped_at_99() {
        assert_eq!(priority(10), 20);
        assert_eq!(priority(95), 99);
        assert_eq!(priority(89), 99);
    }
}
