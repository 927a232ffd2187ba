//! External-subgraph signalling: one write to wake the run, one poll +
//! status read to conclude it. Runs entirely on borrowed fds — the
//! client registry keeps ownership.

use std::os::fd::{BorrowedFd, RawFd};

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::warn;

pub enum SubgraphOutcome {
    Completed,
    /// `forgiven` mirrors the `awake_at == 0` rule: a timeout recorded
    /// before the client ever woke is a scheduler fault, not the
    /// client's.
    TimedOut { forgiven: bool },
    Error,
}

/// Trigger a subgraph run by writing one byte to `start_fd`, then poll
/// `wait_fd` (the run terminator's fd — the same fd for a single-member
/// run) for up to `timeout_ms`.
pub fn run_subgraph(start_fd: RawFd, wait_fd: RawFd, timeout_ms: u32, had_awake: bool) -> SubgraphOutcome {
    let start_borrowed = unsafe { BorrowedFd::borrow_raw(start_fd) };
    if nix::unistd::write(start_borrowed, &[1u8]).is_err() {
        warn!(fd = start_fd, "failed to signal subgraph start");
        return SubgraphOutcome::Error;
    }

    let wait_borrowed = unsafe { BorrowedFd::borrow_raw(wait_fd) };
    let mut fds = [PollFd::new(wait_borrowed, PollFlags::POLLIN)];
    let timeout = PollTimeout::try_from(timeout_ms).unwrap_or(PollTimeout::MAX);
    let n = match poll(&mut fds, timeout) {
        Ok(n) => n,
        Err(e) => {
            warn!(fd = wait_fd, error = %e, "poll failed on subgraph wait fd");
            return SubgraphOutcome::Error;
        }
    };
    if n == 0 {
        return SubgraphOutcome::TimedOut {
            forgiven: !had_awake,
        };
    }
    let revents = fds[0].revents().unwrap_or(PollFlags::empty());
    if revents.contains(PollFlags::POLLERR) || revents.contains(PollFlags::POLLHUP) {
        warn!(fd = wait_fd, "lost client");
        return SubgraphOutcome::Error;
    }
    let mut ack = [0u8; 1];
    match nix::unistd::read(wait_fd, &mut ack) {
        Ok(1) => SubgraphOutcome::Completed,
        _ => SubgraphOutcome::Error,
    }
}
