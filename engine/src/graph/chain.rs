use std::os::fd::RawFd;

use tracing::trace;

use crate::client::{ClientId, ClientKind, ClientRegistry, ClientState};

/// Per-subgraph signalling pipes, indexed by chain number. Each chain
/// needs two distinct channels — a start pipe the engine writes and the
/// run's external process reads, and a wait (ack) pipe the run's
/// terminator writes and the engine reads — so a single chain number owns
/// two `pipe(2)` pairs, never one shared between both directions. A
/// native implementation might use a counting semaphore for each instead;
/// the contract — one wakeup per cycle per subgraph head, one
/// acknowledgment per subgraph tail — is what matters, not the specific
/// primitive, so this is built on plain pipes rather than named FIFOs.
#[derive(Default)]
pub struct FifoTable {
    /// `start[n] = (read_fd, write_fd)`: the engine holds `write_fd`
    /// (`subgraph_start_fd`); the run's external process would hold
    /// `read_fd`.
    start: Vec<(RawFd, RawFd)>,
    /// `wait[n] = (read_fd, write_fd)`: the engine holds `read_fd`
    /// (`subgraph_wait_fd`); the run's terminating client would hold
    /// `write_fd`.
    wait: Vec<(RawFd, RawFd)>,
}

impl FifoTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn create_one() -> (RawFd, RawFd) {
        let (r, w) = nix::unistd::pipe().expect("failed to create subgraph pipe");
        use std::os::fd::IntoRawFd;
        (r.into_raw_fd(), w.into_raw_fd())
    }

    /// Ensure chain `n`'s start and wait pipes exist, creating them if
    /// needed. Called ahead of the reorder so clients never race to open
    /// either one.
    pub fn ensure_created(&mut self, n: usize) {
        while self.start.len() <= n {
            self.start.push(Self::create_one());
            self.wait.push(Self::create_one());
        }
    }

    /// Engine-side write end of chain `n`'s start pipe.
    pub fn start_write_fd(&self, n: usize) -> RawFd {
        self.start[n].1
    }

    /// Engine-side read end of chain `n`'s wait (ack) pipe.
    pub fn wait_read_fd(&self, n: usize) -> RawFd {
        self.wait[n].0
    }
}

/// Walk the sorted client list, numbering each active client with a
/// monotonically increasing `execution_order`. An in-process client
/// terminates any in-flight subgraph by assigning its `wait_fd` to chain
/// `n`'s wait pipe (incrementing `n`); external clients within a
/// contiguous run share the same `start_fd` (chain `n`'s start pipe,
/// assigned from the first client) and all but the terminator have
/// `wait_fd = None`; the last external client in the run gets the
/// terminating `wait_fd`. Chain `n+1` is pre-created before callers can
/// observe the new chain.
pub fn rechain(sorted: &[ClientId], clients: &mut ClientRegistry, fifos: &mut FifoTable) {
    let mut n: usize = 0;
    let mut order: u32 = 0;
    let mut run_start_fd: Option<RawFd> = None;
    let mut run: Vec<ClientId> = Vec::new();

    fifos.ensure_created(0);

    let flush_run = |run: &mut Vec<ClientId>,
                      run_start_fd: &mut Option<RawFd>,
                      clients: &mut ClientRegistry,
                      n: &mut usize,
                      fifos: &mut FifoTable| {
        if run.is_empty() {
            return;
        }
        fifos.ensure_created(*n + 1);
        let wait_fd = fifos.wait_read_fd(*n);
        let start_fd = run_start_fd.take().unwrap();
        let last = *run.last().unwrap();
        for &id in run.iter() {
            if let Some(c) = clients.get_mut(id) {
                c.subgraph_start_fd = Some(start_fd);
                c.subgraph_wait_fd = if id == last { Some(wait_fd) } else { None };
            }
        }
        *n += 1;
        run.clear();
    };

    for &id in sorted {
        let kind = clients.get(id).map(|c| c.kind);
        match kind {
            Some(ClientKind::InProcess) | Some(ClientKind::Driver) => {
                flush_run(&mut run, &mut run_start_fd, clients, &mut n, fifos);
                if let Some(c) = clients.get_mut(id) {
                    c.subgraph_start_fd = None;
                    c.subgraph_wait_fd = None;
                    c.execution_order = order;
                }
            }
            Some(ClientKind::External) => {
                if run.is_empty() {
                    fifos.ensure_created(n);
                    run_start_fd = Some(fifos.start_write_fd(n));
                }
                run.push(id);
                if let Some(c) = clients.get_mut(id) {
                    c.execution_order = order;
                }
            }
            None => continue,
        }
        order += 1;
    }
    flush_run(&mut run, &mut run_start_fd, clients, &mut n, fifos);

    trace!(n_fifos = n, "rechain complete");

    for id in sorted {
        if let Some(c) = clients.get_mut(*id) {
            c.state = ClientState::NotTriggered;
        }
    }
}
