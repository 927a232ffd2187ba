//! Cycle Executor: the per-period orchestrator. Runs on the real-time
//! cycle thread, driven by [`DriverAdapter::wait`].

mod subgraph;

use std::sync::atomic::Ordering;

use engine_proto::Event;
use tracing::{error, warn};

use crate::client::{ClientId, ClientKind, ClientState};
use crate::driver::{Driver, DriverAdapter};
use crate::engine::{Engine, GraphInner};
use crate::event::EventPlane;
use crate::inprocess::InProcessTable;
use crate::transport::TransportPosition;

const MAX_CONSECUTIVE_DELAYS: u32 = 11;

/// Run one driver-delivered period to completion. Returns `false` when
/// the caller should stop the cycle thread (fatal driver status, or the
/// 11th consecutive delayed cycle).
pub fn run_cycle<D: Driver>(
    engine: &Engine,
    events: &EventPlane,
    inprocess: &InProcessTable,
    adapter: &mut DriverAdapter<D>,
) -> bool {
    // 1. liveness flag for the watchdog.
    engine.watchdog_check.store(true, Ordering::SeqCst);

    let wait = adapter.wait();
    if wait.nframes == 0 {
        warn!("driver requested an internal restart");
        let mut graph = engine.graph.lock();
        events.broadcast(&mut graph.clients, Event::XRun);
        return true;
    }
    if wait.status < 0 {
        error!(status = wait.status, "fatal driver status, exiting cycle thread");
        return false;
    }

    // 2/3. delay detection against the work-scale threshold.
    let period_usecs = adapter.period_usecs();
    if engine.config.realtime && is_delayed(engine, period_usecs, wait.delayed_usecs) {
        let count = engine.consecutive_delay.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= MAX_CONSECUTIVE_DELAYS {
            error!(count, "too many consecutive delayed cycles, exiting cycle thread");
            return false;
        }
        warn!(count, delayed_usecs = wait.delayed_usecs, "cycle delayed, restarting driver");
        let _ = adapter.driver_mut().stop();
        {
            let mut graph = engine.graph.lock();
            events.broadcast(&mut graph.clients, Event::XRun);
        }
        let _ = adapter.driver_mut().start();
        return true;
    }
    engine.consecutive_delay.store(0, Ordering::SeqCst);

    // 4. advance the frame clock.
    let usecs_now = engine.elapsed_usecs();
    engine.clock.advance(wait.nframes, usecs_now);

    // 5. try the graph lock; null-cycle on contention.
    let mut graph = match engine.graph.try_lock() {
        Some(g) => g,
        None => {
            adapter.driver_mut().null_cycle(wait.nframes);
            return true;
        }
    };

    // 6. driver read. §7: driver I/O errors are logged and exit the cycle
    // thread, unlike a client processing error, which only aborts the cycle.
    if adapter.driver_mut().read(wait.nframes).is_err() {
        error!("driver read failed, exiting cycle thread");
        return false;
    }

    let timeout_ms = if engine.config.realtime {
        ((period_usecs / 1000).max(1)) as u32
    } else {
        engine.config.client_timeout_msecs
    };

    // 7. walk the sorted clients once.
    let processing_ok = run_sorted_clients(engine, &mut graph, inprocess, wait.nframes, usecs_now, timeout_ms);

    // 8. driver write, unless processing failed.
    let restart = if !processing_ok {
        let _ = adapter.driver_mut().stop();
        true
    } else {
        if adapter.driver_mut().write(wait.nframes).is_err() {
            error!("driver write failed, exiting cycle thread");
            return false;
        }
        false
    };

    // 9. post-process: transport rotation, timeout/fault escalation, load.
    post_process(engine, events, &mut graph, period_usecs, usecs_now);

    // 10. release the graph lock, then restart the driver if needed.
    drop(graph);
    if restart {
        let _ = adapter.driver_mut().start();
    }
    true
}

fn is_delayed(engine: &Engine, period_usecs: u64, delayed_usecs: u64) -> bool {
    engine.config.driver_delay_scale * period_usecs as f64 <= delayed_usecs as f64
}

/// Walk `graph.order`, running in-process clients inline and signalling
/// external subgraph runs. Returns `false` (aborting the cycle) on the
/// first client process error.
fn run_sorted_clients(
    engine: &Engine,
    graph: &mut GraphInner,
    inprocess: &InProcessTable,
    nframes: u32,
    usecs_now: u64,
    timeout_ms: u32,
) -> bool {
    let order = graph.order.clone();

    // `timed_out` is deliberately NOT reset here: scenario 4 requires it to
    // count *consecutive* timed-out cycles, so it only clears on a
    // successful completion (see the `Completed` arm below) and is read
    // back, un-reset, by `post_process`.
    for &id in &order {
        if let Some(c) = graph.clients.get_mut(id) {
            c.state = ClientState::NotTriggered;
            c.nframes = nframes;
        }
    }

    let mut i = 0;
    while i < order.len() {
        let id = order[i];
        let Some(client) = graph.clients.get(id) else {
            i += 1;
            continue;
        };
        if !client.active || client.dead {
            i += 1;
            continue;
        }

        match client.kind {
            ClientKind::InProcess | ClientKind::Driver => {
                if let Some(c) = graph.clients.get_mut(id) {
                    c.state = ClientState::Running;
                }
                let ok = inprocess.process(id, nframes);
                if let Some(c) = graph.clients.get_mut(id) {
                    c.state = ClientState::Finished;
                    c.finished_at = Some(usecs_now);
                }
                if !ok {
                    if let Some(c) = graph.clients.get_mut(id) {
                        c.error_count += 1;
                    }
                    warn!(?id, "in-process client reported a process error");
                    return false;
                }
                i += 1;
            }
            ClientKind::External => {
                let Some(start_fd) = client.subgraph_start_fd else {
                    // Not a run head; every external client in a run past
                    // its head is handled when the cursor reaches the run.
                    i += 1;
                    continue;
                };
                // Find the run's terminator (the client sharing this
                // start_fd that carries the wait_fd).
                let mut j = i;
                let mut wait_fd = None;
                while j < order.len() {
                    let cid = order[j];
                    let Some(cc) = graph.clients.get(cid) else { break };
                    if cc.subgraph_start_fd != Some(start_fd) {
                        break;
                    }
                    j += 1;
                    if let Some(w) = cc.subgraph_wait_fd {
                        wait_fd = Some(w);
                        break;
                    }
                }
                let Some(wait_fd) = wait_fd else {
                    warn!(?id, "external subgraph run has no terminator, skipping");
                    i = j.max(i + 1);
                    continue;
                };

                let had_awake = graph.clients.get(id).and_then(|c| c.awake_at).is_some();
                if let Some(c) = graph.clients.get_mut(id) {
                    c.state = ClientState::Triggered;
                    c.signalled_at = Some(usecs_now);
                    c.awake_at = None;
                    c.finished_at = None;
                }

                let pid = graph.clients.get(id).and_then(|c| c.pid).unwrap_or(0);
                engine.current_client_pid.store(pid, Ordering::SeqCst);
                let outcome = subgraph::run_subgraph(start_fd, wait_fd, timeout_ms, had_awake);
                engine.current_client_pid.store(0, Ordering::SeqCst);

                match outcome {
                    subgraph::SubgraphOutcome::Completed => {
                        for &cid in &order[i..j] {
                            if let Some(c) = graph.clients.get_mut(cid) {
                                c.state = ClientState::Finished;
                                c.awake_at = Some(usecs_now);
                                c.finished_at = Some(usecs_now);
                                c.timed_out = 0;
                            }
                        }
                    }
                    subgraph::SubgraphOutcome::TimedOut { forgiven } => {
                        if !forgiven {
                            if let Some(c) = graph.clients.get_mut(id) {
                                c.timed_out += 1;
                            }
                            warn!(?id, "subgraph run timed out");
                        }
                    }
                    subgraph::SubgraphOutcome::Error => {
                        if let Some(c) = graph.clients.get_mut(id) {
                            c.error_count += 1;
                        }
                        warn!(?id, "lost external subgraph");
                        return false;
                    }
                }
                // Advance past the whole run; in-process clients pick up
                // the cursor right after it.
                i = j;
            }
        }
    }
    true
}

fn post_process(engine: &Engine, events: &EventPlane, graph: &mut GraphInner, period_usecs: u64, usecs_now: u64) {
    rotate_transport(engine, usecs_now);
    recompute_cpu_load(engine, period_usecs, usecs_now);

    // `timed_out` is bumped where the timeout is actually detected (the
    // subgraph wait in `run_sorted_clients`); here we only read it back
    // to decide whether two in a row have crossed the fault threshold.
    let order = graph.order.clone();
    let mut faulted: Vec<ClientId> = Vec::new();
    for id in order {
        let Some(c) = graph.clients.get(id) else {
            continue;
        };
        if c.timed_out > 1 {
            faulted.push(id);
        }
    }

    if faulted.is_empty() {
        return;
    }
    {
        let mut ports = engine.ports.lock();
        for id in &faulted {
            crate::fault::handle_post_process_fault(engine, graph, &mut ports, *id);
        }
        crate::graph::resort(graph, &mut ports, &engine.buffers, events);
    }
}

fn rotate_transport(engine: &Engine, usecs_now: u64) {
    let snapshot = engine.clock.read();
    let current = *engine.current_time.lock();
    let rotated = TransportPosition::rotate(&current, snapshot.frame, usecs_now, snapshot.frame_rate);
    *engine.current_time.lock() = rotated;
    *engine.pending_time.lock() = rotated;
}

fn recompute_cpu_load(engine: &Engine, period_usecs: u64, cycle_started_usecs: u64) {
    let processing_usecs = engine.elapsed_usecs().saturating_sub(cycle_started_usecs);
    let sample = processing_usecs as f64 / period_usecs.max(1) as f64;
    let mut load = engine.cpu_load.lock();
    // Simple exponential smoothing; the alpha mirrors a one-second
    // rolling window at typical period sizes closely enough for a load
    // indicator, not a precise average.
    const ALPHA: f64 = 0.1;
    *load = *load * (1.0 - ALPHA) + sample * ALPHA;
}
