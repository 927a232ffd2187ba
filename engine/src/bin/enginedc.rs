//! `enginedc`: the daemon binary. Loads configuration, wires up logging,
//! clears stale rendezvous files, registers the primary audio port type,
//! and runs the cycle/server/watchdog threads until the cycle thread
//! exits (fatal driver status, or the eleventh consecutive delayed
//! cycle).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use engine_proto::BufferSizePolicy;
use tracing_subscriber::EnvFilter;

use engine::config::{Cli, EngineConfig};
use engine::driver::dummy::DummyDriver;
use engine::driver::DriverAdapter;
use engine::engine::Engine;
use engine::event::EventPlane;
use engine::inprocess::InProcessTable;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = EngineConfig::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("failed to load {}: {e}, using defaults", cli.config.display());
        EngineConfig::default()
    });
    let cfg = cli.apply(cfg);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cfg.verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    engine::server::clean_server_dir(&cfg.server_dir)?;

    let engine = Engine::new(cfg.clone());
    engine.buffers.register_type(
        "audio".to_string(),
        BufferSizePolicy::Scaled {
            scale_factor: 1,
            sample_size: 4,
        },
        false,
        cfg.port_max,
        cfg.period_frames,
    );

    let events = Arc::new(EventPlane::new());
    let inprocess = Arc::new(InProcessTable::new());
    let shutdown = Arc::new(AtomicBool::new(false));

    let mut server = engine::server::ConnectionServer::bind(&cfg.server_dir)?;

    let watchdog_handle = {
        let engine = engine.clone();
        let shutdown = shutdown.clone();
        std::thread::Builder::new()
            .name("engine-watchdog".into())
            .spawn(move || engine::watchdog::run(engine, shutdown))?
    };

    let server_handle = {
        let engine = engine.clone();
        let events = events.clone();
        let shutdown = shutdown.clone();
        std::thread::Builder::new()
            .name("engine-server".into())
            .spawn(move || {
                while !shutdown.load(Ordering::SeqCst) {
                    if let Err(e) = server.poll_once(&engine, &events, 250) {
                        tracing::warn!(error = %e, "server poll error");
                    }
                }
            })?
    };

    let driver = DummyDriver::new(cfg.period_frames, cfg.sample_rate);
    let mut adapter = DriverAdapter::new(driver, &cfg)?;

    tracing::info!(sample_rate = cfg.sample_rate, period_frames = cfg.period_frames, "cycle thread starting");
    while engine::executor::run_cycle(&engine, &events, &inprocess, &mut adapter) {}
    tracing::error!("cycle thread exited, shutting down");

    shutdown.store(true, Ordering::SeqCst);
    let _ = server_handle.join();
    let _ = watchdog_handle.join();
    Ok(())
}
