//! Entry point of the Steel world host.
use std::{path::Path, sync::Arc};

use anyhow::Context as _;
use steel::{SteelServer, spawn_progress};
use steel_core::config::ChunkSystemConfig;
use steel_utils::ChunkPos;
use tokio::{runtime::Builder, signal::ctrl_c};
use tracing::subscriber::set_global_default;
use tracing_log::LogTracer;
use tracing_subscriber::{EnvFilter, fmt};

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const CONFIG_PATH: &str = "steel_chunks.json5";

fn init_logging() -> anyhow::Result<()> {
    LogTracer::init().context("failed to route log records into tracing")?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter).with_target(true).finish();
    set_global_default(subscriber)
        .context("failed to install the tracing subscriber")?;
    Ok(())
}

#[cfg(feature = "deadlock_detection")]
fn spawn_deadlock_detector() {
    use parking_lot::deadlock::check_deadlock;
    use std::{thread, time::Duration};

    thread::spawn(|| {
        loop {
            thread::sleep(Duration::from_secs(10));
            let deadlocks = check_deadlock();
            if deadlocks.is_empty() {
                continue;
            }
            log::error!("{} deadlocks detected", deadlocks.len());
            for (i, threads) in deadlocks.iter().enumerate() {
                log::error!("Deadlock #{i}");
                for thread in threads {
                    log::error!("Thread Id {:#?}\n{:#?}", thread.thread_id(), thread.backtrace());
                }
            }
        }
    });
}

fn main() -> anyhow::Result<()> {
    init_logging()?;
    #[cfg(feature = "deadlock_detection")]
    spawn_deadlock_detector();

    let config = ChunkSystemConfig::load_or_create(Path::new(CONFIG_PATH))
        .with_context(|| format!("failed to load {CONFIG_PATH}"))?;
    let runtime = Arc::new(
        Builder::new_multi_thread()
            .enable_all()
            .thread_name("steel-io")
            .build()
            .context("failed to start the io runtime")?,
    );

    let server = SteelServer::new(config, runtime.clone())?;

    let cancel_token = server.cancel_token.clone();
    runtime.spawn(async move {
        match ctrl_c().await {
            Ok(()) => {
                log::info!("Received shutdown signal");
                cancel_token.cancel();
            }
            Err(error) => log::error!("Failed to listen for the shutdown signal: {error}"),
        }
    });

    spawn_progress::generate_spawn_chunks(&server, ChunkPos::new(0, 0));
    server.run();
    Ok(())
}
