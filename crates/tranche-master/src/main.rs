#![doc = include_str!("../README.md")]

mod server;

use clap::Parser;
use server::pool::registry::{self, Registry};
use server::service::config::{CliArgs, ServerConfig};
use server::service::{handler::Master, session::serve};
use server::telemetry::init_telemetry;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tranche_core::FrameCodec;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;

    let specs = registry::load(&config.workers_config)?;
    let registry = Registry::connect(
        specs,
        config.connect_timeout,
        FrameCodec::new(config.max_frame_bytes),
    )
    .await;
    let master = Master::new(registry, &config);

    let listener = TcpListener::bind(&config.server_addr).await?;
    log_startup_info(&master, &config);

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let res = serve(listener, master, config, shutdown).await;
    tracing::info!("Master shut down");
    providers.shutdown();
    res
}

fn log_startup_info(master: &Master, config: &ServerConfig) {
    let registry = master.registry();
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting master on {} with full config: {:#?}",
            config.server_addr,
            config
        );
    } else {
        tracing::info!(
            "Starting master on {} with {}/{} workers connected",
            config.server_addr,
            registry.connected(),
            registry.len()
        );
    }

    for worker in registry.iter() {
        tracing::debug!(
            worker = worker.index(),
            addr = worker.addr(),
            weight = worker.weight().get(),
            connected = worker.connection().is_ok(),
            "Registered worker"
        );
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");
    shutdown.cancel();
}
