//! Loopcast streamer - main entry point
//!
//! Serves the HTTP control surface and supervises the encoder that
//! re-streams uploaded media to the configured ingestion endpoint.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use loopcast::api::{self, AppState};
use loopcast::config::StreamerConfig;
use loopcast::event_log::EventLogStore;
use loopcast::media::MediaRepository;
use loopcast::Supervisor;
use loopcast_common::config::{
    find_config_file, load_toml_or_default, resolve_root_folder, ROOT_FOLDER_ENV,
};
use loopcast_common::db::init_database;
use loopcast_common::events::EventBus;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for loopcast
#[derive(Parser, Debug)]
#[command(name = "loopcast")]
#[command(about = "Re-streams uploaded media to a live ingestion endpoint")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides the configured bind address port)
    #[arg(short, long, env = "LOOPCAST_PORT")]
    port: Option<u16>,

    /// Root folder holding media, playlists and the event log
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Configuration file (TOML)
    #[arg(short, long, env = "LOOPCAST_CONFIG")]
    config: Option<PathBuf>,

    /// Encoder executable
    #[arg(long, env = "LOOPCAST_ENCODER")]
    encoder: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "loopcast=info,loopcast_common=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config_path = args.config.clone().or_else(find_config_file);
    let mut config: StreamerConfig = load_toml_or_default(config_path.as_deref())
        .context("Failed to load configuration")?;

    let root_folder = resolve_root_folder(
        args.root_folder.as_deref(),
        ROOT_FOLDER_ENV,
        config_path.as_deref(),
    );
    config.root_folder = std::path::absolute(&root_folder)
        .with_context(|| format!("Invalid root folder: {}", root_folder.display()))?;
    if let Some(encoder) = args.encoder {
        config.encoder_program = encoder;
    }

    let mut addr: SocketAddr = config
        .bind_addr
        .parse()
        .with_context(|| format!("Invalid bind address: {}", config.bind_addr))?;
    if let Some(port) = args.port {
        addr.set_port(port);
    }

    info!(
        root_folder = %config.root_folder.display(),
        encoder = %config.encoder_program.display(),
        "Starting loopcast"
    );

    let paths = config.paths();
    tokio::fs::create_dir_all(paths.root())
        .await
        .with_context(|| format!("Failed to create root folder {}", paths.root().display()))?;

    let pool = init_database(&paths.database_path())
        .await
        .context("Failed to initialize event log database")?;
    info!(path = %paths.database_path().display(), "Event log ready");

    let bus = EventBus::new(config.event_bus_capacity);
    let log = EventLogStore::with_event_bus(pool.clone(), bus.clone());

    let media = MediaRepository::new(&paths);
    media
        .ensure_dirs()
        .await
        .context("Failed to create media directories")?;

    let supervisor = Supervisor::new(config, media, log, Some(bus.clone())).await;
    let app = api::build_router(AppState::new(supervisor.clone(), bus));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    let final_state = supervisor.shutdown().await;
    info!(state = %final_state, "Supervisor stopped");
    pool.close().await;

    info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
