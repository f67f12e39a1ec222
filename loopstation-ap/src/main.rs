//! Loop station audio player - main entry point
//!
//! Loads the track set, builds the transport and serves the HTTP/SSE control
//! surface. The audio context is created by the first gesture, not at startup.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use loopstation_ap::api::{self, AppContext};
use loopstation_ap::audio::{AudioOutput, ContextFactory, CpalContextFactory, NullContextFactory};
use loopstation_ap::config::{Config, CONFIG_ENV_VAR, ROOT_FOLDER_ENV_VAR};
use loopstation_ap::Transport;
use loopstation_common::config::{resolve_config_path, resolve_root_folder};

/// Sample rate of the headless null sink
const NULL_SINK_SAMPLE_RATE: u32 = 48_000;

/// Command-line arguments for loopstation-ap
#[derive(Parser, Debug)]
#[command(name = "loopstation-ap")]
#[command(about = "Gapless multi-track loop player")]
#[command(version)]
struct Args {
    /// Configuration file (overrides LOOPSTATION_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Base folder for relative track URLs (overrides LOOPSTATION_ROOT)
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Address to serve the control API on
    #[arg(short, long)]
    bind: Option<String>,

    /// Output device name
    #[arg(short, long)]
    device: Option<String>,

    /// Render to a silent real-time sink instead of an audio device
    #[arg(long)]
    null_output: bool,

    /// Print available output devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "loopstation_ap=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    if args.list_devices {
        for device in AudioOutput::list_devices().context("Failed to list audio devices")? {
            println!("{}", device);
        }
        return Ok(());
    }

    let config_path = resolve_config_path(args.config.as_deref(), CONFIG_ENV_VAR)
        .context("Failed to resolve configuration file")?;
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    let root_folder = resolve_root_folder(
        args.root_folder.as_deref(),
        ROOT_FOLDER_ENV_VAR,
        config.root_folder.as_deref(),
    );
    info!("Root folder: {}", root_folder.display());

    let factory: Arc<dyn ContextFactory> = if args.null_output {
        Arc::new(NullContextFactory::realtime(NULL_SINK_SAMPLE_RATE))
    } else {
        Arc::new(CpalContextFactory::new(
            args.device.clone().or_else(|| config.output_device.clone()),
        ))
    };
    info!("Audio output: {}", factory.describe());

    let transport = Arc::new(Transport::from_config(&config, root_folder, factory));
    info!("Transport ready with {} tracks", transport.descriptors().len());

    let bind_addr = args.bind.clone().unwrap_or_else(|| config.bind_addr.clone());
    api::run(&bind_addr, AppContext::new(Arc::clone(&transport)), shutdown_signal())
        .await
        .context("Server error")?;

    transport.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
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
