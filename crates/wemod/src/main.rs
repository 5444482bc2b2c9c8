use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use wemod::Config;
use wemod::Engine;
use wemod::IntegrationContext;
use wemod::integrations::wemo::StaticDevice;
use wemod::integrations::wemo::WemoDomain;

/// Expose WeMo devices as binary sensor entities
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "wemod.toml")]
    config: PathBuf,

    /// JSON file of device snapshots to feed to discovery at startup
    #[arg(long)]
    devices: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(config.logging.targets())
        .init();

    info!("wemod starting");
    info!("Loaded config from: {}", args.config.display());

    let wemo = Arc::new(WemoDomain::new());

    // Devices found before the integration is set up wait in the pending queue
    if let Some(path) = &args.devices {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let devices = StaticDevice::load_all(&json)
            .with_context(|| format!("parsing {}", path.display()))?;
        info!("Loaded {} devices from {}", devices.len(), path.display());
        for device in devices {
            wemo.discover(device);
        }
    }

    let mut engine = Engine::new();
    engine.register_integrations(&IntegrationContext {
        config: &config,
        wemo: &wemo,
    });
    let engine = Arc::new(engine);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let api_task = if config.api.enabled {
        let api = config.api.clone();
        let engine = engine.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = wemod::api::serve(api.listen, api.port, engine, shutdown_rx).await {
                warn!("HTTP API server failed: {}", e);
            }
        }))
    } else {
        None
    };

    tokio::select! {
        result = engine.run() => {
            if let Err(e) = result {
                warn!("Engine stopped with error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl-C, shutting down");
        }
    }

    let _ = shutdown_tx.send(());
    if let Some(task) = api_task {
        task.await.ok();
    }

    engine.shutdown().await;

    info!("wemod stopped");
    Ok(())
}
