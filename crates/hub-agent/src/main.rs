use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use application::Hub;
use hub_agent::Args;
use infrastructure::HubConfig;

async fn run() -> Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,hub_agent=debug,application=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🏠 Switch Hub Agent Starting...");
    info!("🆔 Process ID: {}", std::process::id());

    let args = Args::parse();
    let config_dir = args.config_dir();
    info!("📂 Config directory: {}", config_dir);

    let mut config = HubConfig::load(&config_dir)
        .with_context(|| format!("loading configuration from {}", config_dir))?;
    args.apply(&mut config);
    info!(
        lights = config.lights.len(),
        outlets = config.outlets.len(),
        switches = config.switches.len(),
        buttons = config.buttons.len(),
        thermostats = config.thermostats.len(),
        "✅ Configuration loaded"
    );

    let mut hub = Hub::from_config(&config)?;
    if let Err(e) = hub.start().await {
        if let Err(close) = hub.close().await {
            warn!("Cleanup after failed start: {:#}", close);
        }
        return Err(e.context("starting hub"));
    }

    let mut events = hub.subscribe();
    let event_log = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => info!(device = %event.device(), kind = %event.event_type(), ?event, "State change"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "State change log lagging"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let cancel = CancellationToken::new();
    tokio::select! {
        _ = hub.run(cancel.clone()) => {}
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => info!("🛑 Shutdown signal received"),
                Err(e) => error!("Failed to listen for shutdown signal: {}", e),
            }
            cancel.cancel();
        }
    }

    let closed = hub.close().await;
    drop(hub);
    event_log.abort();
    closed?;

    info!("👋 Good bye!");
    Ok(())
}

fn main() {
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("❌ Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = rt.block_on(run()) {
        eprintln!("\n❌ CRITICAL ERROR: {:?}", e);
        std::process::exit(1);
    }
}
