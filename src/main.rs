use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use uwb_simulator::adapters::outbound::{open_store, MemoryDeviceStore, MqttPublisher};
use uwb_simulator::application::SimulationService;
use uwb_simulator::domains::DeviceStore;
use uwb_simulator::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = Config::load(Some(config_path.as_path()))
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting UWB simulator");
    info!(
        broker = %config.mqtt.broker,
        port = config.mqtt.port,
        base_topic = %config.mqtt.base_topic,
        "Configuration loaded"
    );

    let store: Arc<dyn DeviceStore> = match open_store(&config.storage).await {
        Ok(store) => store,
        Err(e) => {
            warn!(error = %e, "Device store unavailable, state will not survive a restart");
            Arc::new(MemoryDeviceStore::new())
        }
    };

    let publisher = MqttPublisher::connect(&config.mqtt)
        .await
        .context("Failed to connect to MQTT broker")?;

    let mut service = SimulationService::new(config, store, Arc::new(publisher))?;
    service.start().await.context("Failed to start simulation")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    let outcome = service.run(shutdown_rx).await;
    if let Err(e) = &outcome {
        error!(error = %e, "Simulation aborted");
    }
    service.stop().await?;
    outcome?;

    info!("UWB simulator shut down");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
