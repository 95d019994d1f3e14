//! Command line scanner
//! Loads a subscription from a JSON config, scans with the platform adapter and logs
//! every event. Usage: `gatt-central [config.json]`

use std::path::PathBuf;

use anyhow::Result;
use gatt_central::config::{CONFIG_FILE_NAME, CentralConfig};
use gatt_central::core::bluetooth::{BluestAdapter, CentralEvent, CentralManager};
use gatt_central::{Session, logging};
use log::{LevelFilter, error, info};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init(LevelFilter::Info);

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
    let config = CentralConfig::load_config(&config_path).await?;
    info!(
        "Using subscription \"{}\" with {} service(s)",
        config.subscription.name,
        config.subscription.services.len()
    );

    let (adapter, adapter_events) = BluestAdapter::new().await?;
    let manager = CentralManager::new(adapter, config.subscription, config.manager);
    let mut events = manager.subscribe();
    let session = Session::start(manager, adapter_events);
    let central_manager = session.get_central_manager_arc();

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event.as_ref() {
                    CentralEvent::ManagerReady => {
                        if let Err(e) = central_manager.lock().await.start_scanning() {
                            error!("Failed to start scanning: {}", e);
                        }
                    }
                    CentralEvent::Error(e) => error!("{:?}: {}", e.kind(), e),
                    other => info!("{:?}", other),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down.");
                break;
            }
        }
    }

    session.shutdown().await
}
