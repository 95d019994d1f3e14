pub mod manager_config;

use std::path::Path;

use anyhow::Result;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::config::manager_config::ManagerConfig;
use crate::core::bluetooth::subscription::PeripheralSubscription;

pub const CONFIG_FILE_NAME: &str = "gatt_central.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CentralConfig {
    #[serde(default)]
    pub subscription: PeripheralSubscription,
    #[serde(default)]
    pub manager: ManagerConfig,
}

impl CentralConfig {
    /// Loads the config from a configuration file, falling back to defaults when it does not exist.
    pub async fn load_config(file_path: impl AsRef<Path>) -> Result<Self> {
        let file_path = file_path.as_ref();
        if !file_path.exists() {
            warn!("Config file not found at {:?}, using default.", file_path);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(file_path).await?;
        let config: Self = serde_json::from_str(&config_json)?;

        info!("Config loaded from {:?}", file_path);
        Ok(config)
    }

    /// Saves the config as pretty JSON, creating the parent directory if needed.
    pub async fn save_config(&self, file_path: impl AsRef<Path>) -> Result<()> {
        let file_path = file_path.as_ref();
        if let Some(config_dir) = file_path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            if let Err(e) = fs::create_dir_all(config_dir).await {
                error!("Failed to create config directory {:?}: {}", config_dir, e);
                return Err(e.into());
            }
        }

        let config_json = match serde_json::to_string_pretty(self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize central config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(file_path, config_json).await?;

        info!("Central config saved to {:?}.", file_path);
        Ok(())
    }
}
