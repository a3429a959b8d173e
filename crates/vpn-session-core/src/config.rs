//! Application configuration management.
//!
//! This module handles loading and saving the user settings the session
//! core consults before every route decision and cache refresh:
//! alternative routing, kill switch mode, API endpoint and the alternate
//! hosts to try when the API is blocked.
//!
//! Configuration is stored at `~/.config/vpn-session/config.json`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::DEFAULT_API_URL;

/// Application name used for config/cache directory paths
pub const APP_NAME: &str = "vpn-session";

/// Config file name
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KillswitchMode {
    #[default]
    Off,
    /// Blocks traffic while a VPN connection is up.
    Soft,
    /// Blocks all non-VPN traffic, API calls included.
    Hard,
}

/// Read-only view of the user settings.
pub trait SettingsProvider: Send + Sync {
    fn alternate_routing_enabled(&self) -> bool;

    fn killswitch(&self) -> KillswitchMode;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub api_url: String,
    pub alternative_routing: bool,
    pub killswitch: KillswitchMode,
    /// Hosts (without scheme) that front the API when it is blocked.
    pub alternate_routes: Vec<String>,
    pub app_version: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            alternative_routing: false,
            killswitch: KillswitchMode::Off,
            alternate_routes: Vec::new(),
            app_version: format!("LinuxVPN_{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl SettingsProvider for Config {
    fn alternate_routing_enabled(&self) -> bool {
        self.alternative_routing
    }

    fn killswitch(&self) -> KillswitchMode {
        self.killswitch
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}
