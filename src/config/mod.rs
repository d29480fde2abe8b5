//! # Configuration Management Module
//!
//! TOML configuration for the friend finder and its host binary.
//!
//! ## Configuration Structure
//!
//! - [`NodeConfig`] - Local node identity (used by the CLI host)
//! - [`FinderConfig`] - Protocol timers, tick cadence, eviction policy, display units
//! - [`GpsConfig`] - Normal and boosted GPS update intervals
//! - [`StorageConfig`] - Friend table location
//! - [`LoggingConfig`] - Logging level and optional log file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use meshfinder::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Config::create_default("meshfinder.toml").await?;
//!     let config = Config::load("meshfinder.toml").await?;
//!     println!("Pairing window: {}s", config.finder.pairing_window_secs);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [node]
//! id = "!1234abcd"
//!
//! [finder]
//! pairing_window_secs = 30
//! discovery_rebroadcast_secs = 5
//! confirm_timeout_secs = 20
//! update_interval_secs = 15
//! background_update_interval_secs = 120
//! active_tick_ms = 50
//! idle_tick_ms = 1000
//! eviction = "overwrite_first"
//! units = "metric"
//!
//! [gps]
//! default_interval_secs = 120
//! boosted_interval_secs = 2
//!
//! [storage]
//! data_dir = "./data"
//! namespace = "ffinder"
//!
//! [logging]
//! level = "info"
//! file = "meshfinder.log"
//! ```
//!
//! Every field has a default, so a partial file (or an empty one) loads. [`Config::load`]
//! runs [`Config::validate`] after parsing.

use anyhow::{anyhow, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::finder::EvictionPolicy;
use crate::mesh::NodeId;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub finder: FinderConfig,
    #[serde(default)]
    pub gps: GpsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// `!hex`, `0xhex` or decimal.
    pub id: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: "!00000001".to_string(),
        }
    }
}

impl NodeConfig {
    pub fn node_id(&self) -> Result<NodeId> {
        let id: NodeId = self
            .id
            .parse()
            .map_err(|e| anyhow!("Invalid [node] id: {}", e))?;
        if !id.is_addressable() {
            return Err(anyhow!("[node] id {} is not a usable node address", self.id));
        }
        Ok(id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinderConfig {
    #[serde(default = "default_pairing_window_secs")]
    pub pairing_window_secs: u64,
    #[serde(default = "default_discovery_rebroadcast_secs")]
    pub discovery_rebroadcast_secs: u64,
    /// How long the yes/no prompt waits before counting as "no".
    #[serde(default = "default_confirm_timeout_secs")]
    pub confirm_timeout_secs: u64,
    /// Session heartbeat period (15..=30).
    #[serde(default = "default_update_interval_secs")]
    pub update_interval_secs: u64,
    #[serde(default = "default_background_update_interval_secs")]
    pub background_update_interval_secs: u64,
    #[serde(default = "default_active_tick_ms")]
    pub active_tick_ms: u64,
    #[serde(default = "default_idle_tick_ms")]
    pub idle_tick_ms: u64,
    /// "overwrite_first" or "reject_when_full".
    #[serde(default = "default_eviction")]
    pub eviction: String,
    /// "metric" or "imperial".
    #[serde(default = "default_units")]
    pub units: String,
}

fn default_pairing_window_secs() -> u64 {
    30
}
fn default_discovery_rebroadcast_secs() -> u64 {
    5
}
fn default_confirm_timeout_secs() -> u64 {
    20
}
fn default_update_interval_secs() -> u64 {
    15
}
fn default_background_update_interval_secs() -> u64 {
    120
}
fn default_active_tick_ms() -> u64 {
    50
}
fn default_idle_tick_ms() -> u64 {
    1000
}
fn default_eviction() -> String {
    "overwrite_first".to_string()
}
fn default_units() -> String {
    "metric".to_string()
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            pairing_window_secs: default_pairing_window_secs(),
            discovery_rebroadcast_secs: default_discovery_rebroadcast_secs(),
            confirm_timeout_secs: default_confirm_timeout_secs(),
            update_interval_secs: default_update_interval_secs(),
            background_update_interval_secs: default_background_update_interval_secs(),
            active_tick_ms: default_active_tick_ms(),
            idle_tick_ms: default_idle_tick_ms(),
            eviction: default_eviction(),
            units: default_units(),
        }
    }
}

impl FinderConfig {
    /// Map the `eviction` string to a policy. Unknown values fall back to overwrite-first.
    pub fn eviction_policy(&self) -> EvictionPolicy {
        match self.eviction.as_str() {
            "overwrite_first" => EvictionPolicy::OverwriteFirst,
            "reject_when_full" => EvictionPolicy::RejectWhenFull,
            other => {
                warn!(
                    "Unknown eviction policy '{}', defaulting to overwrite_first",
                    other
                );
                EvictionPolicy::OverwriteFirst
            }
        }
    }

    pub fn imperial(&self) -> bool {
        self.units.eq_ignore_ascii_case("imperial")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpsConfig {
    /// Interval restored after a session, and forced at startup if a stale boost is found.
    #[serde(default = "default_gps_interval_secs")]
    pub default_interval_secs: u32,
    #[serde(default = "default_gps_boosted_secs")]
    pub boosted_interval_secs: u32,
}

fn default_gps_interval_secs() -> u32 {
    120
}
fn default_gps_boosted_secs() -> u32 {
    2
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self {
            default_interval_secs: default_gps_interval_secs(),
            boosted_interval_secs: default_gps_boosted_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Tree the friend table lives in.
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_data_dir() -> String {
    "./data".to_string()
}
fn default_namespace() -> String {
    "ffinder".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            namespace: default_namespace(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: Some("meshfinder.log".to_string()),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let f = &self.finder;
        if f.pairing_window_secs == 0 {
            return Err(anyhow!("finder.pairing_window_secs must be positive"));
        }
        if f.discovery_rebroadcast_secs == 0 || f.discovery_rebroadcast_secs > f.pairing_window_secs
        {
            return Err(anyhow!(
                "finder.discovery_rebroadcast_secs must be in 1..={}",
                f.pairing_window_secs
            ));
        }
        if f.confirm_timeout_secs == 0 || f.confirm_timeout_secs >= f.pairing_window_secs {
            return Err(anyhow!(
                "finder.confirm_timeout_secs must be positive and shorter than the pairing window ({}s)",
                f.pairing_window_secs
            ));
        }
        if !(15..=30).contains(&f.update_interval_secs) {
            return Err(anyhow!(
                "finder.update_interval_secs must be between 15 and 30 (got {})",
                f.update_interval_secs
            ));
        }
        if f.background_update_interval_secs == 0 {
            return Err(anyhow!("finder.background_update_interval_secs must be positive"));
        }
        if f.active_tick_ms == 0 || f.idle_tick_ms < f.active_tick_ms {
            return Err(anyhow!(
                "finder.active_tick_ms must be positive and not above idle_tick_ms"
            ));
        }
        if !matches!(f.eviction.as_str(), "overwrite_first" | "reject_when_full") {
            return Err(anyhow!(
                "finder.eviction must be \"overwrite_first\" or \"reject_when_full\""
            ));
        }
        if !matches!(f.units.to_ascii_lowercase().as_str(), "metric" | "imperial") {
            return Err(anyhow!("finder.units must be \"metric\" or \"imperial\""));
        }
        if self.gps.boosted_interval_secs == 0
            || self.gps.boosted_interval_secs >= self.gps.default_interval_secs
        {
            return Err(anyhow!(
                "gps.boosted_interval_secs must be positive and below default_interval_secs"
            ));
        }
        if self.storage.namespace.trim().is_empty() {
            return Err(anyhow!("storage.namespace must not be empty"));
        }
        Ok(())
    }
}
