//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.
//! Transport concerns (bind address/port) live here; everything else is
//! `bridge_core::Config`, flattened into the same YAML document so a single
//! file configures both.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the HTTP server to.
    pub bind_addr: IpAddr,

    /// Port to bind the HTTP server to.
    /// Override: `BRIDGE_BIND_PORT`
    pub bind_port: u16,

    /// Address advertised in logs/health output for operators wiring up
    /// platform gateway configuration. Purely informational.
    /// Override: `BRIDGE_ADVERTISE_ADDR`
    pub advertise_addr: Option<String>,

    /// Bridge-core configuration (AI service, session storage, timings).
    #[serde(flatten)]
    pub bridge: bridge_core::BridgeConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::from([0, 0, 0, 0]),
            bind_port: 8080,
            advertise_addr: None,
            bridge: bridge_core::BridgeConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("BRIDGE_BIND_PORT") {
            if let Ok(port) = val.parse() {
                self.bind_port = port;
            }
        }

        if let Ok(val) = std::env::var("BRIDGE_ADVERTISE_ADDR") {
            self.advertise_addr = Some(val);
        }

        if let Ok(val) = std::env::var("BRIDGE_DATA_DIR") {
            self.bridge.data_dir = Some(PathBuf::from(val));
        }

        if let Ok(val) = std::env::var("BRIDGE_STORAGE_URL") {
            self.bridge.storage_url = Some(val);
        }

        // Note: BRIDGE_CONFIG_FILE and BRIDGE_LOG_LEVEL are handled by clap
        // via #[arg(env = ...)] in main.rs.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_to_all_interfaces() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, IpAddr::from([0, 0, 0, 0]));
        assert_eq!(config.bind_port, 8080);
    }

    #[test]
    fn flattened_bridge_fields_round_trip_through_yaml() {
        let yaml = "bind_port: 9090\nuse_local_ai: true\nvoice_id: verse\n";
        let config: ServerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.bind_port, 9090);
        assert!(config.bridge.use_local_ai);
        assert_eq!(config.bridge.voice_id, "verse");
    }
}
