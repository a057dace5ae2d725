// SPDX-License-Identifier: MIT

//! Static control-daemon configuration: a list of connections and
//! routes to serve to every peer that dials in over the sync protocol.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoleConfig {
    Left,
    Right,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub mux: u16,
    pub role: RoleConfig,
    #[serde(default)]
    pub passphrase: Option<String>,
    #[serde(default)]
    pub key_hex: Option<String>,
    #[serde(default)]
    pub salt_hex: Option<String>,
    #[serde(default = "default_key_length")]
    pub key_length: u16,
    #[serde(default = "default_window_size")]
    pub window_size: u32,
    #[serde(default)]
    pub remote: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub network: String,
    pub prefix_length: u8,
    pub mux: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControldConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

fn default_bind_address() -> IpAddr {
    "0.0.0.0".parse().unwrap()
}

fn default_port() -> u16 {
    4865
}

fn default_key_length() -> u16 {
    128
}

fn default_window_size() -> u32 {
    64
}

impl Default for ControldConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            connections: Vec::new(),
            routes: Vec::new(),
        }
    }
}

impl ControldConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue("port cannot be 0".into()));
        }
        for c in &self.connections {
            let has_passphrase = c.passphrase.is_some();
            let has_explicit_key = c.key_hex.is_some() && c.salt_hex.is_some();
            if !has_passphrase && !has_explicit_key {
                return Err(ConfigError::InvalidValue(format!(
                    "connection mux {} needs either passphrase or key+salt",
                    c.mux
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(s) => write!(f, "I/O error: {s}"),
            Self::Parse(s) => write!(f, "parse error: {s}"),
            Self::InvalidValue(s) => write!(f, "invalid value: {s}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(ControldConfig::default().validate().is_ok());
    }

    #[test]
    fn port_zero_rejected() {
        let config = ControldConfig {
            port: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn connection_without_key_material_rejected() {
        let config = ControldConfig {
            connections: vec![ConnectionConfig {
                mux: 1,
                role: RoleConfig::Left,
                passphrase: None,
                key_hex: None,
                salt_hex: None,
                key_length: 128,
                window_size: 64,
                remote: None,
            }],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn json_roundtrip() {
        let config = ControldConfig {
            connections: vec![ConnectionConfig {
                mux: 1,
                role: RoleConfig::Right,
                passphrase: Some("hunter2".to_string()),
                key_hex: None,
                salt_hex: None,
                key_length: 256,
                window_size: 64,
                remote: Some("198.51.100.1:4865".to_string()),
            }],
            routes: vec![RouteConfig {
                network: "10.0.0.0".to_string(),
                prefix_length: 8,
                mux: 1,
            }],
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: ControldConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.connections[0].mux, 1);
        assert_eq!(parsed.routes[0].prefix_length, 8);
    }
}
