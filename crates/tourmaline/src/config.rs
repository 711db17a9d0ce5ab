// src/config.rs
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use crate::proxy::session::DEFAULT_MTU_SIZE;
use crate::raknet::offline::MIN_MTU_SIZE;

const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Configuration validation failed: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub network: NetworkConfig,
    pub proxy: ProxyConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NetworkConfig {
    /// Address the client-facing listener binds to.
    pub listen: String,
    /// Address of the real server every session is bridged to.
    pub upstream: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProxyConfig {
    /// Starting MTU; the offline phase only ever lowers it.
    pub mtu_size: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:19132".to_string(),
            upstream: "127.0.0.1:19133".to_string(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self { mtu_size: DEFAULT_MTU_SIZE }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self { network: NetworkConfig::default(), proxy: ProxyConfig::default() }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;
        self.upstream_addr()?;

        if self.proxy.mtu_size < MIN_MTU_SIZE || self.proxy.mtu_size > DEFAULT_MTU_SIZE {
            return Err(ConfigError::Validation(format!(
                "MTU size {} outside the supported range {}..={}",
                self.proxy.mtu_size, MIN_MTU_SIZE, DEFAULT_MTU_SIZE
            )));
        }

        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        SocketAddr::from_str(&self.network.listen).map_err(|_| {
            ConfigError::Validation(format!(
                "Invalid listen address '{}'. Expected format like 'IP:PORT'.",
                self.network.listen
            ))
        })
    }

    pub fn upstream_addr(&self) -> Result<SocketAddr> {
        SocketAddr::from_str(&self.network.upstream).map_err(|_| {
            ConfigError::Validation(format!(
                "Invalid upstream address '{}'. Expected format like 'IP:PORT'.",
                self.network.upstream
            ))
        })
    }
}

/// Loads `config.toml` from the working directory, writing the defaults first
/// if the file does not exist yet.
pub fn handle() -> Result<Config> {
    let config_path = PathBuf::from(CONFIG_FILE_NAME);
    if config_path.exists() {
        let config_content = fs::read_to_string(&config_path)?;
        let config: Config = toml::from_str(&config_content)?;
        config.validate()?;
        Ok(config)
    } else {
        let config = Config::default();
        save(&config, &config_path)?;
        Ok(config)
    }
}

fn save(config: &Config, path: &Path) -> Result<()> {
    let config_content = toml::to_string_pretty(config)?;
    let mut file = fs::File::create(path)?;
    file.write_all(config_content.as_bytes())?;
    Ok(())
}
