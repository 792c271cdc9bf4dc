//! Configuration loading and parsing.
//!
//! Defines the server config schema and resolves defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use media_engine::{DecoderConfig, EngineConfig};

use crate::discovery::DiscoveryConfig;

const DEFAULT_COMMAND_PORT: u16 = 4200;
const DEFAULT_NOTIFICATION_PORT: u16 = 4201;

/// Top-level server configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct ServerConfig {
    /// Control listener bind address (host:port).
    pub command_bind: Option<String>,
    /// Status notification listener bind address (host:port).
    pub notification_bind: Option<String>,
    /// JSON file holding the track catalog.
    pub catalog_path: Option<String>,
    /// Decoder process settings.
    pub decoder: Option<DecoderSection>,
    /// Engine timing.
    pub engine: Option<EngineSection>,
    /// Removable devices and where they are mounted.
    pub devices: Option<Vec<DeviceConfig>>,
    /// mDNS advertisement.
    pub discovery: Option<DiscoverySection>,
}

/// `[discovery]` table.
#[derive(Debug, Default, Deserialize)]
pub struct DiscoverySection {
    /// Advertise over mDNS (default: true).
    pub enabled: Option<bool>,
    /// Instance name shown to clients (default: host name).
    pub name: Option<String>,
}

/// `[decoder]` table.
#[derive(Debug, Default, Deserialize)]
pub struct DecoderSection {
    /// Executable name or path (default: `mpg123`).
    pub program: Option<String>,
    /// Arguments (default: `["-R"]`).
    pub args: Option<Vec<String>>,
    /// Volume applied whenever the decoder (re)starts, 0-100 (default: 100).
    pub startup_volume: Option<u8>,
    /// Resend cap for rejected commands; unbounded when absent.
    pub max_command_retries: Option<u32>,
}

/// `[engine]` table.
#[derive(Debug, Default, Deserialize)]
pub struct EngineSection {
    /// Status notification interval in milliseconds (default: 200).
    pub status_interval_ms: Option<u64>,
    /// Worker poll slice in milliseconds (default: 50).
    pub poll_interval_ms: Option<u64>,
}

/// `[[devices]]` entry.
#[derive(Debug, Deserialize)]
pub struct DeviceConfig {
    /// Device id as stored in the catalog.
    pub id: String,
    /// Directory the device is mounted on.
    pub mount_path: String,
}

impl ServerConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        toml::from_str::<ServerConfig>(&raw).with_context(|| format!("parse config {:?}", path))
    }
}

fn parse_bind(value: Option<&str>, default_port: u16, key: &str) -> Result<SocketAddr> {
    match value {
        Some(bind) => bind
            .parse()
            .with_context(|| format!("parse {key} {bind}")),
        None => Ok(SocketAddr::from(([0, 0, 0, 0], default_port))),
    }
}

/// Control listener address (default `0.0.0.0:4200`).
pub fn command_bind_from_config(cfg: &ServerConfig) -> Result<SocketAddr> {
    parse_bind(cfg.command_bind.as_deref(), DEFAULT_COMMAND_PORT, "command_bind")
}

/// Notification listener address (default `0.0.0.0:4201`).
pub fn notification_bind_from_config(cfg: &ServerConfig) -> Result<SocketAddr> {
    parse_bind(
        cfg.notification_bind.as_deref(),
        DEFAULT_NOTIFICATION_PORT,
        "notification_bind",
    )
}

/// Extract the catalog path from config.
pub fn catalog_path_from_config(cfg: &ServerConfig) -> Result<PathBuf> {
    let path = cfg
        .catalog_path
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| anyhow::anyhow!("catalog_path is required in config"))?;
    Ok(PathBuf::from(path))
}

/// Build engine settings from the `[decoder]` and `[engine]` tables.
pub fn engine_config_from_config(cfg: &ServerConfig) -> Result<EngineConfig> {
    let mut engine = EngineConfig::default();
    if let Some(decoder) = cfg.decoder.as_ref() {
        let defaults = DecoderConfig::default();
        engine.decoder = DecoderConfig {
            program: decoder
                .program
                .as_deref()
                .map(PathBuf::from)
                .unwrap_or(defaults.program),
            args: decoder.args.clone().unwrap_or(defaults.args),
        };
        if let Some(volume) = decoder.startup_volume {
            if volume > 100 {
                anyhow::bail!("decoder.startup_volume must be 0-100, got {volume}");
            }
            engine.startup_volume = volume;
        }
        engine.max_command_retries = decoder.max_command_retries;
    }
    if let Some(section) = cfg.engine.as_ref() {
        if let Some(ms) = section.status_interval_ms {
            engine.status_interval = Duration::from_millis(ms.max(1));
        }
        if let Some(ms) = section.poll_interval_ms {
            engine.poll_interval = Duration::from_millis(ms.max(1));
        }
    }
    Ok(engine)
}

/// mDNS settings, or `None` when `discovery.enabled = false`.
pub fn discovery_from_config(cfg: &ServerConfig) -> Option<DiscoveryConfig> {
    let section = cfg.discovery.as_ref();
    if section.and_then(|d| d.enabled) == Some(false) {
        return None;
    }
    Some(DiscoveryConfig {
        name: section
            .and_then(|d| d.name.as_deref())
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string),
    })
}

/// Device table as `(id, mount path)` pairs.
pub fn devices_from_config(cfg: &ServerConfig) -> Vec<(String, PathBuf)> {
    cfg.devices
        .iter()
        .flatten()
        .map(|device| (device.id.clone(), PathBuf::from(&device.mount_path)))
        .collect()
}
