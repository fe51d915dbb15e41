use anyhow::{Context, Result, bail, ensure};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::scan::MAX_SSID_LEN;

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Config {
    /// WiFi device to drive; the first WiFi device is used when unset.
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default)]
    pub access_point: AccessPointConfig,
    #[serde(default)]
    pub station: StationConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
}

/// Settings of the setup access point.
///
/// `channel`, `max_connections`, `beacon_interval` and `hidden` are handed to
/// the radio as-is; the controller never interprets them.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AccessPointConfig {
    pub ssid: String,
    pub password: String,
    pub channel: u8,
    pub max_connections: u8,
    pub beacon_interval: u16,
    pub hidden: bool,
}

impl Default for AccessPointConfig {
    fn default() -> Self {
        Self {
            ssid: "TestingESP".to_string(),
            password: "No password.".to_string(),
            channel: 6,
            max_connections: 4,
            beacon_interval: 100,
            hidden: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StationMode {
    /// Join the submitted network as soon as the station role is up.
    #[default]
    StationOnly,
    /// Station and access point share the radio; joining is left to the radio.
    Combined,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct StationConfig {
    pub mode: StationMode,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: IpAddr,
    pub port: u16,
    /// Single character that ends a command line.
    pub terminator: char,
    pub max_command_len: usize,
    pub accept_timeout_ms: u64,
    pub read_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
            terminator: '#',
            max_command_len: 80,
            accept_timeout_ms: 1000,
            read_timeout_ms: 5000,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn terminator_byte(&self) -> u8 {
        // validate() rejects non-ASCII terminators
        self.terminator as u8
    }

    pub fn accept_timeout(&self) -> Duration {
        Duration::from_millis(self.accept_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ScannerConfig {
    pub interval_secs: u64,
    /// Longest single wait for the discovery cache lock before retrying.
    pub cache_lock_wait_ms: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            cache_lock_wait_ms: 100,
        }
    }
}

impl ScannerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn cache_lock_wait(&self) -> Duration {
        Duration::from_millis(self.cache_lock_wait_ms)
    }
}

impl Config {
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let ap = &self.access_point;
        ensure!(!ap.ssid.is_empty(), "access_point.ssid must not be empty");
        ensure!(
            ap.ssid.len() <= MAX_SSID_LEN,
            "access_point.ssid is longer than {} bytes",
            MAX_SSID_LEN
        );
        if !ap.password.is_empty() && !(8..=63).contains(&ap.password.len()) {
            bail!("access_point.password must be empty or 8 to 63 characters");
        }

        let server = &self.server;
        ensure!(
            server.terminator.is_ascii(),
            "server.terminator must be an ASCII character"
        );
        ensure!(
            server.max_command_len > 0,
            "server.max_command_len must be positive"
        );
        ensure!(
            server.accept_timeout_ms > 0 && server.read_timeout_ms > 0,
            "server timeouts must be positive"
        );
        ensure!(
            self.scanner.interval_secs > 0,
            "scanner.interval_secs must be positive"
        );

        Ok(())
    }
}

pub fn config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir().context("Could not determine config directory")?;
    Ok(config_dir.join("wifi-provisioner").join("config.toml"))
}

/// Uses `explicit` when given, otherwise the per-user config location.
pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => config_path(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_device() {
        let cfg = Config::default();

        assert_eq!(cfg.access_point.ssid, "TestingESP");
        assert_eq!(cfg.access_point.channel, 6);
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.server.max_command_len, 80);
        assert_eq!(cfg.scanner.interval(), Duration::from_secs(10));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_file_falls_back_to_defaults() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[server]\nport = 9090\n\n[station]\nmode = \"combined\"\n").unwrap();

        // Act
        let cfg = Config::load_from(&path).unwrap();

        // Assert
        assert_eq!(cfg.server.port, 9090);
        assert_eq!(cfg.server.terminator, '#');
        assert_eq!(cfg.station.mode, StationMode::Combined);
        assert_eq!(cfg.access_point, AccessPointConfig::default());
    }

    #[test]
    fn test_missing_file_yields_default_config() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn test_save_then_load_preserves_values() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut cfg = Config::default();
        cfg.interface = Some("wlan1".to_string());
        cfg.access_point.ssid = "Setup-1234".to_string();

        // Act
        cfg.save_to(&path).unwrap();
        let loaded = Config::load_from(&path).unwrap();

        // Assert
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn test_short_access_point_password_is_rejected() {
        let mut cfg = Config::default();
        cfg.access_point.password = "short".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_non_ascii_terminator_is_rejected() {
        let mut cfg = Config::default();
        cfg.server.terminator = 'é';
        assert!(cfg.validate().is_err());
    }
}
