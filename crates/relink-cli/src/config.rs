//! Configuration file management.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use relink_core::btle::DEFAULT_CONNECT_TIMEOUT;
use relink_core::{ManagerConfig, RetryPolicy};

/// Configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Identity database location (platform data directory when unset)
    #[serde(default)]
    pub store_path: Option<PathBuf>,

    /// Connection manager behavior
    #[serde(default)]
    pub manager: ManagerSection,

    /// Defaults for `relink watch`
    #[serde(default)]
    pub scan: ScanSection,
}

/// `[manager]` section. Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerSection {
    pub allow_rescan: bool,
    pub stop_scan_when_connecting: bool,
    pub should_connect_after_disconnect: bool,
    /// Minimum RSSI in dBm for auto-connect
    pub rssi_for_connect: Option<i16>,
    /// Connect attempts per cycle (unbounded when unset)
    pub max_attempts: Option<u32>,
    pub retry_initial_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub exponential_backoff: bool,
    pub jitter: bool,
    pub notification_capacity: usize,
    pub connect_timeout_ms: u64,
}

impl Default for ManagerSection {
    fn default() -> Self {
        let config = ManagerConfig::default();
        Self {
            allow_rescan: config.allow_rescan,
            stop_scan_when_connecting: config.stop_scan_when_connecting,
            should_connect_after_disconnect: config.should_connect_after_disconnect,
            rssi_for_connect: config.rssi_for_connect,
            max_attempts: config.retry.max_attempts,
            retry_initial_delay_ms: millis(config.retry.initial_delay),
            retry_max_delay_ms: millis(config.retry.max_delay),
            backoff_multiplier: config.retry.backoff_multiplier,
            exponential_backoff: config.retry.use_exponential_backoff,
            jitter: config.retry.jitter,
            notification_capacity: config.notification_capacity,
            connect_timeout_ms: millis(DEFAULT_CONNECT_TIMEOUT),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl ManagerSection {
    /// Build the manager configuration this section describes.
    pub fn to_manager_config(&self) -> ManagerConfig {
        let mut retry = RetryPolicy::unbounded()
            .initial_delay(Duration::from_millis(self.retry_initial_delay_ms))
            .max_delay(Duration::from_millis(self.retry_max_delay_ms))
            .backoff_multiplier(self.backoff_multiplier)
            .exponential_backoff(self.exponential_backoff)
            .jitter(self.jitter);
        if let Some(attempts) = self.max_attempts {
            retry = retry.max_attempts(attempts);
        }

        let config = ManagerConfig::new()
            .allow_rescan(self.allow_rescan)
            .stop_scan_when_connecting(self.stop_scan_when_connecting)
            .should_connect_after_disconnect(self.should_connect_after_disconnect)
            .notification_capacity(self.notification_capacity)
            .retry(retry);
        match self.rssi_for_connect {
            Some(dbm) => config.rssi_for_connect(dbm),
            None => config.no_rssi_floor(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// `[scan]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSection {
    /// Advertised service UUIDs to scan for (empty = everything)
    pub services: Vec<Uuid>,
    pub allow_duplicates: bool,
    /// Auto-connect peripherals whose name contains this pattern
    pub name: Option<String>,
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("relink")
            .join("config.toml")
    }

    /// Load config from file, or return default if missing or invalid
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => return config,
                Err(e) => warn!("Failed to parse config {}: {}", path.display(), e),
            },
            Err(e) => warn!("Failed to read config {}: {}", path.display(), e),
        }
        Self::default()
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        fs::write(path, self.to_toml()?)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    /// Resolve the identity database path: explicit flag, then config, then
    /// the platform default.
    pub fn resolve_store_path(&self, explicit: Option<PathBuf>) -> PathBuf {
        explicit
            .or_else(|| self.store_path.clone())
            .unwrap_or_else(relink_store::default_db_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_manager_config() {
        let section = ManagerSection::default();
        assert_eq!(section.to_manager_config(), ManagerConfig::default());
        assert_eq!(section.connect_timeout(), DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [manager]
            rssi_for_connect = -80
            max_attempts = 5
            retry_initial_delay_ms = 250
            "#,
        )
        .unwrap();

        let manager = config.manager.to_manager_config();
        assert_eq!(manager.rssi_for_connect, Some(-80));
        assert_eq!(manager.retry.max_attempts, Some(5));
        assert_eq!(manager.retry.initial_delay, Duration::from_millis(250));
        assert!(manager.allow_rescan);
        assert!(config.scan.services.is_empty());
        assert!(config.store_path.is_none());
    }

    #[test]
    fn test_scan_section() {
        let config: Config = toml::from_str(
            r#"
            [scan]
            services = ["0000180f-0000-1000-8000-00805f9b34fb"]
            allow_duplicates = true
            name = "thermo"
            "#,
        )
        .unwrap();

        let battery = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);
        assert_eq!(config.scan.services, vec![battery]);
        assert!(config.scan.allow_duplicates);
        assert_eq!(config.scan.name.as_deref(), Some("thermo"));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.store_path = Some(PathBuf::from("/var/lib/relink/ids.db"));
        config.manager.rssi_for_connect = Some(-70);
        config.scan.name = Some("sensor".to_string());
        config.save(&path).unwrap();

        assert_eq!(Config::load(&path), config);
    }

    #[test]
    fn test_load_missing_or_invalid_returns_default() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.toml");
        assert_eq!(Config::load(&missing), Config::default());

        let invalid = dir.path().join("invalid.toml");
        fs::write(&invalid, "[manager\nallow_rescan = ").unwrap();
        assert_eq!(Config::load(&invalid), Config::default());
    }

    #[test]
    fn test_resolve_store_path_precedence() {
        let config = Config {
            store_path: Some(PathBuf::from("from-config.db")),
            ..Default::default()
        };
        assert_eq!(
            config.resolve_store_path(Some(PathBuf::from("explicit.db"))),
            PathBuf::from("explicit.db")
        );
        assert_eq!(
            config.resolve_store_path(None),
            PathBuf::from("from-config.db")
        );
        assert_eq!(
            Config::default().resolve_store_path(None),
            relink_store::default_db_path()
        );
    }
}
