//! Configuration loading and validation

use anyhow::{Context, Result};
use lanwatch_core::ConfigError;
use lanwatch_discovery::resolve::strategy_by_name;
use lanwatch_discovery::{PoolConfig, ScannerConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub resolution: ResolutionConfig,
    #[serde(default)]
    pub vendors: VendorsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Seconds between scan cycles
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    /// Missed cycles tolerated before a device is marked offline
    #[serde(default = "default_grace_period")]
    pub grace_period: u32,
    /// Upper bound on one neighbor probe
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            grace_period: default_grace_period(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

fn default_interval() -> u64 {
    30
}

fn default_grace_period() -> u32 {
    2
}

fn default_probe_timeout() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionConfig {
    /// Concurrent lookup workers
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Per-lookup timeout
    #[serde(default = "default_lookup_timeout")]
    pub lookup_timeout_ms: u64,
    /// Delay before retrying a failed lookup
    #[serde(default = "default_retry_cooldown")]
    pub retry_cooldown_secs: u64,
    /// Query mDNS for service names
    #[serde(default = "default_true")]
    pub mdns: bool,
    /// How long one mDNS query listens for answers
    #[serde(default = "default_mdns_window")]
    pub mdns_window_ms: u64,
    /// Hostname strategies in the order they are tried
    #[serde(default = "default_hostname_tools")]
    pub hostname_tools: Vec<String>,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            lookup_timeout_ms: default_lookup_timeout(),
            retry_cooldown_secs: default_retry_cooldown(),
            mdns: true,
            mdns_window_ms: default_mdns_window(),
            hostname_tools: default_hostname_tools(),
        }
    }
}

fn default_workers() -> usize {
    3
}

fn default_lookup_timeout() -> u64 {
    3000
}

fn default_retry_cooldown() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_mdns_window() -> u64 {
    1500
}

fn default_hostname_tools() -> Vec<String> {
    vec!["system".to_string(), "host".to_string(), "avahi".to_string()]
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VendorsConfig {
    /// OUI tables to try in order; empty means the usual arp-scan locations
    #[serde(default)]
    pub oui_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Custom device names
    #[serde(default = "default_names_path")]
    pub names_path: PathBuf,
    /// Known devices, reloaded on startup
    #[serde(default = "default_devices_path")]
    pub devices_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            names_path: default_names_path(),
            devices_path: default_devices_path(),
        }
    }
}

fn default_names_path() -> PathBuf {
    PathBuf::from("./device_names.json")
}

fn default_devices_path() -> PathBuf {
    PathBuf::from("./devices.json")
}

impl Config {
    /// Convert to ScannerConfig
    pub fn to_scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            interval_secs: self.discovery.interval_secs,
            grace_period: self.discovery.grace_period,
            probe_timeout_secs: self.discovery.probe_timeout_secs,
            pool: PoolConfig {
                workers: self.resolution.workers,
                lookup_timeout_ms: self.resolution.lookup_timeout_ms,
                retry_cooldown_secs: self.resolution.retry_cooldown_secs,
            },
        }
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        self.to_scanner_config().validate()?;
        for tool in &self.resolution.hostname_tools {
            strategy_by_name(tool)?;
        }
        if self.resolution.mdns {
            if self.resolution.mdns_window_ms == 0 {
                return Err(ConfigError::ZeroDuration("mDNS window").into());
            }
            // The query has to finish listening before the pool gives up on it
            if self.resolution.mdns_window_ms >= self.resolution.lookup_timeout_ms {
                return Err(ConfigError::MdnsWindow {
                    window_ms: self.resolution.mdns_window_ms,
                    timeout_ms: self.resolution.lookup_timeout_ms,
                }
                .into());
            }
        }
        Ok(())
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        info!(path = %path.display(), "Loaded configuration");
        config
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Config::default()
    };

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.discovery.interval_secs, 30);
        assert_eq!(config.discovery.grace_period, 2);
        assert_eq!(config.resolution.workers, 3);
        assert_eq!(config.resolution.hostname_tools, vec!["system", "host", "avahi"]);
        assert_eq!(config.storage.names_path, PathBuf::from("./device_names.json"));
        assert!(config.vendors.oui_paths.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_sections() {
        let config: Config = toml::from_str(
            r#"
            [discovery]
            grace_period = 4

            [resolution]
            workers = 8
            mdns = false
            hostname_tools = ["avahi"]

            [vendors]
            oui_paths = ["/opt/oui.txt"]
            "#,
        )
        .unwrap();

        let scanner = config.to_scanner_config();
        assert_eq!(scanner.grace_period, 4);
        assert_eq!(scanner.interval_secs, 30);
        assert_eq!(scanner.pool.workers, 8);
        assert_eq!(scanner.pool.lookup_timeout_ms, 3000);
        assert!(!config.resolution.mdns);
        assert_eq!(config.vendors.oui_paths, vec![PathBuf::from("/opt/oui.txt")]);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.discovery.grace_period = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.resolution.workers = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.resolution.hostname_tools = vec!["nslookup".to_string()];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.resolution.mdns_window_ms = 5000;
        config.resolution.lookup_timeout_ms = 3000;
        let err = config.validate().unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::MdnsWindow { window_ms: 5000, timeout_ms: 3000 })
        );

        config.resolution.mdns_window_ms = 3000;
        assert!(config.validate().is_err());

        // Window only matters when mDNS is queried
        config.resolution.mdns = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_config_file_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lanwatch.toml");

        let missing = load_config(&path).unwrap();
        assert_eq!(missing.discovery.interval_secs, 30);

        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[discovery]\ninterval_secs = 10").unwrap();
        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.discovery.interval_secs, 10);

        std::fs::write(&path, "[resolution]\nworkers = 500\n").unwrap();
        assert!(load_config(&path).is_err());
    }
}
