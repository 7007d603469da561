//! Persistence for user-assigned names and the known-device cache
//!
//! Both stores are plain JSON files keyed by hardware address. They are
//! read once at startup and written on change.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::device::{MacAddress, NetworkDevice};
use crate::error::StoreError;

/// Key-value store of custom device names
pub trait NameStore: Send + Sync {
    /// All persisted names
    fn load(&self) -> Result<HashMap<MacAddress, String>, StoreError>;
    /// Persist one name
    fn save(&self, mac: &MacAddress, name: &str) -> Result<(), StoreError>;
    /// Forget one name
    fn remove(&self, mac: &MacAddress) -> Result<(), StoreError>;
}

/// Names kept in a pretty-printed JSON object on disk
pub struct JsonNameStore {
    path: PathBuf,
    names: Mutex<BTreeMap<MacAddress, String>>,
}

impl JsonNameStore {
    /// Open the store, reading existing names if the file exists
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let names = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let names: BTreeMap<MacAddress, String> = serde_json::from_str(&content)?;
            info!(path = %path.display(), count = names.len(), "Loaded custom device names");
            names
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            names: Mutex::new(names),
        })
    }

    fn write(&self, names: &BTreeMap<MacAddress, String>) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(names)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, content)?;
        debug!(path = %self.path.display(), count = names.len(), "Saved custom device names");
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<MacAddress, String>> {
        // A poisoned map is still a valid map
        self.names.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl NameStore for JsonNameStore {
    fn load(&self) -> Result<HashMap<MacAddress, String>, StoreError> {
        Ok(self.lock().iter().map(|(k, v)| (*k, v.clone())).collect())
    }

    fn save(&self, mac: &MacAddress, name: &str) -> Result<(), StoreError> {
        let mut names = self.lock();
        let mut updated = names.clone();
        updated.insert(*mac, name.to_string());
        self.write(&updated)?;
        *names = updated;
        Ok(())
    }

    fn remove(&self, mac: &MacAddress) -> Result<(), StoreError> {
        let mut names = self.lock();
        if !names.contains_key(mac) {
            return Ok(());
        }
        let mut updated = names.clone();
        updated.remove(mac);
        self.write(&updated)?;
        *names = updated;
        Ok(())
    }
}

/// Non-persistent store, for tests and `--scan-once` runs
#[derive(Default)]
pub struct MemoryNameStore {
    names: Mutex<HashMap<MacAddress, String>>,
}

impl MemoryNameStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NameStore for MemoryNameStore {
    fn load(&self) -> Result<HashMap<MacAddress, String>, StoreError> {
        Ok(self.names.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn save(&self, mac: &MacAddress, name: &str) -> Result<(), StoreError> {
        self.names
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(*mac, name.to_string());
        Ok(())
    }

    fn remove(&self, mac: &MacAddress) -> Result<(), StoreError> {
        self.names.lock().unwrap_or_else(|e| e.into_inner()).remove(mac);
        Ok(())
    }
}

/// On-disk cache of known devices so lifecycle and identity survive restarts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceCache {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub devices: Vec<NetworkDevice>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl DeviceCache {
    pub fn new(devices: Vec<NetworkDevice>) -> Self {
        Self {
            version: default_version(),
            devices,
        }
    }

    /// Load the cache, or an empty one if the file doesn't exist
    pub fn load_or_default(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Ok(Self::new(Vec::new()));
        }
        let content = std::fs::read_to_string(path)?;
        let cache: DeviceCache = serde_json::from_str(&content)?;
        info!(path = %path.display(), devices = cache.devices.len(), "Loaded device cache");
        Ok(cache)
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::net::{IpAddr, Ipv4Addr};
    use tempfile::TempDir;

    fn mac(s: &str) -> MacAddress {
        s.parse().unwrap()
    }

    #[test]
    fn test_json_name_store_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("names").join("device_names.json");

        let store = JsonNameStore::open(&path).unwrap();
        assert!(store.load().unwrap().is_empty());
        store.save(&mac("aa:bb:cc:11:22:33"), "Kitchen Pi").unwrap();
        store.save(&mac("aa:bb:cc:11:22:44"), "Printer").unwrap();
        store.remove(&mac("aa:bb:cc:11:22:44")).unwrap();

        let reopened = JsonNameStore::open(&path).unwrap();
        let names = reopened.load().unwrap();
        assert_eq!(names.len(), 1);
        assert_eq!(names[&mac("AA:BB:CC:11:22:33")], "Kitchen Pi");

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"AA:BB:CC:11:22:33\""));
    }

    #[test]
    fn test_json_name_store_rejects_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("device_names.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(JsonNameStore::open(&path), Err(StoreError::Json(_))));
    }

    #[test]
    fn test_device_cache_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("devices.json");

        let mut device = NetworkDevice::new(
            mac("aa:bb:cc:11:22:33"),
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50)),
            Utc::now(),
        );
        device.vendor = Some("Acme Corp".into());
        DeviceCache::new(vec![device.clone()]).save(&path).unwrap();

        let loaded = DeviceCache::load_or_default(&path).unwrap();
        assert_eq!(loaded.devices, vec![device]);

        let missing = DeviceCache::load_or_default(&dir.path().join("nope.json")).unwrap();
        assert!(missing.devices.is_empty());
    }
}
