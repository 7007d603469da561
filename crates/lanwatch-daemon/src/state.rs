//! Application state management

use anyhow::{Context, Result};
use async_trait::async_trait;
use lanwatch_core::{DeviceCache, DeviceRegistry, JsonNameStore, LookupError, VendorDatabase};
use lanwatch_discovery::{
    ArpTableProbe, DiscoveredServices, DiscoveryScanner, HostnameChain, MdnsServiceQuery,
    Resolvers, ServiceDiscovery,
};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;

/// Upper bound on reading the OUI reference table at startup
const VENDOR_LOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Stand-in when mDNS is disabled
struct NoServiceDiscovery;

#[async_trait]
impl ServiceDiscovery for NoServiceDiscovery {
    async fn query_services(&self, _ip: IpAddr) -> Result<DiscoveredServices, LookupError> {
        Ok(DiscoveredServices::default())
    }
}

/// Shared application state
pub struct AppState {
    /// Discovery scanner
    pub scanner: Arc<DiscoveryScanner>,
    devices_path: PathBuf,
}

impl AppState {
    /// Create new application state
    pub async fn new(config: Config) -> Result<Arc<Self>> {
        let vendors = load_vendors(&config).await;

        let names = JsonNameStore::open(&config.storage.names_path)
            .with_context(|| format!("opening {}", config.storage.names_path.display()))?;
        let registry = Arc::new(DeviceRegistry::new(Arc::new(names)));

        let devices_path = config.storage.devices_path.clone();
        match DeviceCache::load_or_default(&devices_path) {
            Ok(cache) => registry.restore(cache.devices).await,
            Err(e) => warn!(path = %devices_path.display(), error = %e, "Ignoring unreadable device cache"),
        }

        let services: Arc<dyn ServiceDiscovery> = if config.resolution.mdns {
            Arc::new(MdnsServiceQuery::new(Duration::from_millis(config.resolution.mdns_window_ms)))
        } else {
            Arc::new(NoServiceDiscovery)
        };
        let hostnames = HostnameChain::from_names(&config.resolution.hostname_tools)?;
        info!(strategies = ?hostnames.strategy_names(), mdns = config.resolution.mdns, "Resolvers configured");

        let resolvers = Resolvers {
            hostnames: Arc::new(hostnames),
            services,
            vendors: Arc::new(vendors),
        };

        let scanner = Arc::new(DiscoveryScanner::new(
            config.to_scanner_config(),
            registry,
            Arc::new(ArpTableProbe::new()),
            resolvers,
        )?);

        Ok(Arc::new(Self { scanner, devices_path }))
    }

    /// Persist the device list so the next run starts with it
    pub async fn save_devices(&self) -> Result<()> {
        let cache = DeviceCache::new(self.scanner.devices().await);
        let count = cache.devices.len();
        cache
            .save(&self.devices_path)
            .with_context(|| format!("writing {}", self.devices_path.display()))?;
        info!(path = %self.devices_path.display(), devices = count, "Saved device cache");
        Ok(())
    }
}

async fn load_vendors(config: &Config) -> VendorDatabase {
    let paths = config.vendors.oui_paths.clone();
    let loading = tokio::task::spawn_blocking(move || {
        if paths.is_empty() {
            VendorDatabase::load_default()
        } else {
            VendorDatabase::load(&paths)
        }
    });

    match tokio::time::timeout(VENDOR_LOAD_TIMEOUT, loading).await {
        Ok(Ok(vendors)) => {
            info!(entries = vendors.len(), source = ?vendors.source(), "Vendor database ready");
            vendors
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Vendor database load failed, using built-in table");
            VendorDatabase::builtin()
        }
        Err(_) => {
            warn!("Vendor database load timed out, using built-in table");
            VendorDatabase::builtin()
        }
    }
}
