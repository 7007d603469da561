//! Discovery scanner that drives periodic scan cycles

use chrono::Utc;
use lanwatch_core::{
    ConfigError, DeviceRegistry, MacAddress, NetworkDevice, ProbeError, ResolutionState, StoreError,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::pool::{
    Enqueued, PoolConfig, ResolutionPool, Resolvers, PRIORITY_NEW, PRIORITY_RETRY, PRIORITY_UNRESOLVED,
};
use crate::probe::NeighborProbe;

/// Scanner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Seconds between scan cycles
    pub interval_secs: u64,
    /// Consecutive missed cycles tolerated before a device goes offline
    pub grace_period: u32,
    /// Upper bound on a single neighbor probe
    pub probe_timeout_secs: u64,
    /// Resolution worker pool settings
    pub pool: PoolConfig,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            grace_period: 2,
            probe_timeout_secs: 5,
            pool: PoolConfig::default(),
        }
    }
}

impl ScannerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grace_period == 0 {
            return Err(ConfigError::GracePeriod(self.grace_period));
        }
        if self.interval_secs == 0 {
            return Err(ConfigError::ZeroDuration("scan interval"));
        }
        if self.probe_timeout_secs == 0 {
            return Err(ConfigError::ZeroDuration("probe timeout"));
        }
        self.pool.validate()
    }
}

/// Discovery event for real-time updates
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// Scan started
    ScanStarted,
    /// Scan completed
    ScanCompleted { observed: usize, total: usize, new: usize },
    /// Probe produced no data; device state left untouched
    ScanSkipped { reason: String },
    /// Hardware address seen for the first time
    DeviceDiscovered(NetworkDevice),
    /// Known device seen again after being offline
    DeviceOnline(NetworkDevice),
    /// Device missed more cycles than the grace period allows
    DeviceOffline(NetworkDevice),
    /// Identity information or custom name changed
    DeviceUpdated(NetworkDevice),
    /// Device removed from registry
    DeviceRemoved(MacAddress),
}

/// Summary of one completed scan cycle
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub cycle: u64,
    pub observed: usize,
    pub new_devices: usize,
    pub went_offline: usize,
    pub enqueued: usize,
}

/// Discovery scanner service
pub struct DiscoveryScanner {
    config: ScannerConfig,
    registry: Arc<DeviceRegistry>,
    probe: Arc<dyn NeighborProbe>,
    pool: ResolutionPool,
    event_tx: broadcast::Sender<DiscoveryEvent>,
    scan_lock: Mutex<()>,
    rescan: Notify,
}

impl DiscoveryScanner {
    /// Create a scanner and start its resolution workers.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        config: ScannerConfig,
        registry: Arc<DeviceRegistry>,
        probe: Arc<dyn NeighborProbe>,
        resolvers: Resolvers,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let (event_tx, _) = broadcast::channel(256);
        let pool = ResolutionPool::start(config.pool.clone(), registry.clone(), resolvers, event_tx.clone())?;

        Ok(Self {
            config,
            registry,
            probe,
            pool,
            event_tx,
            scan_lock: Mutex::new(()),
            rescan: Notify::new(),
        })
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Subscribe to discovery events
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.event_tx.subscribe()
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn pool(&self) -> &ResolutionPool {
        &self.pool
    }

    /// Get current device list
    pub async fn devices(&self) -> Vec<NetworkDevice> {
        self.registry.snapshot().await
    }

    /// Run a single discovery scan.
    ///
    /// A failed or timed-out probe skips the cycle entirely: nothing is
    /// marked seen or missed.
    pub async fn scan_once(&self) -> Result<ScanReport, ProbeError> {
        let _guard = self.scan_lock.lock().await;
        let _ = self.event_tx.send(DiscoveryEvent::ScanStarted);

        let limit = Duration::from_secs(self.config.probe_timeout_secs);
        let probed = match tokio::time::timeout(limit, self.probe.probe()).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(limit)),
        };
        let neighbors = match probed {
            Ok(neighbors) => neighbors,
            Err(e) => {
                warn!(error = %e, "Neighbor probe failed, skipping scan cycle");
                let _ = self.event_tx.send(DiscoveryEvent::ScanSkipped { reason: e.to_string() });
                return Err(e);
            }
        };

        let cycle = self.registry.begin_cycle().await;
        let mut report = ScanReport {
            cycle,
            observed: neighbors.len(),
            ..Default::default()
        };

        let mut observed = Vec::with_capacity(neighbors.len());
        for neighbor in neighbors {
            let upserted = self.registry.upsert(neighbor.mac, neighbor.ip).await;
            if upserted.is_new {
                report.new_devices += 1;
                let _ = self.event_tx.send(DiscoveryEvent::DeviceDiscovered(upserted.device.clone()));
            } else if upserted.came_online {
                info!(mac = %neighbor.mac, ip = %neighbor.ip, "Device came back online");
                let _ = self.event_tx.send(DiscoveryEvent::DeviceOnline(upserted.device.clone()));
            }
            observed.push((upserted.device, upserted.is_new));
        }

        let offline = self
            .registry
            .mark_offline_if_stale(self.config.grace_period, Utc::now())
            .await;
        report.went_offline = offline.len();
        for device in offline {
            let _ = self.event_tx.send(DiscoveryEvent::DeviceOffline(device));
        }

        for (device, is_new) in &observed {
            report.enqueued += self.enqueue_due(device, *is_new).await;
        }

        let (online, total) = self.registry.counts().await;
        let _ = self.event_tx.send(DiscoveryEvent::ScanCompleted {
            observed: report.observed,
            total,
            new: report.new_devices,
        });

        info!(
            cycle = cycle,
            observed = report.observed,
            new = report.new_devices,
            offline = report.went_offline,
            queued = report.enqueued,
            online = online,
            total = total,
            "Scan complete"
        );

        Ok(report)
    }

    /// Queue every identity lookup the device still needs
    async fn enqueue_due(&self, device: &NetworkDevice, is_new: bool) -> usize {
        if device.has_custom_name() {
            return 0;
        }

        let due = device.resolution.due(Utc::now(), self.config.pool.retry_cooldown());
        let mut queued = 0;
        for kind in due {
            let priority = if is_new {
                PRIORITY_NEW
            } else if matches!(device.resolution.get(kind), ResolutionState::Failed { .. }) {
                PRIORITY_RETRY
            } else {
                PRIORITY_UNRESOLVED
            };

            match self.pool.enqueue(device.mac, kind, priority).await {
                Enqueued::Queued => queued += 1,
                Enqueued::NotDue => {}
                Enqueued::Closed => {
                    debug!(mac = %device.mac, "Resolution pool closed, not queueing");
                    break;
                }
            }
        }
        queued
    }

    /// Queue pending lookups for the given devices ahead of routine work,
    /// e.g. the ones currently on screen. Returns how many were queued.
    pub async fn request_resolution_for(&self, macs: &[MacAddress]) -> usize {
        let mut queued = 0;
        for mac in macs {
            let Some(device) = self.registry.get(mac).await else {
                continue;
            };
            queued += self.enqueue_due(&device, true).await;
        }
        debug!(requested = macs.len(), queued = queued, "Prioritized resolution");
        queued
    }

    /// Ask the run loop to scan now instead of waiting for the next tick
    pub fn request_rescan(&self) {
        self.rescan.notify_one();
    }

    /// Run continuous discovery until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = interval(Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.config.interval_secs,
            grace_period = self.config.grace_period,
            "Discovery scheduler started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
                _ = self.rescan.notified() => {
                    debug!("Rescan requested");
                    ticker.reset();
                }
            }

            // Errors are already logged and reported as ScanSkipped
            let _ = self.scan_once().await;
        }

        info!("Discovery scheduler stopped");
    }

    /// Set or clear (empty string) a user-assigned name
    pub async fn rename_device(&self, mac: MacAddress, name: &str) -> Result<Option<NetworkDevice>, StoreError> {
        self.registry.set_custom_name(mac, name).await?;
        let device = self.registry.get(&mac).await;
        if let Some(device) = &device {
            let _ = self.event_tx.send(DiscoveryEvent::DeviceUpdated(device.clone()));
        }
        Ok(device)
    }

    /// Forget a device. It is rediscovered as new if it shows up again.
    pub async fn remove_device(&self, mac: &MacAddress) -> Option<NetworkDevice> {
        let removed = self.registry.remove(mac).await?;
        let _ = self.event_tx.send(DiscoveryEvent::DeviceRemoved(*mac));
        Some(removed)
    }

    /// Wait for queued identity lookups to drain
    pub async fn wait_for_resolution(&self, limit: Duration) -> bool {
        self.pool.wait_idle(limit).await
    }

    /// Stop the resolution workers
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}
