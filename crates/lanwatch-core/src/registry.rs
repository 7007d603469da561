//! Device registry: the authoritative map of known devices
//!
//! All state lives behind a single lock that is only held for map reads and
//! writes. Callers performing slow work (probing, DNS, mDNS) copy what they
//! need out, release the lock, and write results back afterwards.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::device::{MacAddress, NetworkDevice, Resolution, ResolutionState, TaskKind};
use crate::error::StoreError;
use crate::inference::infer;
use crate::store::NameStore;

/// Outcome of recording an observation
#[derive(Debug, Clone)]
pub struct Upserted {
    /// Copy of the device after the update
    pub device: NetworkDevice,
    /// The hardware address had never been seen before
    pub is_new: bool,
    /// The device was offline and is now back
    pub came_online: bool,
}

#[derive(Default)]
struct RegistryState {
    devices: HashMap<MacAddress, NetworkDevice>,
    /// Custom names by address, including devices not yet observed
    custom_names: HashMap<MacAddress, String>,
    /// Addresses observed during the current scan cycle
    seen_this_cycle: HashSet<MacAddress>,
    cycles: u64,
}

/// Thread-safe registry of network devices keyed by hardware address
pub struct DeviceRegistry {
    state: RwLock<RegistryState>,
    names: Arc<dyn NameStore>,
}

impl DeviceRegistry {
    /// Create a registry, loading persisted custom names from the store
    pub fn new(names: Arc<dyn NameStore>) -> Self {
        let custom_names = match names.load() {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(error = %e, "Failed to load custom device names, starting without them");
                HashMap::new()
            }
        };

        Self {
            state: RwLock::new(RegistryState {
                custom_names,
                ..Default::default()
            }),
            names,
        }
    }

    /// Seed the registry with devices from a previous run.
    ///
    /// Restored devices start offline and their in-flight task markers are
    /// cleared; they come back online on their next observation.
    pub async fn restore(&self, devices: Vec<NetworkDevice>) {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let mut restored = 0;

        for mut device in devices {
            if state.devices.contains_key(&device.mac) {
                continue;
            }
            if device.online {
                device.online = false;
                device.offline_since = Some(now);
            }
            device.resolution.reset_pending();
            if device.last_seen < device.first_seen {
                device.last_seen = device.first_seen;
            }
            device.custom_name = state.custom_names.get(&device.mac).cloned();
            state.devices.insert(device.mac, device);
            restored += 1;
        }

        info!(count = restored, "Restored known devices");
    }

    /// Start a new scan cycle. Must be called before the cycle's upserts.
    pub async fn begin_cycle(&self) -> u64 {
        let mut state = self.state.write().await;
        state.cycles += 1;
        state.seen_this_cycle.clear();
        state.cycles
    }

    /// Number of cycles started so far
    pub async fn cycle(&self) -> u64 {
        self.state.read().await.cycles
    }

    /// Record that `mac` was observed at `ip`
    pub async fn upsert(&self, mac: MacAddress, ip: IpAddr) -> Upserted {
        self.upsert_at(mac, ip, Utc::now()).await
    }

    /// Record an observation with an explicit timestamp
    pub async fn upsert_at(&self, mac: MacAddress, ip: IpAddr, now: DateTime<Utc>) -> Upserted {
        let mut state = self.state.write().await;
        state.seen_this_cycle.insert(mac);
        let custom_name = state.custom_names.get(&mac).cloned();

        if let Some(device) = state.devices.get_mut(&mac) {
            let came_online = !device.online;
            if device.ip != ip {
                debug!(mac = %mac, old = %device.ip, new = %ip, "Device changed IP address");
                device.ip = ip;
            }
            if now > device.last_seen {
                device.last_seen = now;
            }
            device.online = true;
            device.offline_since = None;
            device.missed_cycles = 0;
            return Upserted {
                device: device.clone(),
                is_new: false,
                came_online,
            };
        }

        let mut device = NetworkDevice::new(mac, ip, now);
        device.custom_name = custom_name;
        state.devices.insert(mac, device.clone());
        info!(mac = %mac, ip = %ip, "New device discovered");

        Upserted {
            device,
            is_new: true,
            came_online: false,
        }
    }

    /// Close the current cycle: devices not observed in it accumulate a
    /// missed cycle and go offline once `grace_period` consecutive misses
    /// are reached. Returns the devices that transitioned to offline.
    pub async fn mark_offline_if_stale(&self, grace_period: u32, now: DateTime<Utc>) -> Vec<NetworkDevice> {
        let mut state = self.state.write().await;
        let RegistryState {
            devices,
            seen_this_cycle,
            ..
        } = &mut *state;

        let mut went_offline = Vec::new();
        for device in devices.values_mut() {
            if seen_this_cycle.contains(&device.mac) {
                continue;
            }
            device.missed_cycles = device.missed_cycles.saturating_add(1);
            if device.online && device.missed_cycles >= grace_period {
                device.online = false;
                device.offline_since = Some(now);
                info!(
                    mac = %device.mac,
                    ip = %device.ip,
                    missed = device.missed_cycles,
                    "Device went offline"
                );
                went_offline.push(device.clone());
            }
        }
        went_offline
    }

    /// Atomically claim a task: if `kind` is due for `mac`, mark it pending
    /// and return the address to look up. `None` means the device is gone,
    /// the task is already pending/resolved, or still cooling down.
    pub async fn try_mark_pending(
        &self,
        mac: &MacAddress,
        kind: TaskKind,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> Option<IpAddr> {
        let mut state = self.state.write().await;
        let device = state.devices.get_mut(mac)?;
        if !device.resolution.get(kind).is_due(now, cooldown) {
            return None;
        }
        device.resolution.set(kind, ResolutionState::Pending);
        Some(device.ip)
    }

    /// Current lookup target for a device
    pub async fn ip_of(&self, mac: &MacAddress) -> Option<IpAddr> {
        self.state.read().await.devices.get(mac).map(|d| d.ip)
    }

    /// Write a resolved identity field.
    ///
    /// While the device carries a custom name the value is discarded and the
    /// task goes back to unresolved, so clearing the name lets the lookup run
    /// again. Results for devices that no longer exist are dropped. Returns
    /// the updated device when a field was written.
    pub async fn apply_resolution(&self, mac: &MacAddress, resolution: Resolution) -> Option<NetworkDevice> {
        let mut state = self.state.write().await;
        let Some(device) = state.devices.get_mut(mac) else {
            debug!(mac = %mac, kind = %resolution.kind(), "Dropping resolution for removed device");
            return None;
        };

        if device.has_custom_name() {
            debug!(mac = %mac, kind = %resolution.kind(), "Custom name set, ignoring resolution");
            device.resolution.set(resolution.kind(), ResolutionState::Unresolved);
            return None;
        }
        device.resolution.set(resolution.kind(), ResolutionState::Resolved);

        match resolution {
            Resolution::Hostname(hostname) => device.hostname = Some(hostname),
            Resolution::Service { name, services } => {
                if name.is_some() {
                    device.service_name = name;
                }
                for service in services {
                    if !device.services.contains(&service) {
                        device.services.push(service);
                    }
                }
            }
            Resolution::Vendor(vendor) => device.vendor = Some(vendor),
        }
        reinfer(device);
        Some(device.clone())
    }

    /// Mark a task as finished without data that will not change on retry
    pub async fn mark_task_resolved(&self, mac: &MacAddress, kind: TaskKind) {
        self.set_task_state(mac, kind, ResolutionState::Resolved).await;
    }

    /// Mark a task as failed; it becomes due again after the cooldown
    pub async fn mark_task_failed(&self, mac: &MacAddress, kind: TaskKind, now: DateTime<Utc>) {
        self.set_task_state(mac, kind, ResolutionState::Failed { at: now }).await;
    }

    /// Return a claimed-but-never-run task to the unresolved state
    pub async fn reset_task(&self, mac: &MacAddress, kind: TaskKind) {
        let mut state = self.state.write().await;
        if let Some(device) = state.devices.get_mut(mac) {
            if device.resolution.get(kind) == ResolutionState::Pending {
                device.resolution.set(kind, ResolutionState::Unresolved);
            }
        }
    }

    async fn set_task_state(&self, mac: &MacAddress, kind: TaskKind, new_state: ResolutionState) {
        let mut state = self.state.write().await;
        if let Some(device) = state.devices.get_mut(mac) {
            device.resolution.set(kind, new_state);
        }
    }

    /// Assign a user name. Persisted first; the registry is only updated
    /// when the store accepted it.
    pub async fn set_custom_name(&self, mac: MacAddress, name: &str) -> Result<(), StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return self.clear_custom_name(mac).await;
        }

        self.names.save(&mac, name)?;

        let mut state = self.state.write().await;
        state.custom_names.insert(mac, name.to_string());
        if let Some(device) = state.devices.get_mut(&mac) {
            device.custom_name = Some(name.to_string());
        }
        info!(mac = %mac, name = %name, "Custom device name set");
        Ok(())
    }

    /// Remove a user name, letting automated identity show through again
    pub async fn clear_custom_name(&self, mac: MacAddress) -> Result<(), StoreError> {
        self.names.remove(&mac)?;

        let mut state = self.state.write().await;
        state.custom_names.remove(&mac);
        if let Some(device) = state.devices.get_mut(&mac) {
            device.custom_name = None;
        }
        info!(mac = %mac, "Custom device name cleared");
        Ok(())
    }

    /// Forget a device entirely. Its custom name, if any, is kept.
    pub async fn remove(&self, mac: &MacAddress) -> Option<NetworkDevice> {
        let removed = self.state.write().await.devices.remove(mac);
        if removed.is_some() {
            info!(mac = %mac, "Device removed from registry");
        }
        removed
    }

    pub async fn get(&self, mac: &MacAddress) -> Option<NetworkDevice> {
        self.state.read().await.devices.get(mac).cloned()
    }

    /// Deep copy of all devices, ordered by IP address then hardware address
    pub async fn snapshot(&self) -> Vec<NetworkDevice> {
        let mut devices: Vec<NetworkDevice> = self.state.read().await.devices.values().cloned().collect();
        devices.sort_by(|a, b| a.ip.cmp(&b.ip).then_with(|| a.mac.cmp(&b.mac)));
        devices
    }

    /// (online, total)
    pub async fn counts(&self) -> (usize, usize) {
        let state = self.state.read().await;
        let online = state.devices.values().filter(|d| d.online).count();
        (online, state.devices.len())
    }
}

/// Refresh type, OS and model hints from the current identity fields.
/// A known category is never downgraded to unknown.
fn reinfer(device: &mut NetworkDevice) {
    let inferred = infer(
        device.vendor.as_deref(),
        device.hostname.as_deref(),
        &device.services,
        device.service_name.as_deref(),
    );
    if inferred.device_type != crate::device::DeviceType::Unknown {
        device.device_type = inferred.device_type;
    }
    if let Some(os) = inferred.os_hint {
        device.os_hint = Some(os.to_string());
    }
    if let Some(model) = inferred.model_hint {
        device.model_hint = Some(model.to_string());
    }
}
