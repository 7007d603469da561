//! mDNS / DNS-SD service discovery for device names and service classes

use async_trait::async_trait;
use lanwatch_core::LookupError;
use mdns_sd::{ServiceDaemon, ServiceEvent};
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace};

/// Service types browsed by default, in name-preference order
pub const DEFAULT_SERVICE_TYPES: &[&str] = &[
    "_companion-link._tcp",
    "_airplay._tcp",
    "_raop._tcp",
    "_googlecast._tcp",
    "_spotify-connect._tcp",
    "_hap._tcp",
    "_printer._tcp",
    "_ipp._tcp",
    "_ipps._tcp",
    "_smb._tcp",
    "_ssh._tcp",
];

/// What a host advertises over service discovery
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredServices {
    /// Instance name, e.g. "Living Room"
    pub name: Option<String>,
    /// Service types, e.g. `_airplay._tcp`
    pub services: Vec<String>,
}

impl DiscoveredServices {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.services.is_empty()
    }
}

/// Service discovery query for a single host
#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    async fn query_services(&self, ip: IpAddr) -> Result<DiscoveredServices, LookupError>;
}

/// Browses a fixed set of service types for a bounded window and keeps
/// the instances resolving to the target address
pub struct MdnsServiceQuery {
    service_types: Vec<String>,
    window: Duration,
}

impl MdnsServiceQuery {
    pub fn new(window: Duration) -> Self {
        Self::with_service_types(DEFAULT_SERVICE_TYPES.iter().map(|s| s.to_string()).collect(), window)
    }

    pub fn with_service_types(service_types: Vec<String>, window: Duration) -> Self {
        Self { service_types, window }
    }
}

#[async_trait]
impl ServiceDiscovery for MdnsServiceQuery {
    async fn query_services(&self, ip: IpAddr) -> Result<DiscoveredServices, LookupError> {
        let daemon = ServiceDaemon::new().map_err(|e| LookupError::Failed(format!("mDNS daemon: {}", e)))?;
        let deadline = Instant::now() + self.window;
        let mut tasks = JoinSet::new();

        for service_type in &self.service_types {
            let full_type = format!("{}.local.", service_type);
            let receiver = match daemon.browse(&full_type) {
                Ok(receiver) => receiver,
                Err(e) => {
                    debug!(service = %service_type, error = %e, "Failed to browse service type");
                    continue;
                }
            };

            let service_type = service_type.clone();
            tasks.spawn(async move {
                loop {
                    match timeout_at(deadline, receiver.recv_async()).await {
                        Ok(Ok(ServiceEvent::ServiceResolved(info))) => {
                            if info.get_addresses().contains(&ip) {
                                let name = instance_name(info.get_fullname(), &full_type);
                                return Some((service_type, name));
                            }
                        }
                        Ok(Ok(_)) => continue,
                        Ok(Err(_)) | Err(_) => return None,
                    }
                }
            });
        }

        let mut found: HashMap<String, String> = HashMap::new();
        while let Some(result) = tasks.join_next().await {
            if let Ok(Some((service_type, name))) = result {
                trace!(ip = %ip, service = %service_type, name = %name, "mDNS instance matched");
                found.insert(service_type, name);
            }
        }

        for service_type in &self.service_types {
            let _ = daemon.stop_browse(&format!("{}.local.", service_type));
        }
        let _ = daemon.shutdown();

        Ok(merge_matches(&self.service_types, found))
    }
}

/// Order services and pick the instance name by configured preference
fn merge_matches(order: &[String], mut found: HashMap<String, String>) -> DiscoveredServices {
    let mut result = DiscoveredServices::default();
    for service_type in order {
        if let Some(name) = found.remove(service_type) {
            if result.name.is_none() && !name.is_empty() {
                result.name = Some(name);
            }
            result.services.push(service_type.clone());
        }
    }
    result
}

/// "Living Room._airplay._tcp.local." -> "Living Room"
fn instance_name(fullname: &str, full_type: &str) -> String {
    fullname
        .strip_suffix(full_type)
        .map(|s| s.trim_end_matches('.'))
        .unwrap_or(fullname)
        .to_string()
}
