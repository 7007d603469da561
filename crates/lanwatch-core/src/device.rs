//! Device types for tracking hosts seen on the local network

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::error::MacParseError;

/// Hardware (datalink) address of a network interface.
///
/// Parsing accepts `:`, `-` and `.` separators in any case, single-digit
/// octets and bare 12-digit hex. Rendering is always uppercase and
/// colon-separated, which is the canonical device identity key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub const BROADCAST: MacAddress = MacAddress([0xFF; 6]);

    pub fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// The 24-bit organizationally unique identifier
    pub fn oui(&self) -> [u8; 3] {
        [self.0[0], self.0[1], self.0[2]]
    }

    /// Uppercase hex without separators, e.g. `AABBCC112233`
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02X}", b)).collect()
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }

    /// Group bit set (multicast or broadcast)
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 == 0x01
    }
}

impl FromStr for MacAddress {
    type Err = MacParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let err = || MacParseError(s.to_string());

        let groups: Vec<&str> = trimmed.split([':', '-', '.']).collect();
        let hex = match groups.len() {
            6 => {
                let mut out = String::with_capacity(12);
                for group in &groups {
                    if group.is_empty() || group.len() > 2 {
                        return Err(err());
                    }
                    if group.len() == 1 {
                        out.push('0');
                    }
                    out.push_str(group);
                }
                out
            }
            // Cisco style: aabb.ccdd.eeff
            3 if groups.iter().all(|g| g.len() == 4) => groups.concat(),
            1 if trimmed.len() == 12 => trimmed.to_string(),
            _ => return Err(err()),
        };

        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(err());
        }

        let mut octets = [0u8; 6];
        for (i, octet) in octets.iter_mut().enumerate() {
            *octet = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).map_err(|_| err())?;
        }
        Ok(Self(octets))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = MacParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.to_string()
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}", a, b, c, d, e, g)
    }
}

/// Device category inferred from identity data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    #[default]
    Unknown,
    Desktop,
    Laptop,
    Phone,
    Tablet,
    Tv,
    Speaker,
    Iot,
    Router,
    Printer,
    Camera,
    Gaming,
    Watch,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Unknown => "unknown",
            DeviceType::Desktop => "desktop",
            DeviceType::Laptop => "laptop",
            DeviceType::Phone => "phone",
            DeviceType::Tablet => "tablet",
            DeviceType::Tv => "tv",
            DeviceType::Speaker => "speaker",
            DeviceType::Iot => "iot",
            DeviceType::Router => "router",
            DeviceType::Printer => "printer",
            DeviceType::Camera => "camera",
            DeviceType::Gaming => "gaming",
            DeviceType::Watch => "watch",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The identity attribute a background resolution task looks up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Hostname,
    ServiceName,
    Vendor,
}

impl TaskKind {
    pub const ALL: [TaskKind; 3] = [TaskKind::Hostname, TaskKind::ServiceName, TaskKind::Vendor];
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskKind::Hostname => "hostname",
            TaskKind::ServiceName => "service-name",
            TaskKind::Vendor => "vendor",
        })
    }
}

/// Progress of one resolution task type for one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ResolutionState {
    /// Never attempted
    #[default]
    Unresolved,
    /// Queued or running
    Pending,
    /// Lookup completed with a definitive answer
    Resolved,
    /// Lookup timed out, errored or found nothing; retried after a cooldown
    Failed { at: DateTime<Utc> },
}

impl ResolutionState {
    /// Whether a new task of this kind may be enqueued
    pub fn is_due(&self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        match self {
            ResolutionState::Unresolved => true,
            ResolutionState::Failed { at } => now - *at >= cooldown,
            ResolutionState::Pending | ResolutionState::Resolved => false,
        }
    }
}

/// Per-task resolution bookkeeping stored on each device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResolutionStatus {
    pub hostname: ResolutionState,
    pub service_name: ResolutionState,
    pub vendor: ResolutionState,
}

impl ResolutionStatus {
    pub fn get(&self, kind: TaskKind) -> ResolutionState {
        match kind {
            TaskKind::Hostname => self.hostname,
            TaskKind::ServiceName => self.service_name,
            TaskKind::Vendor => self.vendor,
        }
    }

    pub fn set(&mut self, kind: TaskKind, state: ResolutionState) {
        match kind {
            TaskKind::Hostname => self.hostname = state,
            TaskKind::ServiceName => self.service_name = state,
            TaskKind::Vendor => self.vendor = state,
        }
    }

    /// Task kinds still needing a lookup
    pub fn due(&self, now: DateTime<Utc>, cooldown: Duration) -> Vec<TaskKind> {
        TaskKind::ALL
            .into_iter()
            .filter(|kind| self.get(*kind).is_due(now, cooldown))
            .collect()
    }

    /// Drop in-flight markers, e.g. after a restart
    pub fn reset_pending(&mut self) {
        for kind in TaskKind::ALL {
            if self.get(kind) == ResolutionState::Pending {
                self.set(kind, ResolutionState::Unresolved);
            }
        }
    }
}

/// Result of a completed identity lookup, written back into the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Reverse-DNS name
    Hostname(String),
    /// Service-discovery instance name and advertised service types
    Service {
        name: Option<String>,
        services: Vec<String>,
    },
    /// Manufacturer from the vendor table
    Vendor(String),
}

impl Resolution {
    pub fn kind(&self) -> TaskKind {
        match self {
            Resolution::Hostname(_) => TaskKind::Hostname,
            Resolution::Service { .. } => TaskKind::ServiceName,
            Resolution::Vendor(_) => TaskKind::Vendor,
        }
    }
}

/// A host seen on the local network, one per physical interface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkDevice {
    /// Identity key, immutable once created
    pub mac: MacAddress,
    /// Most recently observed IP address
    pub ip: IpAddr,
    /// Reverse-DNS name
    pub hostname: Option<String>,
    /// Service-discovery (mDNS) instance name
    pub service_name: Option<String>,
    /// Advertised service types, e.g. `_ipp._tcp`
    #[serde(default)]
    pub services: Vec<String>,
    pub vendor: Option<String>,
    #[serde(default)]
    pub device_type: DeviceType,
    pub os_hint: Option<String>,
    pub model_hint: Option<String>,
    /// User-assigned name, never written by automated resolution
    pub custom_name: Option<String>,
    pub online: bool,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// When the device last transitioned to offline
    #[serde(default)]
    pub offline_since: Option<DateTime<Utc>>,
    /// Consecutive completed scan cycles without an observation
    #[serde(default)]
    pub missed_cycles: u32,
    #[serde(default)]
    pub resolution: ResolutionStatus,
}

impl NetworkDevice {
    /// Create a freshly observed device
    pub fn new(mac: MacAddress, ip: IpAddr, now: DateTime<Utc>) -> Self {
        Self {
            mac,
            ip,
            hostname: None,
            service_name: None,
            services: Vec::new(),
            vendor: None,
            device_type: DeviceType::Unknown,
            os_hint: None,
            model_hint: None,
            custom_name: None,
            online: true,
            first_seen: now,
            last_seen: now,
            offline_since: None,
            missed_cycles: 0,
            resolution: ResolutionStatus::default(),
        }
    }

    /// Best human-facing name.
    ///
    /// Priority: custom name, service-discovery name, model hint, hostname
    /// (domain suffix stripped), vendor, then the IP address.
    pub fn display_name(&self) -> String {
        non_empty(&self.custom_name)
            .or_else(|| non_empty(&self.service_name))
            .or_else(|| non_empty(&self.model_hint))
            .or_else(|| self.short_hostname())
            .or_else(|| non_empty(&self.vendor))
            .map(str::to_string)
            .unwrap_or_else(|| self.ip.to_string())
    }

    /// Hostname without its trailing domain suffix
    pub fn short_hostname(&self) -> Option<&str> {
        let hostname = non_empty(&self.hostname)?;
        if hostname == self.ip.to_string() {
            return None;
        }
        hostname.split('.').next().filter(|s| !s.is_empty())
    }

    pub fn has_custom_name(&self) -> bool {
        non_empty(&self.custom_name).is_some()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}
