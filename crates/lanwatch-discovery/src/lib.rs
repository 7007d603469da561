//! Lanwatch Discovery - Scanning and identification of local network devices
//!
//! This crate provides the moving parts around the core registry:
//! - Neighbor probing from the kernel ARP cache
//! - Hostname resolution over reverse DNS and multicast DNS
//! - mDNS service discovery for friendly names and device classes
//! - A bounded, prioritized pool of background resolution workers
//! - The scan orchestrator tying cycles, offline detection and events together

pub mod arp;
pub mod mdns;
pub mod pool;
pub mod probe;
pub mod resolve;
pub mod scanner;

pub use arp::ArpTableProbe;
pub use mdns::{DiscoveredServices, MdnsServiceQuery, ServiceDiscovery};
pub use pool::{Enqueued, PoolConfig, ResolutionPool, Resolvers};
pub use probe::{Neighbor, NeighborProbe};
pub use resolve::{HostnameChain, HostnameResolver};
pub use scanner::{DiscoveryEvent, DiscoveryScanner, ScanReport, ScannerConfig};
