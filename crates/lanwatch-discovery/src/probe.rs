//! Neighbor probing interface

use async_trait::async_trait;
use lanwatch_core::{MacAddress, ProbeError};
use std::net::IpAddr;

/// A host currently reachable on the local link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Neighbor {
    pub mac: MacAddress,
    pub ip: IpAddr,
}

impl Neighbor {
    pub fn new(mac: MacAddress, ip: IpAddr) -> Self {
        Self { mac, ip }
    }
}

/// Source of (hardware address, IP) pairs for one discovery cycle.
///
/// An error means "no data this cycle", never "no devices".
#[async_trait]
pub trait NeighborProbe: Send + Sync {
    async fn probe(&self) -> Result<Vec<Neighbor>, ProbeError>;
}
