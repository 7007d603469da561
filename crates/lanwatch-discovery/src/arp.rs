//! ARP table reader used as the default neighbor probe

use async_trait::async_trait;
use lanwatch_core::{MacAddress, ProbeError};
use network_interface::{NetworkInterface, NetworkInterfaceConfig};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, trace};

use crate::probe::{Neighbor, NeighborProbe};

/// ARP table entry
#[derive(Debug, Clone)]
pub struct ArpEntry {
    pub ip: Ipv4Addr,
    pub mac: String,
    pub interface: String,
    pub state: ArpState,
}

/// ARP entry state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpState {
    Reachable,
    Stale,
    Delay,
    Probe,
    Failed,
    Incomplete,
    Permanent,
    Unknown,
}

impl ArpEntry {
    /// Hardware address if the entry resolved to a usable unicast address
    fn usable_mac(&self) -> Option<MacAddress> {
        if matches!(self.state, ArpState::Failed | ArpState::Incomplete) {
            return None;
        }
        let mac = MacAddress::from_str(&self.mac).ok()?;
        if mac.is_zero() || mac.is_multicast() {
            return None;
        }
        Some(mac)
    }
}

/// Neighbor probe backed by the kernel ARP cache.
///
/// Reads `ip neigh show`, falling back to `arp -an` where the `ip` tool is
/// not installed. The host's own interfaces are filtered out.
pub struct ArpTableProbe {
    own_macs: HashSet<MacAddress>,
}

impl ArpTableProbe {
    pub fn new() -> Self {
        let own_macs = local_mac_addresses();
        debug!(count = own_macs.len(), "Collected local interface addresses");
        Self { own_macs }
    }

    async fn read_table(&self) -> Result<Vec<ArpEntry>, ProbeError> {
        match run_tool("ip", &["neigh", "show"]).await {
            Ok(stdout) => Ok(stdout.lines().filter_map(parse_ip_neigh_line).collect()),
            Err(ProbeError::ToolMissing(_)) => {
                debug!("`ip` not available, reading ARP table with `arp -an`");
                let stdout = run_tool("arp", &["-an"]).await?;
                Ok(stdout.lines().filter_map(parse_arp_an_line).collect())
            }
            Err(e) => Err(e),
        }
    }

    fn to_neighbors(&self, entries: Vec<ArpEntry>) -> Vec<Neighbor> {
        let mut seen = HashSet::new();
        let mut neighbors = Vec::new();

        for entry in entries {
            let Some(mac) = entry.usable_mac() else {
                trace!(ip = %entry.ip, interface = %entry.interface, state = ?entry.state, "Skipping unresolved ARP entry");
                continue;
            };
            if self.own_macs.contains(&mac) || !is_host_address(entry.ip) {
                trace!(ip = %entry.ip, interface = %entry.interface, mac = %mac, "Skipping local or non-host ARP entry");
                continue;
            }
            // One record per interface even if it answers on several IPs
            if seen.insert(mac) {
                neighbors.push(Neighbor::new(mac, IpAddr::V4(entry.ip)));
            }
        }
        neighbors
    }
}

impl Default for ArpTableProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NeighborProbe for ArpTableProbe {
    async fn probe(&self) -> Result<Vec<Neighbor>, ProbeError> {
        let entries = self.read_table().await?;
        let total = entries.len();
        let neighbors = self.to_neighbors(entries);
        debug!(entries = total, neighbors = neighbors.len(), "Read ARP table");
        Ok(neighbors)
    }
}

async fn run_tool(program: &str, args: &[&str]) -> Result<String, ProbeError> {
    let output = match Command::new(program).args(args).kill_on_drop(true).output().await {
        Ok(output) => output,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ProbeError::ToolMissing(program.to_string()))
        }
        Err(e) => return Err(e.into()),
    };

    if !output.status.success() {
        return Err(ProbeError::Failed(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Excludes multicast, broadcast and unspecified addresses
fn is_host_address(ip: Ipv4Addr) -> bool {
    !(ip.is_multicast() || ip.is_broadcast() || ip.is_unspecified() || ip.octets()[3] == 255)
}

fn local_mac_addresses() -> HashSet<MacAddress> {
    match NetworkInterface::show() {
        Ok(interfaces) => interfaces
            .into_iter()
            .filter_map(|iface| iface.mac_addr)
            .filter_map(|mac| MacAddress::from_str(&mac).ok())
            .filter(|mac| !mac.is_zero())
            .collect(),
        Err(e) => {
            debug!(error = %e, "Failed to enumerate local interfaces");
            HashSet::new()
        }
    }
}

/// Parse a line from `ip neigh show` output
fn parse_ip_neigh_line(line: &str) -> Option<ArpEntry> {
    // Format: "192.168.1.1 dev eth0 lladdr aa:bb:cc:dd:ee:ff REACHABLE"
    let parts: Vec<&str> = line.split_whitespace().collect();

    if parts.len() < 4 {
        return None;
    }

    // IPv6 neighbors are skipped
    let ip = Ipv4Addr::from_str(parts[0]).ok()?;

    let dev_idx = parts.iter().position(|&p| p == "dev")?;
    let lladdr_idx = parts.iter().position(|&p| p == "lladdr");

    let interface = parts.get(dev_idx + 1)?.to_string();

    // MAC might not be present for INCOMPLETE entries
    let mac = lladdr_idx
        .and_then(|idx| parts.get(idx + 1))
        .map(|s| s.to_string())
        .unwrap_or_default();

    let state = parts.last().map(|s| parse_arp_state(s)).unwrap_or(ArpState::Unknown);

    Some(ArpEntry { ip, mac, interface, state })
}

/// Parse a line from BSD-style `arp -an` output
fn parse_arp_an_line(line: &str) -> Option<ArpEntry> {
    // Format: "? (192.168.1.1) at 0:11:22:33:44:55 on en0 ifscope [ethernet]"
    let open = line.find('(')?;
    let close = line[open..].find(')')? + open;
    let ip = Ipv4Addr::from_str(&line[open + 1..close]).ok()?;

    let parts: Vec<&str> = line[close + 1..].split_whitespace().collect();
    let at_idx = parts.iter().position(|&p| p == "at")?;
    let mac = parts.get(at_idx + 1)?.to_string();
    let interface = parts
        .iter()
        .position(|&p| p == "on")
        .and_then(|idx| parts.get(idx + 1))
        .map(|s| s.to_string())
        .unwrap_or_default();

    let state = if mac.eq_ignore_ascii_case("(incomplete)") || mac.eq_ignore_ascii_case("<incomplete>") {
        ArpState::Incomplete
    } else if line.contains("permanent") {
        ArpState::Permanent
    } else {
        ArpState::Unknown
    };

    Some(ArpEntry { ip, mac, interface, state })
}

/// Parse ARP state string
fn parse_arp_state(s: &str) -> ArpState {
    match s.to_uppercase().as_str() {
        "REACHABLE" => ArpState::Reachable,
        "STALE" => ArpState::Stale,
        "DELAY" => ArpState::Delay,
        "PROBE" => ArpState::Probe,
        "FAILED" => ArpState::Failed,
        "INCOMPLETE" => ArpState::Incomplete,
        "PERMANENT" => ArpState::Permanent,
        _ => ArpState::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe_with_own(own: &[&str]) -> ArpTableProbe {
        ArpTableProbe {
            own_macs: own.iter().map(|m| m.parse().unwrap()).collect(),
        }
    }

    #[test]
    fn test_parse_ip_neigh_line_reachable() {
        let line = "192.168.1.100 dev eth0 lladdr aa:bb:cc:dd:ee:ff REACHABLE";
        let entry = parse_ip_neigh_line(line).unwrap();
        assert_eq!(entry.ip, Ipv4Addr::new(192, 168, 1, 100));
        assert_eq!(entry.mac, "aa:bb:cc:dd:ee:ff");
        assert_eq!(entry.interface, "eth0");
        assert_eq!(entry.state, ArpState::Reachable);
    }

    #[test]
    fn test_parse_ip_neigh_line_stale() {
        let line = "192.168.1.100 dev eth0 lladdr aa:bb:cc:dd:ee:ff STALE";
        let entry = parse_ip_neigh_line(line).unwrap();
        assert_eq!(entry.state, ArpState::Stale);
    }

    #[test]
    fn test_parse_incomplete_line() {
        let line = "192.168.1.100 dev eth0 INCOMPLETE";
        let entry = parse_ip_neigh_line(line).unwrap();
        assert_eq!(entry.ip, Ipv4Addr::new(192, 168, 1, 100));
        assert_eq!(entry.mac, "");
        assert_eq!(entry.state, ArpState::Incomplete);
        assert!(entry.usable_mac().is_none());
    }

    #[test]
    fn test_parse_too_short_and_ipv6() {
        assert!(parse_ip_neigh_line("192.168.1.100 dev").is_none());
        assert!(parse_ip_neigh_line("fe80::1 dev eth0 lladdr aa:bb:cc:dd:ee:ff router STALE").is_none());
    }

    #[test]
    fn test_parse_arp_an_bsd() {
        let line = "? (192.168.1.1) at 0:11:22:33:44:55 on en0 ifscope [ethernet]";
        let entry = parse_arp_an_line(line).unwrap();
        assert_eq!(entry.ip, Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(entry.interface, "en0");
        assert_eq!(entry.usable_mac().unwrap().to_string(), "00:11:22:33:44:55");
    }

    #[test]
    fn test_parse_arp_an_incomplete_and_linux() {
        let entry = parse_arp_an_line("? (192.168.1.7) at (incomplete) on en0 ifscope [ethernet]").unwrap();
        assert_eq!(entry.state, ArpState::Incomplete);

        let entry = parse_arp_an_line("? (10.0.0.2) at 52:54:00:12:34:56 [ether] on eth0").unwrap();
        assert_eq!(entry.interface, "eth0");
        assert_eq!(entry.state, ArpState::Unknown);
        assert!(entry.usable_mac().is_some());

        assert!(parse_arp_an_line("garbage").is_none());
    }

    #[test]
    fn test_to_neighbors_filters() {
        let probe = probe_with_own(&["02:00:00:00:00:01"]);
        let table = "\
192.168.1.1 dev eth0 lladdr aa:bb:cc:00:00:01 REACHABLE
192.168.1.2 dev eth0 lladdr 02:00:00:00:00:01 REACHABLE
192.168.1.3 dev eth0 lladdr ff:ff:ff:ff:ff:ff PERMANENT
192.168.1.255 dev eth0 lladdr aa:bb:cc:00:00:02 STALE
224.0.0.251 dev eth0 lladdr 01:00:5e:00:00:fb PERMANENT
192.168.1.4 dev eth0 FAILED
192.168.1.5 dev eth0 lladdr aa:bb:cc:00:00:03 STALE
192.168.1.6 dev wlan0 lladdr aa:bb:cc:00:00:03 STALE";
        let entries: Vec<ArpEntry> = table.lines().filter_map(parse_ip_neigh_line).collect();
        let neighbors = probe.to_neighbors(entries);

        let macs: Vec<String> = neighbors.iter().map(|n| n.mac.to_string()).collect();
        assert_eq!(macs, vec!["AA:BB:CC:00:00:01", "AA:BB:CC:00:00:03"]);
        assert_eq!(neighbors[1].ip, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 5)));
    }
}
