//! Reverse-DNS hostname resolution
//!
//! Several independent strategies are tried in order until one produces a
//! name: the system resolver (getnameinfo), the `host` tool and
//! `avahi-resolve-address` for multicast DNS names.

use async_trait::async_trait;
use lanwatch_core::{ConfigError, LookupError};
use std::io::ErrorKind;
use std::net::IpAddr;
use std::process::Output;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, trace};

/// One way of turning an IP address into a hostname
#[async_trait]
pub trait HostnameResolver: Send + Sync {
    /// Short strategy name used in configuration and logs
    fn name(&self) -> &'static str;

    /// `Ok(None)` means the lookup worked but there is no name
    async fn resolve_hostname(&self, ip: IpAddr) -> Result<Option<String>, LookupError>;
}

/// The platform resolver via getnameinfo
pub struct SystemResolver;

#[async_trait]
impl HostnameResolver for SystemResolver {
    fn name(&self) -> &'static str {
        "system"
    }

    async fn resolve_hostname(&self, ip: IpAddr) -> Result<Option<String>, LookupError> {
        let result = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&ip))
            .await
            .map_err(|e| LookupError::Failed(format!("resolver task failed: {}", e)))?;

        match result {
            Ok(name) => Ok(clean_hostname(&name, ip)),
            Err(e) => {
                trace!(ip = %ip, error = %e, "getnameinfo returned no name");
                Ok(None)
            }
        }
    }
}

/// `host <ip>` PTR lookup
pub struct HostCommandResolver;

#[async_trait]
impl HostnameResolver for HostCommandResolver {
    fn name(&self) -> &'static str {
        "host"
    }

    async fn resolve_hostname(&self, ip: IpAddr) -> Result<Option<String>, LookupError> {
        let output = run_command("host", &[&ip.to_string()]).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        if !output.status.success() {
            if stdout.contains("not found") || stdout.contains("NXDOMAIN") {
                return Ok(None);
            }
            return Err(LookupError::Failed(format!(
                "host exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(parse_host_output(&stdout).and_then(|name| clean_hostname(&name, ip)))
    }
}

/// `avahi-resolve-address <ip>` multicast DNS lookup
pub struct AvahiResolver;

#[async_trait]
impl HostnameResolver for AvahiResolver {
    fn name(&self) -> &'static str {
        "avahi"
    }

    async fn resolve_hostname(&self, ip: IpAddr) -> Result<Option<String>, LookupError> {
        let output = run_command("avahi-resolve-address", &[&ip.to_string()]).await?;
        if !output.status.success() {
            // "Failed to resolve address" is the normal no-answer case
            return Ok(None);
        }
        avahi_hostname(&String::from_utf8_lossy(&output.stdout), ip)
    }
}

/// Ordered list of strategies tried until one yields a name
pub struct HostnameChain {
    strategies: Vec<Arc<dyn HostnameResolver>>,
}

impl HostnameChain {
    pub fn new(strategies: Vec<Arc<dyn HostnameResolver>>) -> Self {
        Self { strategies }
    }

    /// Build a chain from strategy names (`system`, `host`, `avahi`)
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, ConfigError> {
        let strategies = names
            .iter()
            .map(|name| strategy_by_name(name.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(strategies))
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }
}

impl Default for HostnameChain {
    fn default() -> Self {
        Self::new(vec![
            Arc::new(SystemResolver),
            Arc::new(HostCommandResolver),
            Arc::new(AvahiResolver),
        ])
    }
}

#[async_trait]
impl HostnameResolver for HostnameChain {
    fn name(&self) -> &'static str {
        "chain"
    }

    async fn resolve_hostname(&self, ip: IpAddr) -> Result<Option<String>, LookupError> {
        let mut answered = false;
        let mut last_error = None;

        for strategy in &self.strategies {
            match strategy.resolve_hostname(ip).await {
                Ok(Some(name)) => {
                    debug!(ip = %ip, strategy = strategy.name(), hostname = %name, "Resolved hostname");
                    return Ok(Some(name));
                }
                Ok(None) => answered = true,
                Err(e) => {
                    trace!(ip = %ip, strategy = strategy.name(), error = %e, "Hostname strategy failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if !answered => Err(e),
            _ => Ok(None),
        }
    }
}

pub fn strategy_by_name(name: &str) -> Result<Arc<dyn HostnameResolver>, ConfigError> {
    match name {
        "system" => Ok(Arc::new(SystemResolver)),
        "host" => Ok(Arc::new(HostCommandResolver)),
        "avahi" => Ok(Arc::new(AvahiResolver)),
        other => Err(ConfigError::UnknownStrategy(other.to_string())),
    }
}

async fn run_command(program: &str, args: &[&str]) -> Result<Output, LookupError> {
    match Command::new(program).args(args).kill_on_drop(true).output().await {
        Ok(output) => Ok(output),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(LookupError::ToolMissing(program.to_string())),
        Err(e) => Err(e.into()),
    }
}

/// Trailing root dot removed; empty names and numeric echoes of the IP rejected
fn clean_hostname(name: &str, ip: IpAddr) -> Option<String> {
    let name = name.trim().trim_end_matches('.');
    if name.is_empty() || name == ip.to_string() || name.parse::<IpAddr>().is_ok() {
        return None;
    }
    Some(name.to_string())
}

/// "50.1.168.192.in-addr.arpa domain name pointer nas.lan."
fn parse_host_output(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .find_map(|line| line.split_once("domain name pointer "))
        .map(|(_, name)| name.trim().to_string())
}

/// A successful avahi run always prints the address and the name
fn avahi_hostname(stdout: &str, ip: IpAddr) -> Result<Option<String>, LookupError> {
    let name = parse_avahi_output(stdout)
        .ok_or_else(|| LookupError::Malformed(format!("avahi-resolve-address: {:?}", stdout.trim())))?;
    Ok(clean_hostname(&name, ip))
}

/// "192.168.1.50\tnas.local"
fn parse_avahi_output(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .find_map(|line| line.split_whitespace().nth(1))
        .map(str::to_string)
}
