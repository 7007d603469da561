//! Error taxonomy shared by the discovery engine

use crate::device::TaskKind;
use std::time::Duration;
use thiserror::Error;

/// Neighbor discovery could not produce data for this cycle
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("neighbor probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("neighbor probe tool unavailable: {0}")]
    ToolMissing(String),
    #[error("neighbor probe failed: {0}")]
    Failed(String),
    #[error("neighbor probe I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single identity lookup did not complete
#[derive(Error, Debug)]
pub enum LookupError {
    #[error("{task} lookup timed out after {after:?}")]
    Timeout { task: TaskKind, after: Duration },
    #[error("lookup tool unavailable: {0}")]
    ToolMissing(String),
    #[error("malformed lookup response: {0}")]
    Malformed(String),
    #[error("lookup failed: {0}")]
    Failed(String),
    #[error("lookup I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Invalid startup configuration. Always fatal.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("grace period must be at least 1 missed cycle, got {0}")]
    GracePeriod(u32),
    #[error("worker count must be between 1 and {max}, got {got}")]
    WorkerCount { got: usize, max: usize },
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("unknown hostname strategy: {0}")]
    UnknownStrategy(String),
    #[error("mDNS window ({window_ms} ms) must be shorter than the lookup timeout ({timeout_ms} ms)")]
    MdnsWindow { window_ms: u64, timeout_ms: u64 },
}

/// Persistence failures for custom names and the device cache
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid hardware address: {0}")]
pub struct MacParseError(pub String);
