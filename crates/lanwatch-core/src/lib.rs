//! Lanwatch Core - Device model, registry and identification
//!
//! This crate provides the foundational pieces of the Lanwatch discovery engine:
//! - Network device model keyed by hardware address, with lifecycle state
//! - Device registry shared between the scan loop and resolution workers
//! - OUI vendor lookup with an external reference table and built-in fallback
//! - Rule-based device type inference
//! - Persistent custom-name store and device cache

pub mod device;
pub mod error;
pub mod inference;
pub mod registry;
pub mod store;
pub mod vendor;

pub use device::{
    DeviceType, MacAddress, NetworkDevice, Resolution, ResolutionState, ResolutionStatus, TaskKind,
};
pub use error::{ConfigError, LookupError, MacParseError, ProbeError, StoreError};
pub use inference::{infer, Inference};
pub use registry::{DeviceRegistry, Upserted};
pub use store::{DeviceCache, JsonNameStore, MemoryNameStore, NameStore};
pub use vendor::{VendorDatabase, VendorSource};
