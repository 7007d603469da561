//! Hardware vendor lookup from the address OUI prefix
//!
//! The vendor table is loaded once from an IEEE OUI reference file (the
//! `ieee-oui.txt` shipped with arp-scan) and shared by reference. When no
//! reference file is readable a small built-in table covering common
//! manufacturers is used instead.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::device::MacAddress;

/// Well-known install locations of the arp-scan OUI table
pub const DEFAULT_OUI_PATHS: &[&str] = &[
    "/usr/share/arp-scan/ieee-oui.txt",
    "/usr/local/share/arp-scan/ieee-oui.txt",
    "/opt/homebrew/share/arp-scan/ieee-oui.txt",
];

const BUILTIN_VENDORS: &[(&str, &str)] = &[
    ("00000C", "Cisco Systems"),
    ("000C29", "VMware"),
    ("005056", "VMware"),
    ("001C42", "Parallels"),
    ("080027", "Oracle VirtualBox"),
    ("525400", "QEMU/KVM"),
    ("0050F2", "Microsoft"),
    ("00155D", "Microsoft"),
    ("B827EB", "Raspberry Pi Foundation"),
    ("DCA632", "Raspberry Pi Trading"),
    ("E45F01", "Raspberry Pi Trading"),
    ("3C22FB", "Apple, Inc."),
    ("F8FFC2", "Apple, Inc."),
    ("A483E7", "Apple, Inc."),
    ("286C07", "Xiaomi"),
    ("7C49EB", "Samsung"),
    ("E86F38", "TP-Link"),
    ("30B5C2", "TP-Link"),
    ("FCECDA", "Ubiquiti"),
    ("802AA8", "Ubiquiti"),
    ("240AC4", "Espressif"),
    ("000E58", "Sonos"),
    ("001788", "Philips Lighting"),
];

/// Where the loaded vendor table came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VendorSource {
    File(PathBuf),
    Builtin,
}

/// OUI to manufacturer table
#[derive(Debug, Clone)]
pub struct VendorDatabase {
    /// Uppercase hex prefix (6, 7 or 9 digits) to vendor name
    vendors: HashMap<String, String>,
    source: VendorSource,
}

impl VendorDatabase {
    /// Built-in fallback table
    pub fn builtin() -> Self {
        Self {
            vendors: BUILTIN_VENDORS
                .iter()
                .map(|(prefix, vendor)| (prefix.to_string(), vendor.to_string()))
                .collect(),
            source: VendorSource::Builtin,
        }
    }

    /// Load the first readable reference table, falling back to the built-in one
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Self {
        for path in paths {
            let path = path.as_ref();
            if !path.exists() {
                continue;
            }
            match std::fs::File::open(path) {
                Ok(file) => {
                    let vendors = parse_oui_table(file);
                    if vendors.is_empty() {
                        debug!(path = %path.display(), "OUI table contained no entries");
                        continue;
                    }
                    info!(path = %path.display(), entries = vendors.len(), "Loaded OUI vendor table");
                    return Self {
                        vendors,
                        source: VendorSource::File(path.to_path_buf()),
                    };
                }
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Failed to open OUI table");
                }
            }
        }

        warn!("No OUI reference table found, using built-in vendor table");
        Self::builtin()
    }

    /// Load from the default arp-scan locations
    pub fn load_default() -> Self {
        Self::load(DEFAULT_OUI_PATHS)
    }

    /// Manufacturer for the address, `None` when unknown
    pub fn lookup(&self, mac: &MacAddress) -> Option<&str> {
        let hex = mac.to_hex();
        // Longer MA-S / MA-M assignments win over the 24-bit block
        [9, 7, 6]
            .iter()
            .find_map(|len| self.vendors.get(&hex[..*len]))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vendors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vendors.is_empty()
    }

    pub fn source(&self) -> &VendorSource {
        &self.source
    }
}

/// Parse `PREFIX<TAB>Vendor` lines, skipping comments and malformed rows
pub fn parse_oui_table<R: Read>(reader: R) -> HashMap<String, String> {
    let mut vendors = HashMap::new();

    for line in BufReader::new(reader).lines() {
        // Tolerate stray non-UTF-8 lines
        let Ok(line) = line else { continue };
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((prefix, vendor)) = line.split_once('\t') else {
            continue;
        };
        let prefix: String = prefix
            .chars()
            .filter(|c| !matches!(c, ':' | '-' | '.'))
            .collect::<String>()
            .to_uppercase();
        let vendor = vendor.trim();

        if !matches!(prefix.len(), 6 | 7 | 9)
            || !prefix.chars().all(|c| c.is_ascii_hexdigit())
            || vendor.is_empty()
        {
            continue;
        }
        vendors.insert(prefix, vendor.to_string());
    }

    vendors
}
