//! Device inventory model and the contracts for enumerating storage devices.

use std::collections::BTreeMap;
use std::error::Error;
use std::path::PathBuf;

/// One whole storage device as seen by an enumeration pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    /// Device node (e.g. `/dev/sdb`).
    pub path: PathBuf,
    /// Free-form descriptive properties (vendor, model, size, bus, ...).
    pub metadata: BTreeMap<String, String>,
}

impl DeviceRecord {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Short human description built from whatever metadata is present.
    pub fn describe(&self) -> String {
        let parts: Vec<&str> = ["vendor", "model", "size"]
            .iter()
            .filter_map(|key| self.metadata.get(*key).map(String::as_str))
            .filter(|value| !value.is_empty())
            .collect();
        if parts.is_empty() {
            self.path.display().to_string()
        } else {
            format!("{} ({})", self.path.display(), parts.join(" "))
        }
    }
}

/// Ordered mapping of device identifiers to records.
///
/// Inventories are replaced wholesale after each enumeration and compared by
/// key set only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInventory {
    devices: BTreeMap<String, DeviceRecord>,
}

impl DeviceInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, record: DeviceRecord) {
        self.devices.insert(key.into(), record);
    }

    pub fn get(&self, key: &str) -> Option<&DeviceRecord> {
        self.devices.get(key)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Device keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DeviceRecord)> {
        self.devices.iter().map(|(key, record)| (key.as_str(), record))
    }

    /// True when both inventories track exactly the same device keys,
    /// regardless of metadata.
    pub fn same_keys(&self, other: &DeviceInventory) -> bool {
        self.keys().eq(other.keys())
    }
}

impl FromIterator<(String, DeviceRecord)> for DeviceInventory {
    fn from_iter<I: IntoIterator<Item = (String, DeviceRecord)>>(iter: I) -> Self {
        Self {
            devices: iter.into_iter().collect(),
        }
    }
}

/// Kind of change reported for a device-directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotplugKind {
    Created,
    Deleted,
}

/// Raw device-node notification from the watched device directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotplugEvent {
    /// Entry name relative to the watched directory (e.g. `sdb`, `sdb1`).
    pub name: String,
    pub kind: HotplugKind,
}

impl HotplugEvent {
    pub fn new(name: impl Into<String>, kind: HotplugKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Names ending in a decimal digit denote partitions of a whole device.
    pub fn is_partition(&self) -> bool {
        self.name
            .chars()
            .last()
            .map(|ch| ch.is_ascii_digit())
            .unwrap_or(false)
    }
}

/// Produces a full device inventory in one (potentially slow) pass.
pub trait DeviceEnumerator {
    type Error: Error + Send + Sync + 'static;

    fn enumerate(&self) -> Result<DeviceInventory, Self::Error>;
}
