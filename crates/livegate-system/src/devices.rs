//! Whole-disk enumeration through udev.

use livegate_core::config::LivegateConfig;
use livegate_core::error::{LivegateError, LivegateResult};
use livegate_provider::{DeviceEnumerator, DeviceInventory, DeviceRecord};
use log::debug;
use std::ffi::OsStr;
use udev::{Device, Enumerator};

/// Lists whole block devices sitting on the configured buses.
#[derive(Debug, Clone, Default)]
pub struct UdevEnumerator {
    buses: Vec<String>,
}

impl UdevEnumerator {
    pub fn new(buses: Vec<String>) -> Self {
        Self { buses }
    }

    pub fn from_config(config: &LivegateConfig) -> Self {
        Self::new(config.devices.buses.clone())
    }

    fn bus_allowed(&self, bus: Option<&str>) -> bool {
        self.buses.is_empty()
            || bus.is_some_and(|bus| self.buses.iter().any(|allowed| allowed == bus))
    }
}

impl DeviceEnumerator for UdevEnumerator {
    type Error = LivegateError;

    fn enumerate(&self) -> LivegateResult<DeviceInventory> {
        let mut enumerator = Enumerator::new()?;
        enumerator.match_subsystem("block")?;
        enumerator.match_property("DEVTYPE", "disk")?;

        let mut inventory = DeviceInventory::new();
        for device in enumerator.scan_devices()? {
            let bus = property(&device, "ID_BUS");
            if !self.bus_allowed(bus) {
                continue;
            }
            let Some(devnode) = device.devnode() else {
                continue;
            };
            let size = sectors_to_bytes(device.attribute_value("size").and_then(os_str_to_str));
            if size == Some(0) {
                debug!("skipping {} without media", devnode.display());
                continue;
            }

            let mut record = DeviceRecord::new(devnode);
            for (key, udev_key) in [
                ("vendor", "ID_VENDOR"),
                ("model", "ID_MODEL"),
                ("serial", "ID_SERIAL_SHORT"),
                ("bus", "ID_BUS"),
            ] {
                if let Some(value) = property(&device, udev_key) {
                    record = record.with_meta(key, value.replace('_', " "));
                }
            }
            if let Some(bytes) = size {
                record = record.with_meta("size", human_size(bytes));
            }

            let key = device.sysname().to_string_lossy().into_owned();
            inventory.insert(key, record);
        }
        debug!("udev enumeration found {} device(s)", inventory.len());
        Ok(inventory)
    }
}

fn property<'a>(device: &'a Device, key: &str) -> Option<&'a str> {
    device.property_value(key).and_then(os_str_to_str)
}

fn os_str_to_str(value: &OsStr) -> Option<&str> {
    value.to_str()
}

/// The `size` attribute counts 512-byte sectors regardless of the hardware
/// block size.
fn sectors_to_bytes(raw: Option<&str>) -> Option<u64> {
    raw.and_then(|value| value.trim().parse::<u64>().ok())
        .map(|sectors| sectors.saturating_mul(512))
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_filter_defaults_to_everything() {
        let all = UdevEnumerator::new(Vec::new());
        assert!(all.bus_allowed(None));
        assert!(all.bus_allowed(Some("ata")));

        let usb = UdevEnumerator::new(vec!["usb".into()]);
        assert!(usb.bus_allowed(Some("usb")));
        assert!(!usb.bus_allowed(Some("ata")));
        assert!(!usb.bus_allowed(None));
    }

    #[test]
    fn sizes_are_reported_in_decimal_units() {
        assert_eq!(sectors_to_bytes(Some("62521344\n")), Some(32_010_928_128));
        assert_eq!(sectors_to_bytes(Some("garbage")), None);
        assert_eq!(human_size(32_010_928_128), "32.0 GB");
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(1_500_000), "1.5 MB");
    }
}
