//! Value model for compute devices.

use serde::{Deserialize, Serialize};

/// A compute device as the server core sees it.
///
/// The driver-side handle stays inside the gateway implementation that
/// discovered the device; everything above the gateway works with this value
/// and refers back to the device by its fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Stable fingerprint, see [`DeviceIdentity::fingerprint`].
    pub id: u32,
    /// Human-readable identity string, see [`DeviceIdentity::description`].
    pub description: String,
    /// Coarse capability score, see [`power_index`].
    pub power_index: usize,
}

impl Device {
    pub fn new(id: u32, description: String, power_index: usize) -> Device {
        Device {
            id,
            description,
            power_index,
        }
    }
}

/// The identity strings a driver reports for one device.
///
/// Two runs on the same machine report identical strings, so the CRC-32 over
/// them is a reproducible device id that survives reordering of the platform
/// list between runs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceIdentity {
    pub name: String,
    pub device_type: u64,
    pub version: String,
    pub vendor: String,
    pub vendor_id: u32,
    pub driver_version: String,
}

impl DeviceIdentity {
    /// CRC-32 over the concatenated identity fields, numbers in decimal.
    pub fn fingerprint(&self) -> u32 {
        let identifier = format!(
            "{}{}{}{}{}{}",
            self.name, self.device_type, self.version, self.vendor, self.vendor_id, self.driver_version
        );
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(identifier.as_bytes());
        hasher.finalize()
    }

    /// Display string in the `key: value; …` shape clients show to users.
    pub fn description(&self) -> String {
        format!(
            "name: {}; type: {}; version: {}; vendor: {}; vendorID: {}; driverVersion: {}",
            self.name, self.device_type, self.version, self.vendor, self.vendor_id, self.driver_version
        )
    }

    /// Builds the shared [`Device`] value for this identity.
    pub fn into_device(self, power_index: usize) -> Device {
        Device {
            id: self.fingerprint(),
            description: self.description(),
            power_index,
        }
    }
}

/// Coarse device ranking score used for automatic selection.
pub fn power_index(max_compute_units: u32, max_clock_frequency: u32) -> usize {
    max_compute_units as usize * max_clock_frequency as usize
}
