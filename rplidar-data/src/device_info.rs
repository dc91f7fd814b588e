#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Identity block returned by the GET_INFO request.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceInfo {
    pub model_number: u8,
    pub firmware_major_version: u8,
    pub firmware_minor_version: u8,
    pub hardware_version: u8,
    pub serial_number: [u8; 16],
}

impl DeviceInfo {
    /// Serial number as the uppercase hex string printed on the device label.
    pub fn serial_hex(&self) -> String {
        self.serial_number
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect()
    }
}

/// Health status returned by the GET_HEALTH request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DeviceHealth {
    Good,
    /// The sensor still measures but reports a degraded condition.
    Warning(u16),
    /// The sensor refuses to measure until it is reset.
    Error(u16),
}

impl DeviceHealth {
    pub fn from_status(status: u8, error_code: u16) -> DeviceHealth {
        match status {
            0 => DeviceHealth::Good,
            1 => DeviceHealth::Warning(error_code),
            _ => DeviceHealth::Error(error_code),
        }
    }
}
