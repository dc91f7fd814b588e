//! Serial port discovery for the sensor.
//!
//! Candidates are ranked by how strongly they look like the sensor's USB
//! bridge. Only the strongest non-empty tier is considered: one member wins,
//! several are ambiguous, none means the sensor is not connected.

use crate::backend::{SerialBackend, SystemBackend};
use crate::config::{PortConfig, UsbSignature};
use crate::error::{Result, ScanError};
use log::debug;
use parking_lot::Mutex;
use serialport::{SerialPortInfo, SerialPortType};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::io;
use std::sync::Arc;

/// One serial device reported by the host.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PortCandidate {
    pub device_name: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
    pub bluetooth: bool,
}

impl PortCandidate {
    pub fn new(device_name: impl Into<String>) -> PortCandidate {
        PortCandidate {
            device_name: device_name.into(),
            ..Default::default()
        }
    }

    pub fn usb(device_name: impl Into<String>, vid: u16, pid: u16) -> PortCandidate {
        PortCandidate {
            device_name: device_name.into(),
            vid: Some(vid),
            pid: Some(pid),
            ..Default::default()
        }
    }

    pub fn with_product(mut self, product: impl Into<String>) -> PortCandidate {
        self.product = Some(product.into());
        self
    }

    fn description(&self) -> String {
        let mut parts = Vec::new();
        if let (Some(vid), Some(pid)) = (self.vid, self.pid) {
            parts.push(format!("{:04X}:{:04X}", vid, pid));
        }
        parts.extend(self.manufacturer.iter().cloned());
        parts.extend(self.product.iter().cloned());
        if let Some(serial) = &self.serial_number {
            parts.push(format!("s/n {}", serial));
        }
        parts.join(" ")
    }
}

impl From<SerialPortInfo> for PortCandidate {
    fn from(info: SerialPortInfo) -> PortCandidate {
        let mut candidate = PortCandidate::new(info.port_name);
        match info.port_type {
            SerialPortType::UsbPort(usb) => {
                candidate.vid = Some(usb.vid);
                candidate.pid = Some(usb.pid);
                candidate.manufacturer = usb.manufacturer;
                candidate.product = usb.product;
                candidate.serial_number = usb.serial_number;
            }
            SerialPortType::BluetoothPort => candidate.bluetooth = true,
            SerialPortType::PciPort | SerialPortType::Unknown => (),
        }
        candidate
    }
}

/// How strongly a candidate looks like the sensor. Ordered weakest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum MatchStrength {
    None,
    /// Device name or product text follows the platform's convention for
    /// USB serial bridges.
    NamingHeuristic,
    /// USB vendor and product id match a known bridge.
    VendorSignature,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Platform {
    Linux,
    MacOs,
    Windows,
    Other,
}

impl Platform {
    pub fn current() -> Platform {
        if cfg!(target_os = "linux") {
            Platform::Linux
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else if cfg!(target_os = "windows") {
            Platform::Windows
        } else {
            Platform::Other
        }
    }

    /// Where the sensor usually shows up.
    pub fn default_device(self) -> &'static str {
        match self {
            Platform::Linux | Platform::Other => "/dev/ttyUSB0",
            Platform::MacOs => "/dev/tty.SLAB_USBtoUART",
            Platform::Windows => "COM3",
        }
    }

    fn looks_like_usb_serial(self, candidate: &PortCandidate) -> bool {
        match self {
            Platform::Linux | Platform::Other => candidate.device_name.contains("ttyUSB"),
            Platform::MacOs => {
                candidate.device_name.contains("usbserial")
                    || candidate.device_name.contains("SLAB_USBtoUART")
            }
            Platform::Windows => {
                let text = format!(
                    "{} {}",
                    candidate.manufacturer.as_deref().unwrap_or_default(),
                    candidate.product.as_deref().unwrap_or_default()
                )
                .to_lowercase();
                ["cp210", "ch340", "ftdi", "usb serial", "uart"]
                    .iter()
                    .any(|needle| text.contains(needle))
            }
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let label = match self {
            Platform::Linux => "Linux",
            Platform::MacOs => "macOS",
            Platform::Windows => "Windows",
            Platform::Other => "this platform",
        };
        f.write_str(label)
    }
}

/// Entry of the port enumeration surface.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PortListing {
    pub device_name: String,
    pub vendor_signature_matched: bool,
    pub strength: MatchStrength,
    pub description: String,
}

#[derive(Clone, Debug)]
pub struct PortResolver {
    signatures: Vec<UsbSignature>,
    platform: Platform,
}

impl PortResolver {
    pub fn new(config: &PortConfig) -> PortResolver {
        PortResolver::for_platform(config, Platform::current())
    }

    pub fn for_platform(config: &PortConfig, platform: Platform) -> PortResolver {
        PortResolver {
            signatures: config.signatures.clone(),
            platform,
        }
    }

    pub fn strength(&self, candidate: &PortCandidate) -> MatchStrength {
        if candidate.bluetooth {
            return MatchStrength::None;
        }
        if let (Some(vid), Some(pid)) = (candidate.vid, candidate.pid) {
            if self.signatures.contains(&UsbSignature { vid, pid }) {
                return MatchStrength::VendorSignature;
            }
        }
        if self.platform.looks_like_usb_serial(candidate) {
            return MatchStrength::NamingHeuristic;
        }
        MatchStrength::None
    }

    /// Picks the sensor's port out of `candidates` without touching any of them.
    pub fn rank(&self, candidates: &[PortCandidate]) -> Result<String> {
        let best = candidates
            .iter()
            .map(|c| self.strength(c))
            .max()
            .unwrap_or(MatchStrength::None);
        if best == MatchStrength::None {
            return Err(ScanError::NoPortFound {
                hint: self.platform.default_device().to_string(),
            });
        }

        let mut matches: Vec<String> = candidates
            .iter()
            .filter(|c| self.strength(c) == best)
            .map(|c| c.device_name.clone())
            .collect();
        matches.dedup();
        debug!("Port candidates at strength {:?}: {:?}", best, matches);

        match matches.len() {
            1 => Ok(matches.remove(0)),
            _ => Err(ScanError::AmbiguousPort(matches)),
        }
    }

    /// Returns `explicit_port` once it has been shown to open, otherwise the
    /// single best-matching enumerated port.
    pub fn resolve(
        &self,
        backend: &dyn SerialBackend,
        explicit_port: Option<&str>,
    ) -> Result<String> {
        match explicit_port {
            Some(port_name) => {
                backend.probe(port_name)?;
                Ok(port_name.to_string())
            }
            None => self.rank(&backend.enumerate()?),
        }
    }

    pub fn listings(&self, candidates: &[PortCandidate]) -> Vec<PortListing> {
        candidates
            .iter()
            .map(|c| {
                let strength = self.strength(c);
                PortListing {
                    device_name: c.device_name.clone(),
                    vendor_signature_matched: strength == MatchStrength::VendorSignature,
                    strength,
                    description: c.description(),
                }
            })
            .collect()
    }
}

/// Lists the host's serial devices, strongest match first.
pub fn list_ports(config: &PortConfig) -> Result<Vec<PortListing>> {
    let resolver = PortResolver::new(config);
    let mut listings = resolver.listings(&SystemBackend.enumerate()?);
    listings.sort_by(|a, b| b.strength.cmp(&a.strength));
    Ok(listings)
}

/// Maps a failure to open `port_name` onto the port error it stands for.
pub(crate) fn classify_open_error(port_name: &str, error: serialport::Error) -> ScanError {
    let description = error.description.to_lowercase();
    if description.contains("busy") || description.contains("in use") {
        return ScanError::PortBusy(port_name.to_string());
    }
    match error.kind {
        serialport::ErrorKind::NoDevice => ScanError::PortNotFound(port_name.to_string()),
        serialport::ErrorKind::Io(io::ErrorKind::NotFound) => {
            ScanError::PortNotFound(port_name.to_string())
        }
        serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
            ScanError::PermissionDenied(port_name.to_string())
        }
        _ => ScanError::SerialError(error),
    }
}

/// Ports held by running sessions in this process.
#[derive(Clone, Debug, Default)]
pub struct PortLeases {
    held: Arc<Mutex<HashSet<String>>>,
}

impl PortLeases {
    pub fn new() -> PortLeases {
        PortLeases::default()
    }

    /// Fails with `PortBusy` instead of waiting when the port is taken.
    pub fn claim(&self, port_name: &str) -> Result<PortLease> {
        let mut held = self.held.lock();
        if !held.insert(port_name.to_string()) {
            return Err(ScanError::PortBusy(port_name.to_string()));
        }
        Ok(PortLease {
            port_name: port_name.to_string(),
            held: Arc::clone(&self.held),
        })
    }

    pub fn is_held(&self, port_name: &str) -> bool {
        self.held.lock().contains(port_name)
    }
}

/// Exclusive use of one port; released on drop.
#[derive(Debug)]
pub struct PortLease {
    port_name: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl PortLease {
    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        self.held.lock().remove(&self.port_name);
    }
}
