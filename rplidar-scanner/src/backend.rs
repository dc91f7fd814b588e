use crate::config::SourceConfig;
use crate::constants::PROBE_TIMEOUT_MS;
use crate::error::Result;
use crate::port::{classify_open_error, PortCandidate};
use crate::source::{RplidarSource, SampleSource};
use std::time::Duration;

/// Access to the host's serial devices.
///
/// The scan controller only reaches hardware through this trait, so a
/// session can run against real ports or against scripted sources.
pub trait SerialBackend: Send + Sync {
    /// Every serial device currently present.
    fn enumerate(&self) -> Result<Vec<PortCandidate>>;

    /// Opens `port_name` briefly to check it exists and is free.
    fn probe(&self, port_name: &str) -> Result<()>;

    /// Opens `port_name` as a running sample source.
    fn open(&self, port_name: &str, config: &SourceConfig) -> Result<Box<dyn SampleSource>>;
}

/// Serial devices of the machine the process runs on.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemBackend;

impl SerialBackend for SystemBackend {
    fn enumerate(&self) -> Result<Vec<PortCandidate>> {
        let ports = serialport::available_ports()?;
        Ok(ports.into_iter().map(PortCandidate::from).collect())
    }

    fn probe(&self, port_name: &str) -> Result<()> {
        let port = serialport::new(port_name, 115_200)
            .timeout(Duration::from_millis(PROBE_TIMEOUT_MS))
            .open()
            .map_err(|e| classify_open_error(port_name, e))?;
        port.bytes_to_read()?;
        Ok(())
    }

    fn open(&self, port_name: &str, config: &SourceConfig) -> Result<Box<dyn SampleSource>> {
        Ok(Box::new(RplidarSource::open(port_name, config)?))
    }
}
