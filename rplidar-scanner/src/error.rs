use std::io;
use std::path::PathBuf;
use std::time::Duration;

use rplidar_data::FailureKind;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, ScanError>;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Serial port \"{0}\" does not exist.")]
    PortNotFound(String),
    #[error("Serial port \"{0}\" is already in use.")]
    PortBusy(String),
    #[error("Permission denied opening serial port \"{0}\".")]
    PermissionDenied(String),
    #[error("Several serial ports look like the sensor: {}. Pick one explicitly.", .0.join(", "))]
    AmbiguousPort(Vec<String>),
    #[error("No serial port looks like the sensor (the usual device here is {hint}).")]
    NoPortFound { hint: String },

    #[error("Response header must be always seven bytes. Actually {0} bytes.")]
    InvalidHeaderLength(usize),
    #[error("Header sign must start with 0xA5 0x5A. Observed = {0}.")]
    InvalidMagicNumber(String),
    #[error("Expected response length of {0} bytes but found {1} bytes.")]
    InvalidResponseLength(usize, usize),
    #[error("Expected type code {0} but obtained {1}.")]
    InvalidTypeCode(usize, usize),
    #[error("Device health error. Error code = {0:#06x}. See the development manual for details.")]
    DeviceHealth(u16),

    #[error("No data from the sensor within {0:?}.")]
    IoTimeout(Duration),
    #[error("Malformed measurement frame {0}.")]
    MalformedFrame(String),
    #[error("Sensor unresponsive after {failures} consecutive read failures. Last error: {last}")]
    DeviceUnresponsive { failures: u32, last: String },

    #[error("Rotation sealed with {accepted} usable samples, at least {required} required.")]
    PartialRotation { accepted: usize, required: usize },
    #[error("Invalid sample: {0}")]
    InvalidSample(String),

    #[error("Failed to write \"{}\": {source}", .path.display())]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to read previous scan \"{}\": {message}", .path.display())]
    ReadFailure { path: PathBuf, message: String },
    #[error("Failed to parse {what}: {message}")]
    Parse { what: String, message: String },

    #[error("Session exceeded its time limit of {0:?}.")]
    SessionTimeout(Duration),
    #[error("Scan cancelled.")]
    Cancelled,
    #[error("Unknown session {0}.")]
    UnknownSession(Uuid),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Failed to spawn acquisition worker: {0}")]
    Spawn(#[source] io::Error),

    #[error(transparent)]
    ConfigParse(#[from] toml::de::Error),
    #[error(transparent)]
    ConfigSerialize(#[from] toml::ser::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    SerialError(#[from] serialport::Error),
    #[error(transparent)]
    IoError(#[from] io::Error),
}

impl ScanError {
    /// Errors the sample source recovers from by reading again.
    pub fn is_transient(&self) -> bool {
        matches!(self, ScanError::IoTimeout(_) | ScanError::MalformedFrame(_))
    }

    /// Broad cause of the error. `None` for cancellation, which is not a failure.
    pub fn kind(&self) -> Option<FailureKind> {
        let kind = match self {
            ScanError::PortNotFound(_)
            | ScanError::NoPortFound { .. }
            | ScanError::InvalidHeaderLength(_)
            | ScanError::InvalidMagicNumber(_)
            | ScanError::InvalidResponseLength(..)
            | ScanError::InvalidTypeCode(..)
            | ScanError::DeviceHealth(_)
            | ScanError::IoTimeout(_)
            | ScanError::DeviceUnresponsive { .. }
            | ScanError::SerialError(_)
            | ScanError::IoError(_) => FailureKind::Connectivity,
            ScanError::PortBusy(_)
            | ScanError::PermissionDenied(_)
            | ScanError::AmbiguousPort(_) => FailureKind::PortAccess,
            ScanError::MalformedFrame(_)
            | ScanError::PartialRotation { .. }
            | ScanError::InvalidSample(_) => FailureKind::DataQuality,
            ScanError::WriteFailure { .. }
            | ScanError::ReadFailure { .. }
            | ScanError::Csv(_) => FailureKind::Storage,
            ScanError::SessionTimeout(_) => FailureKind::Timeout,
            ScanError::Parse { .. }
            | ScanError::UnknownSession(_)
            | ScanError::InvalidConfig(_)
            | ScanError::Spawn(_)
            | ScanError::ConfigParse(_)
            | ScanError::ConfigSerialize(_) => FailureKind::Configuration,
            ScanError::Cancelled => return None,
        };
        Some(kind)
    }

    /// Human-readable reason prefixed with the failure category.
    pub fn reason(&self) -> String {
        match self.kind() {
            Some(kind) => format!("{}: {}", kind, self),
            None => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert!(ScanError::IoTimeout(Duration::from_millis(10)).is_transient());
        assert!(ScanError::MalformedFrame("00 00 00 00 00".into()).is_transient());
        assert!(!ScanError::DeviceUnresponsive {
            failures: 3,
            last: "timeout".into()
        }
        .is_transient());
        assert!(!ScanError::PortBusy("/dev/ttyUSB0".into()).is_transient());
    }

    #[test]
    fn test_reason_names_the_cause() {
        let reason = ScanError::PermissionDenied("/dev/ttyUSB0".into()).reason();
        assert!(reason.starts_with("port access: "));

        let reason = ScanError::PartialRotation {
            accepted: 3,
            required: 50,
        }
        .reason();
        assert!(reason.starts_with("data quality: "));

        let reason = ScanError::DeviceUnresponsive {
            failures: 10,
            last: "No data".into(),
        }
        .reason();
        assert!(reason.starts_with("hardware connectivity: "));

        let reason = ScanError::ReadFailure {
            path: PathBuf::from("data/scan.csv"),
            message: "bad row".into(),
        }
        .reason();
        assert!(reason.starts_with("storage: "));

        assert_eq!(ScanError::Cancelled.kind(), None);
        assert_eq!(ScanError::Cancelled.reason(), "Scan cancelled.");
    }

    #[test]
    fn test_ambiguous_port_lists_candidates() {
        let err = ScanError::AmbiguousPort(vec!["/dev/ttyUSB0".into(), "/dev/ttyUSB1".into()]);
        assert!(err.to_string().contains("/dev/ttyUSB0, /dev/ttyUSB1"));
    }
}
