//! Scanner configuration.
//!
//! Loaded from a TOML file. Every section and field falls back to its
//! default, so an empty file is a valid configuration.

use crate::constants::{CP210X_PID, CP210X_VID};
use crate::error::{Result, ScanError};
use rplidar_data::{model_baud_rate, OutputPaths, SensorModel};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level scanner configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScanConfig {
    pub sensor: SourceConfig,
    pub ports: PortConfig,
    pub rotation: AssemblerConfig,
    pub session: SessionConfig,
    pub output: OutputConfig,
}

/// Serial link and sensor settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SourceConfig {
    pub model: SensorModel,
    /// Overrides the model's fixed baud rate.
    pub baud_rate: Option<u32>,
    /// Longest wait for the next measurement frame.
    pub read_timeout_ms: u64,
    /// Consecutive timeouts or malformed frames tolerated before the sensor
    /// is declared unresponsive.
    pub max_consecutive_errors: u32,
    /// Motor duty cycle for models with PWM motor control.
    pub motor_pwm: u16,
    /// Pause between starting the motor and requesting a scan.
    pub spin_up_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            model: SensorModel::A1,
            baud_rate: None,
            read_timeout_ms: 1000,
            max_consecutive_errors: 10,
            motor_pwm: 660,
            spin_up_ms: 500,
        }
    }
}

impl SourceConfig {
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate.unwrap_or_else(|| model_baud_rate(self.model))
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Duty cycle to send on start, `None` for DTR-only models.
    pub fn motor_pwm(&self) -> Option<u16> {
        self.model.has_pwm_motor().then_some(self.motor_pwm)
    }
}

/// USB vendor and product id of a serial bridge known to carry the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct UsbSignature {
    pub vid: u16,
    pub pid: u16,
}

/// Port discovery settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PortConfig {
    pub signatures: Vec<UsbSignature>,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            signatures: vec![UsbSignature {
                vid: CP210X_VID,
                pid: CP210X_PID,
            }],
        }
    }
}

/// Rotation assembly thresholds
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AssemblerConfig {
    /// Samples below this quality are left out of the rotation.
    pub min_quality: u8,
    /// A drop in angle larger than this marks the start of a new sweep.
    pub wrap_hysteresis_deg: f64,
    /// Sealed rotations with fewer accepted samples are partial.
    pub min_accepted_samples: usize,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            min_quality: 1,
            wrap_hysteresis_deg: 5.0,
            min_accepted_samples: 50,
        }
    }
}

/// Scan session behaviour
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    pub timeout_ms: u64,
    /// Sweeps discarded after the scan starts. The first one usually
    /// begins mid-rotation.
    pub warmup_rotations: u32,
    pub partial_rotation_retries: u32,
    /// Samples between two progress events.
    pub progress_interval: usize,
    /// Progress estimate used until a full sweep has been seen.
    pub expected_samples_per_rotation: usize,
    pub min_coverage: f64,
    pub max_gap_deg: f64,
    /// Merge successive sweeps until `min_coverage` and `max_gap_deg` are met
    /// instead of keeping the first usable sweep.
    pub merge_until_coverage: bool,
    pub max_merged_rotations: u32,
    /// Merged sweeps without coverage gain after which merging gives up.
    pub plateau_rotations: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            warmup_rotations: 1,
            partial_rotation_retries: 1,
            progress_interval: 32,
            expected_samples_per_rotation: 360,
            min_coverage: 0.80,
            max_gap_deg: 10.0,
            merge_until_coverage: false,
            max_merged_rotations: 20,
            plateau_rotations: 5,
        }
    }
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Output file settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub csv_name: String,
    pub ply_name: String,
    /// Adds quality, angle and distance vertex properties to the PLY file.
    pub extended_ply: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data"),
            csv_name: "scan.csv".to_string(),
            ply_name: "scan.ply".to_string(),
            extended_ply: false,
        }
    }
}

impl OutputConfig {
    pub fn paths(&self) -> OutputPaths {
        OutputPaths::new(self.dir.join(&self.csv_name), self.dir.join(&self.ply_name))
    }
}

impl ScanConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: ScanConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| Err(ScanError::InvalidConfig(message.to_string()));

        if self.sensor.read_timeout_ms == 0 {
            return invalid("sensor.read_timeout_ms must be positive");
        }
        if self.sensor.baud_rate == Some(0) {
            return invalid("sensor.baud_rate must be positive");
        }
        if !self.rotation.wrap_hysteresis_deg.is_finite() || self.rotation.wrap_hysteresis_deg < 0.0
        {
            return invalid("rotation.wrap_hysteresis_deg must be a non-negative number");
        }
        if self.rotation.min_accepted_samples == 0 {
            return invalid("rotation.min_accepted_samples must be positive");
        }
        if self.session.timeout_ms == 0 {
            return invalid("session.timeout_ms must be positive");
        }
        if self.session.progress_interval == 0 {
            return invalid("session.progress_interval must be positive");
        }
        if self.session.expected_samples_per_rotation == 0 {
            return invalid("session.expected_samples_per_rotation must be positive");
        }
        if !(0.0..=1.0).contains(&self.session.min_coverage) {
            return invalid("session.min_coverage must lie in [0, 1]");
        }
        if self.session.merge_until_coverage
            && (self.session.max_merged_rotations == 0 || self.session.plateau_rotations == 0)
        {
            return invalid("session merge limits must be positive");
        }
        if self.output.csv_name.is_empty() || self.output.ply_name.is_empty() {
            return invalid("output file names must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ScanConfig::default();
        assert_eq!(config.sensor.model, SensorModel::A1);
        assert_eq!(config.sensor.baud_rate(), 115_200);
        assert_eq!(config.sensor.motor_pwm(), None);
        assert_eq!(config.sensor.max_consecutive_errors, 10);
        assert_eq!(config.rotation.min_accepted_samples, 50);
        assert_eq!(config.rotation.wrap_hysteresis_deg, 5.0);
        assert_eq!(config.session.timeout(), Duration::from_secs(30));
        assert_eq!(config.ports.signatures[0].vid, 0x10C4);
        assert_eq!(config.output.paths(), OutputPaths::in_dir("data"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_content = r#"
[sensor]
model = "A3"
read_timeout_ms = 250

[rotation]
min_quality = 10

[session]
merge_until_coverage = true

[output]
dir = "/tmp/scans"
extended_ply = true
"#;

        let config: ScanConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.sensor.model, SensorModel::A3);
        assert_eq!(config.sensor.baud_rate(), 256_000);
        assert_eq!(config.sensor.motor_pwm(), Some(660));
        assert_eq!(config.sensor.read_timeout(), Duration::from_millis(250));
        assert_eq!(config.rotation.min_quality, 10);
        assert_eq!(config.rotation.min_accepted_samples, 50);
        assert!(config.session.merge_until_coverage);
        assert_eq!(config.session.max_merged_rotations, 20);
        assert!(config.output.extended_ply);
        assert_eq!(config.output.paths().csv, Path::new("/tmp/scans/scan.csv"));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scanner.toml");

        let mut config = ScanConfig::default();
        config.sensor.baud_rate = Some(230_400);
        config.session.warmup_rotations = 2;
        config.to_file(&path).unwrap();

        let loaded = ScanConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ScanConfig::default();
        config.rotation.min_accepted_samples = 0;
        assert!(matches!(config.validate(), Err(ScanError::InvalidConfig(_))));

        let mut config = ScanConfig::default();
        config.session.min_coverage = 1.5;
        assert!(matches!(config.validate(), Err(ScanError::InvalidConfig(_))));

        let mut config = ScanConfig::default();
        config.rotation.wrap_hysteresis_deg = f64::NAN;
        assert!(matches!(config.validate(), Err(ScanError::InvalidConfig(_))));

        let mut config = ScanConfig::default();
        config.session.merge_until_coverage = true;
        config.session.max_merged_rotations = 0;
        assert!(matches!(config.validate(), Err(ScanError::InvalidConfig(_))));
    }

    #[test]
    fn test_malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[sensor\nmodel = ").unwrap();
        assert!(matches!(
            ScanConfig::from_file(&path),
            Err(ScanError::ConfigParse(_))
        ));
    }
}
