//! Sample sources: anything that yields decoded measurements one at a time.

use crate::config::SourceConfig;
use crate::constants::{HANDSHAKE_TIMEOUT_MS, SAMPLE_FRAME_SIZE};
use crate::error::{Result, ScanError};
use crate::packet::decode_sample;
use crate::port::classify_open_error;
use crate::retry::RetryBudget;
use crate::serial::{
    check_device_health, flush, get_device_info, read_available, sleep_ms, start_motor,
    start_scan, stop_motor, stop_scan_and_flush,
};
use log::{debug, info, warn};
use rplidar_data::{DeviceHealth, DeviceInfo, RawSample};
use serialport::SerialPort;
use std::collections::VecDeque;
use std::io;
use std::time::Duration;

/// A stream of raw measurements from a sensor.
///
/// `read` blocks for at most the source's read timeout. `IoTimeout` and
/// `MalformedFrame` are recoverable: call `read` again. Once too many of them
/// arrive in a row the source reports `DeviceUnresponsive` instead.
pub trait SampleSource: Send {
    fn read(&mut self) -> Result<RawSample>;

    /// Stops the sensor and releases the connection. Calling it again is a no-op.
    fn close(&mut self) -> Result<()>;
}

/// RPLidar A-series sensor on a serial port.
pub struct RplidarSource {
    port: Option<Box<dyn SerialPort>>,
    port_name: String,
    has_pwm: bool,
    read_timeout: Duration,
    buffer: VecDeque<u8>,
    errors: RetryBudget,
}

impl RplidarSource {
    /// Opens `port_name`, checks the sensor's health, spins the motor up and
    /// starts scanning.
    pub fn open(port_name: &str, config: &SourceConfig) -> Result<RplidarSource> {
        let port = open_port(port_name, config)?;
        RplidarSource::from_port(port, port_name, config)
    }

    /// Takes over an already opened port.
    pub fn from_port(
        mut port: Box<dyn SerialPort>,
        port_name: &str,
        config: &SourceConfig,
    ) -> Result<RplidarSource> {
        let handshake_timeout = Duration::from_millis(HANDSHAKE_TIMEOUT_MS);

        if !cfg!(test) {
            // In testing, disable flushing to receive dummy signals
            stop_scan_and_flush(&mut port)?;
            sleep_ms(10);
            stop_scan_and_flush(&mut port)?;
        }

        if let DeviceHealth::Warning(code) = check_device_health(&mut port, handshake_timeout)? {
            warn!("Sensor on {} reports a health warning ({:#06x})", port_name, code);
        }

        if let Err(e) = start_motor(&mut port, config.motor_pwm()) {
            warn!("Failed to start the motor on {}: {}", port_name, e);
        }
        sleep_ms(config.spin_up_ms);

        start_scan(&mut port, handshake_timeout)?;
        info!("Scanning on {} ({:?})", port_name, config.model);

        Ok(RplidarSource {
            port: Some(port),
            port_name: port_name.to_string(),
            has_pwm: config.model.has_pwm_motor(),
            read_timeout: config.read_timeout(),
            buffer: VecDeque::new(),
            errors: RetryBudget::new(config.max_consecutive_errors),
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    fn next_frame(&mut self) -> Result<RawSample> {
        let port = self.port.as_mut().ok_or_else(|| {
            ScanError::IoError(io::Error::new(
                io::ErrorKind::NotConnected,
                "sample source is closed",
            ))
        })?;

        while self.buffer.len() < SAMPLE_FRAME_SIZE {
            let mut chunk = Vec::new();
            read_available(port, &mut chunk, self.read_timeout)?;
            self.buffer.extend(chunk);
        }

        let frame: Vec<u8> = self.buffer.iter().take(SAMPLE_FRAME_SIZE).copied().collect();
        match decode_sample(&frame) {
            Ok((sample, _)) => {
                self.buffer.drain(..SAMPLE_FRAME_SIZE);
                Ok(sample)
            }
            Err(e) => {
                // resynchronise one byte at a time
                self.buffer.pop_front();
                Err(e)
            }
        }
    }
}

impl SampleSource for RplidarSource {
    fn read(&mut self) -> Result<RawSample> {
        match self.next_frame() {
            Ok(sample) => {
                self.errors.record_success();
                Ok(sample)
            }
            Err(e) if e.is_transient() => {
                if self.errors.record_failure() {
                    return Err(e);
                }
                Err(ScanError::DeviceUnresponsive {
                    failures: self.errors.failures(),
                    last: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    fn close(&mut self) -> Result<()> {
        let Some(mut port) = self.port.take() else {
            return Ok(());
        };
        debug!("Closing sample source on {}", self.port_name);
        self.buffer.clear();
        let stopped = stop_scan_and_flush(&mut port);
        if let Err(e) = stop_motor(&mut port, self.has_pwm) {
            warn!("Failed to stop the motor on {}: {}", self.port_name, e);
        }
        stopped
    }
}

impl Drop for RplidarSource {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("{e}");
        }
    }
}

/// Closes the wrapped source when dropped, whatever path the owner leaves by.
pub struct SourceGuard {
    source: Box<dyn SampleSource>,
    closed: bool,
}

impl SourceGuard {
    pub fn new(source: Box<dyn SampleSource>) -> SourceGuard {
        SourceGuard {
            source,
            closed: false,
        }
    }

    pub fn read(&mut self) -> Result<RawSample> {
        self.source.read()
    }

    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.source.close()
    }
}

impl Drop for SourceGuard {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close sample source: {e}");
        }
    }
}

/// Reads the device description and health without starting a scan.
pub fn query_device(port_name: &str, config: &SourceConfig) -> Result<(DeviceInfo, DeviceHealth)> {
    let mut port = open_port(port_name, config)?;
    let timeout = Duration::from_millis(HANDSHAKE_TIMEOUT_MS);

    stop_scan_and_flush(&mut port)?;
    sleep_ms(10);
    flush(&mut port)?;

    let info = get_device_info(&mut port, timeout)?;
    let health = match check_device_health(&mut port, timeout) {
        Ok(health) => health,
        Err(ScanError::DeviceHealth(code)) => DeviceHealth::Error(code),
        Err(e) => return Err(e),
    };
    Ok((info, health))
}

fn open_port(port_name: &str, config: &SourceConfig) -> Result<Box<dyn SerialPort>> {
    serialport::new(port_name, config.baud_rate())
        .timeout(Duration::from_millis(10))
        .open()
        .map_err(|e| classify_open_error(port_name, e))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::packet::encode_sample;
    use serialport::TTYPort;
    use std::io::{Read, Write};

    const HEALTH_OK: [u8; 10] = [0xA5, 0x5A, 0x03, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00];
    const SCAN_DESCRIPTOR: [u8; 7] = [0xA5, 0x5A, 0x05, 0x00, 0x00, 0x40, 0x81];

    fn test_config() -> SourceConfig {
        SourceConfig {
            read_timeout_ms: 30,
            max_consecutive_errors: 2,
            spin_up_ms: 0,
            ..Default::default()
        }
    }

    /// Master end, a second handle on the slave end and a source on the
    /// slave. The second handle keeps the pty open after the source closes.
    fn open_pair() -> (TTYPort, TTYPort, RplidarSource) {
        let (mut master, slave) = TTYPort::pair().expect("Unable to create ptty pair");
        let slave_handle = slave.try_clone_native().unwrap();
        master.write_all(&HEALTH_OK).unwrap();
        master.write_all(&SCAN_DESCRIPTOR).unwrap();
        sleep_ms(10);

        let source = RplidarSource::from_port(Box::new(slave), "pty", &test_config()).unwrap();

        // drain the health and scan requests
        sleep_ms(10);
        let mut requests = [0u8; 4];
        master.read_exact(&mut requests).unwrap();
        assert_eq!(requests, [0xA5, 0x52, 0xA5, 0x20]);
        (master, slave_handle, source)
    }

    #[test]
    fn test_read_decodes_frames() {
        let (mut master, _slave, mut source) = open_pair();
        master.write_all(&encode_sample(20, 0., 1000., true)).unwrap();
        master.write_all(&encode_sample(21, 90., 2000., false)).unwrap();
        sleep_ms(10);

        let sample = source.read().unwrap();
        assert_eq!(sample, RawSample::new(20, 0., 1000.));
        let sample = source.read().unwrap();
        assert_eq!(sample, RawSample::new(21, 90., 2000.));
    }

    #[test]
    fn test_malformed_frame_drops_one_byte() {
        let (mut master, _slave, mut source) = open_pair();
        master.write_all(&[0x00]).unwrap();
        master.write_all(&encode_sample(20, 45., 500., false)).unwrap();
        sleep_ms(10);

        assert!(matches!(source.read(), Err(ScanError::MalformedFrame(_))));
        let sample = source.read().unwrap();
        assert_eq!(sample, RawSample::new(20, 45., 500.));
    }

    #[test]
    fn test_consecutive_timeouts_escalate() {
        let (_master, _slave, mut source) = open_pair();
        assert!(matches!(source.read(), Err(ScanError::IoTimeout(_))));
        assert!(matches!(source.read(), Err(ScanError::IoTimeout(_))));
        assert!(matches!(
            source.read(),
            Err(ScanError::DeviceUnresponsive { failures: 3, .. })
        ));
    }

    #[test]
    fn test_close_stops_scanning() {
        let (mut master, _slave, mut source) = open_pair();
        source.close().unwrap();
        sleep_ms(10);

        let mut buf = [0u8; 2];
        master.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [0xA5, 0x25]);

        // closed sources refuse to read and close quietly
        assert!(matches!(source.read(), Err(ScanError::IoError(_))));
        source.close().unwrap();
    }
}
