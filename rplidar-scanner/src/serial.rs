use crate::constants::{
    HEADER_SIZE, LIDAR_ANS_LENGTH_DEVHEALTH, LIDAR_ANS_LENGTH_DEVINFO,
    LIDAR_ANS_LENGTH_MEASUREMENT, LIDAR_ANS_TYPE_DEVHEALTH, LIDAR_ANS_TYPE_DEVINFO,
    LIDAR_ANS_TYPE_MEASUREMENT, LIDAR_CMD_GET_DEVICE_HEALTH, LIDAR_CMD_GET_DEVICE_INFO,
    LIDAR_CMD_SCAN, LIDAR_CMD_SET_MOTOR_PWM, LIDAR_CMD_STOP, LIDAR_CMD_SYNC_BYTE,
    POLL_INTERVAL_MS,
};
use crate::error::ScanError;
use crate::packet::{
    parse_device_health, parse_device_info, payload_command, validate_response_header,
};
use rplidar_data::{DeviceHealth, DeviceInfo};
use serialport::SerialPort;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

pub(crate) fn sleep_ms(duration_ms: u64) {
    std::thread::sleep(Duration::from_millis(duration_ms));
}

pub(crate) fn start_scan(
    port: &mut Box<dyn SerialPort>,
    timeout: Duration,
) -> Result<(), ScanError> {
    send_command(port, LIDAR_CMD_SCAN)?;
    let header = read(port, HEADER_SIZE, timeout)?;
    validate_response_header(
        &header,
        Some(LIDAR_ANS_LENGTH_MEASUREMENT),
        LIDAR_ANS_TYPE_MEASUREMENT,
    )?;
    Ok(())
}

fn stop_scan(port: &mut Box<dyn SerialPort>) -> Result<(), ScanError> {
    send_command(port, LIDAR_CMD_STOP)?;
    Ok(())
}

pub(crate) fn stop_scan_and_flush(port: &mut Box<dyn SerialPort>) -> Result<(), ScanError> {
    stop_scan(port)?;
    flush(port)?;
    Ok(())
}

/// Spins the motor up. DTR low enables the motor driver on every model;
/// PWM models additionally need a duty cycle.
pub(crate) fn start_motor(
    port: &mut Box<dyn SerialPort>,
    pwm: Option<u16>,
) -> Result<(), ScanError> {
    port.write_data_terminal_ready(false)?;
    if let Some(duty) = pwm {
        set_motor_pwm(port, duty)?;
    }
    Ok(())
}

pub(crate) fn stop_motor(
    port: &mut Box<dyn SerialPort>,
    has_pwm: bool,
) -> Result<(), ScanError> {
    if has_pwm {
        set_motor_pwm(port, 0)?;
    }
    port.write_data_terminal_ready(true)?;
    Ok(())
}

fn set_motor_pwm(port: &mut Box<dyn SerialPort>, duty: u16) -> Result<(), ScanError> {
    send_data(port, &payload_command(LIDAR_CMD_SET_MOTOR_PWM, &duty.to_le_bytes()))?;
    Ok(())
}

pub(crate) fn check_device_health(
    port: &mut Box<dyn SerialPort>,
    timeout: Duration,
) -> Result<DeviceHealth, ScanError> {
    send_command(port, LIDAR_CMD_GET_DEVICE_HEALTH)?;
    let header = read(port, HEADER_SIZE, timeout)?;
    validate_response_header(
        &header,
        Some(LIDAR_ANS_LENGTH_DEVHEALTH),
        LIDAR_ANS_TYPE_DEVHEALTH,
    )?;
    let health = read(port, LIDAR_ANS_LENGTH_DEVHEALTH.into(), timeout)?;

    match parse_device_health(&health) {
        DeviceHealth::Error(code) => Err(ScanError::DeviceHealth(code)),
        health => Ok(health),
    }
}

pub(crate) fn get_device_info(
    port: &mut Box<dyn SerialPort>,
    timeout: Duration,
) -> Result<DeviceInfo, ScanError> {
    send_command(port, LIDAR_CMD_GET_DEVICE_INFO)?;
    let header = read(port, HEADER_SIZE, timeout)?;
    validate_response_header(
        &header,
        Some(LIDAR_ANS_LENGTH_DEVINFO),
        LIDAR_ANS_TYPE_DEVINFO,
    )?;
    let info = read(port, LIDAR_ANS_LENGTH_DEVINFO.into(), timeout)?;
    Ok(parse_device_info(&info))
}

fn send_data(port: &mut Box<dyn SerialPort>, data: &[u8]) -> std::io::Result<()> {
    port.write_all(data)?;
    port.flush()
}

pub(crate) fn send_command(port: &mut Box<dyn SerialPort>, command: u8) -> std::io::Result<()> {
    let data: [u8; 2] = [LIDAR_CMD_SYNC_BYTE, command];
    send_data(port, &data)
}

pub(crate) fn get_n_read(port: &mut Box<dyn SerialPort>) -> Result<usize, ScanError> {
    let n_u32: u32 = port.bytes_to_read()?;
    Ok(n_u32.try_into().unwrap_or(0))
}

pub(crate) fn flush(port: &mut Box<dyn SerialPort>) -> Result<(), ScanError> {
    let n_read: usize = get_n_read(port).unwrap_or(0);
    if n_read == 0 {
        return Ok(());
    }
    let mut packet: Vec<u8> = vec![0; n_read];
    port.read_exact(packet.as_mut_slice())?;
    Ok(())
}

/// Reads exactly `data_size` bytes, waiting at most `timeout` for them to arrive.
pub(crate) fn read(
    port: &mut Box<dyn SerialPort>,
    data_size: usize,
    timeout: Duration,
) -> Result<Vec<u8>, ScanError> {
    let deadline = Instant::now() + timeout;
    loop {
        let n_read: usize = get_n_read(port)?;

        if n_read >= data_size {
            let mut packet: Vec<u8> = vec![0; data_size];
            port.read_exact(packet.as_mut_slice())?;
            return Ok(packet);
        }
        if Instant::now() >= deadline {
            return Err(ScanError::IoTimeout(timeout));
        }
        sleep_ms(POLL_INTERVAL_MS);
    }
}

/// Appends whatever is waiting on the port to `buffer`, up to `timeout`.
/// Returns the number of bytes appended; never zero on success.
pub(crate) fn read_available(
    port: &mut Box<dyn SerialPort>,
    buffer: &mut Vec<u8>,
    timeout: Duration,
) -> Result<usize, ScanError> {
    let deadline = Instant::now() + timeout;
    loop {
        let n_read: usize = get_n_read(port)?;
        if n_read > 0 {
            let start = buffer.len();
            buffer.resize(start + n_read, 0);
            port.read_exact(&mut buffer[start..])?;
            return Ok(n_read);
        }
        if Instant::now() >= deadline {
            return Err(ScanError::IoTimeout(timeout));
        }
        sleep_ms(POLL_INTERVAL_MS);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serialport::TTYPort;

    const TIMEOUT: Duration = Duration::from_millis(200);

    #[test]
    fn test_start_scan() {
        let (mut master, slave) = TTYPort::pair().expect("Unable to create ptty pair");
        master
            .write(&[0xA5, 0x5A, 0x05, 0x00, 0x00, 0x40, 0x81])
            .unwrap();

        let mut slave_ptr = Box::new(slave) as Box<dyn SerialPort>;
        start_scan(&mut slave_ptr, TIMEOUT).unwrap();

        sleep_ms(10);

        let mut buf = [0u8; 2];
        master.read(&mut buf).unwrap();
        assert_eq!(buf, [0xA5, 0x20]);
    }

    #[test]
    fn test_stop_scan() {
        let (master, mut slave) = TTYPort::pair().expect("Unable to create ptty pair");
        let mut master_ptr = Box::new(master) as Box<dyn SerialPort>;
        stop_scan(&mut master_ptr).unwrap();

        sleep_ms(10);

        let mut buf = [0u8; 2];
        slave.read(&mut buf).unwrap();
        assert_eq!(buf, [0xA5, 0x25]);
    }

    #[test]
    fn test_check_device_health() {
        let (mut master, slave) = TTYPort::pair().expect("Unable to create ptty pair");
        let mut slave_ptr = Box::new(slave) as Box<dyn SerialPort>;

        master
            .write(&[0xA5, 0x5A, 0x03, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00])
            .unwrap();
        sleep_ms(10);
        assert!(matches!(
            check_device_health(&mut slave_ptr, TIMEOUT),
            Ok(DeviceHealth::Good)
        ));

        master
            .write(&[0xA5, 0x5A, 0x03, 0x00, 0x00, 0x00, 0x06, 0x02, 0x05, 0x00])
            .unwrap();
        sleep_ms(10);
        assert!(matches!(
            check_device_health(&mut slave_ptr, TIMEOUT),
            Err(ScanError::DeviceHealth(0x05))
        ));
    }

    #[test]
    fn test_get_device_info() {
        let (mut master, slave) = TTYPort::pair().expect("Unable to create ptty pair");
        master
            .write(&[
                0xA5, 0x5A, 0x14, 0x00, 0x00, 0x00, 0x04, 0x18, 0x1D, 0x01, 0x07, 0x02, 0x00, 0x02,
                0x02, 0x01, 0x01, 0x00, 0x03, 0x00, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
            ])
            .unwrap();

        sleep_ms(10);

        let mut slave_ptr = Box::new(slave) as Box<dyn SerialPort>;
        let info = get_device_info(&mut slave_ptr, TIMEOUT).unwrap();
        assert_eq!(info.model_number, 0x18);
        assert_eq!(info.firmware_major_version, 1);
        assert_eq!(info.firmware_minor_version, 0x1D);
        assert_eq!(info.hardware_version, 7);
    }

    #[test]
    fn test_flush() {
        let (mut master, slave) = TTYPort::pair().expect("Unable to create ptty pair");
        master
            .write(&[0xA5, 0x5A, 0x03, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00])
            .unwrap();

        let mut slave_ptr = Box::new(slave) as Box<dyn SerialPort>;

        sleep_ms(10);

        assert_eq!(slave_ptr.bytes_to_read().unwrap(), 10);
        flush(&mut slave_ptr).unwrap();
        assert_eq!(slave_ptr.bytes_to_read().unwrap(), 0);

        // when zero bytes to read
        flush(&mut slave_ptr).unwrap();
        assert_eq!(slave_ptr.bytes_to_read().unwrap(), 0);
    }

    #[test]
    fn test_read_times_out() {
        let (_master, slave) = TTYPort::pair().expect("Unable to create ptty pair");
        let mut slave_ptr = Box::new(slave) as Box<dyn SerialPort>;
        assert!(matches!(
            read(&mut slave_ptr, 5, Duration::from_millis(20)),
            Err(ScanError::IoTimeout(_))
        ));
    }
}
