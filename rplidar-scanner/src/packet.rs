use crate::constants::{HEADER_SIZE, LIDAR_ANS_SYNC_BYTE, LIDAR_CMD_SYNC_BYTE, SAMPLE_FRAME_SIZE};
use crate::error::ScanError;
use crate::numeric::{calc_distance, to_angle, to_string, to_u16};
use rplidar_data::{DeviceHealth, DeviceInfo, RawSample};

pub(crate) fn validate_response_header(
    header: &[u8],
    maybe_response_length: Option<u8>,
    type_code: u8,
) -> Result<(), ScanError> {
    if header.len() != HEADER_SIZE {
        return Err(ScanError::InvalidHeaderLength(header.len()));
    }
    if header[0..2] != [LIDAR_CMD_SYNC_BYTE, LIDAR_ANS_SYNC_BYTE] {
        return Err(ScanError::InvalidMagicNumber(to_string(&header[0..2])));
    }
    match maybe_response_length {
        None => (),
        Some(len) => {
            if header[2] != len {
                return Err(ScanError::InvalidResponseLength(
                    len.into(),
                    header[2].into(),
                ));
            }
        }
    }
    if header[6] != type_code {
        return Err(ScanError::InvalidTypeCode(
            type_code.into(),
            header[6].into(),
        ));
    }
    Ok(())
}

/// Request carrying a payload: sync, command, size, payload, then the XOR
/// of every preceding byte.
pub(crate) fn payload_command(command: u8, payload: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(payload.len() + 4);
    data.push(LIDAR_CMD_SYNC_BYTE);
    data.push(command);
    data.push(payload.len() as u8);
    data.extend_from_slice(payload);
    let checksum = data.iter().fold(0u8, |acc, b| acc ^ b);
    data.push(checksum);
    data
}

/// Decodes one measurement frame. The second value is the start-of-sweep flag.
pub(crate) fn decode_sample(frame: &[u8]) -> Result<(RawSample, bool), ScanError> {
    if frame.len() != SAMPLE_FRAME_SIZE {
        return Err(ScanError::MalformedFrame(to_string(frame)));
    }
    let start_flag = frame[0] & 0x01 == 1;
    let inverted_start_flag = (frame[0] >> 1) & 0x01 == 1;
    if start_flag == inverted_start_flag {
        return Err(ScanError::MalformedFrame(to_string(frame)));
    }
    if frame[1] & 0x01 != 1 {
        return Err(ScanError::MalformedFrame(to_string(frame)));
    }
    let quality = frame[0] >> 2;
    let angle_deg = to_angle(frame[1], frame[2]);
    let distance_mm = calc_distance(frame[3], frame[4]);
    Ok((RawSample::new(quality, angle_deg, distance_mm), start_flag))
}

pub(crate) fn parse_device_health(data: &[u8]) -> DeviceHealth {
    DeviceHealth::from_status(data[0], to_u16(data[2], data[1]))
}

pub(crate) fn parse_device_info(info: &[u8]) -> DeviceInfo {
    let mut serial_number = [0u8; 16];
    serial_number.copy_from_slice(&info[4..20]);
    DeviceInfo {
        model_number: info[0],
        firmware_major_version: info[2],
        firmware_minor_version: info[1],
        hardware_version: info[3],
        serial_number,
    }
}

#[cfg(test)]
pub(crate) fn encode_sample(quality: u8, angle_deg: f64, distance_mm: f64, start: bool) -> [u8; 5] {
    let angle_q6 = (angle_deg * 64.).round() as u16;
    let distance_q2 = (distance_mm * 4.).round() as u16;
    let flags = if start { 0b01 } else { 0b10 };
    [
        (quality << 2) | flags,
        (((angle_q6 & 0x7F) << 1) as u8) | 0x01,
        (angle_q6 >> 7) as u8,
        (distance_q2 & 0xFF) as u8,
        (distance_q2 >> 8) as u8,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_response_header() {
        assert!(matches!(
            validate_response_header(
                &vec![0xA5, 0x5A, 0x14, 0x00, 0x00, 0x00, 0x04],
                Some(0x14),
                0x04
            ),
            Ok(())
        ));

        assert!(matches!(
            validate_response_header(
                &vec![0xA5, 0x5A, 0x14, 0x00, 0x00, 0x00, 0x04, 0x09],
                Some(0x14),
                0x04
            ),
            Err(ScanError::InvalidHeaderLength(8))
        ));

        assert!(matches!(
            validate_response_header(
                &vec![0xA6, 0x5A, 0x14, 0x00, 0x00, 0x00, 0x04],
                Some(0x14),
                0x04
            ),
            Err(ScanError::InvalidMagicNumber(_))
        ));

        assert!(matches!(
            validate_response_header(
                &vec![0xA5, 0x5A, 0x14, 0x00, 0x00, 0x00, 0x04],
                Some(0x12),
                0x04
            ),
            Err(ScanError::InvalidResponseLength(18, 20))
        ));

        assert!(matches!(
            validate_response_header(
                &vec![0xA5, 0x5A, 0x05, 0x00, 0x00, 0x40, 0x06],
                None,
                0x81
            ),
            Err(ScanError::InvalidTypeCode(0x81, 6))
        ));

        // scan descriptor accepted without a length check
        assert!(matches!(
            validate_response_header(&vec![0xA5, 0x5A, 0x05, 0x00, 0x00, 0x40, 0x81], None, 0x81),
            Ok(())
        ));
    }

    #[test]
    fn test_payload_command() {
        // motor duty 660 = 0x0294
        let data = payload_command(0xF0, &[0x94, 0x02]);
        assert_eq!(data, vec![0xA5, 0xF0, 0x02, 0x94, 0x02, 0xA5 ^ 0xF0 ^ 0x02 ^ 0x94 ^ 0x02]);
    }

    #[test]
    fn test_decode_sample() {
        let (sample, start) = decode_sample(&[0x3E, 0x01, 0x2D, 0xA0, 0x0F]).unwrap();
        assert_eq!(sample.quality, 15);
        assert!(f64::abs(sample.angle_deg - 90.) < 1e-12);
        assert_eq!(sample.distance_mm, 1000.);
        assert!(!start);

        let (sample, start) = decode_sample(&encode_sample(47, 0., 250.25, true)).unwrap();
        assert_eq!(sample.quality, 47);
        assert_eq!(sample.angle_deg, 0.);
        assert_eq!(sample.distance_mm, 250.25);
        assert!(start);
    }

    #[test]
    fn test_decode_sample_rejects_bad_frames() {
        // start flag and inverted start flag agree
        assert!(matches!(
            decode_sample(&[0x3F, 0x01, 0x2D, 0xA0, 0x0F]),
            Err(ScanError::MalformedFrame(_))
        ));
        assert!(matches!(
            decode_sample(&[0x3C, 0x01, 0x2D, 0xA0, 0x0F]),
            Err(ScanError::MalformedFrame(_))
        ));
        // check bit cleared
        assert!(matches!(
            decode_sample(&[0x3E, 0x00, 0x2D, 0xA0, 0x0F]),
            Err(ScanError::MalformedFrame(_))
        ));
        assert!(matches!(
            decode_sample(&[0x3E, 0x01, 0x2D]),
            Err(ScanError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_parse_device_health() {
        assert_eq!(parse_device_health(&[0x00, 0x00, 0x00]), DeviceHealth::Good);
        assert_eq!(parse_device_health(&[0x01, 0x34, 0x12]), DeviceHealth::Warning(0x1234));
        assert_eq!(parse_device_health(&[0x02, 0x01, 0x00]), DeviceHealth::Error(1));
    }

    #[test]
    fn test_parse_device_info() {
        let info = parse_device_info(&[
            0x18, 0x1D, 0x01, 0x07, 0x02, 0x00, 0x02, 0x02, 0x01, 0x01, 0x00, 0x03, 0x00, 0x01,
            0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
        ]);
        assert_eq!(info.model_number, 0x18);
        assert_eq!(info.firmware_major_version, 1);
        assert_eq!(info.firmware_minor_version, 0x1D);
        assert_eq!(info.hardware_version, 7);
        assert_eq!(
            info.serial_number,
            [2, 0, 2, 2, 1, 1, 0, 3, 0, 1, 1, 1, 1, 1, 1, 1]
        );
    }
}
