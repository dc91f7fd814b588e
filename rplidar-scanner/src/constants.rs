pub(crate) const HEADER_SIZE: usize = 7;
pub(crate) const SAMPLE_FRAME_SIZE: usize = 5;
pub(crate) const LIDAR_CMD_SYNC_BYTE: u8 = 0xA5;
pub(crate) const LIDAR_ANS_SYNC_BYTE: u8 = 0x5A;
pub(crate) const LIDAR_CMD_STOP: u8 = 0x25;
pub(crate) const LIDAR_CMD_SCAN: u8 = 0x20;
pub(crate) const LIDAR_CMD_GET_DEVICE_INFO: u8 = 0x50;
pub(crate) const LIDAR_CMD_GET_DEVICE_HEALTH: u8 = 0x52;
pub(crate) const LIDAR_CMD_SET_MOTOR_PWM: u8 = 0xF0;
pub(crate) const LIDAR_ANS_TYPE_DEVINFO: u8 = 0x04;
pub(crate) const LIDAR_ANS_LENGTH_DEVINFO: u8 = 20;
pub(crate) const LIDAR_ANS_TYPE_DEVHEALTH: u8 = 0x06;
pub(crate) const LIDAR_ANS_LENGTH_DEVHEALTH: u8 = 3;
pub(crate) const LIDAR_ANS_TYPE_MEASUREMENT: u8 = 0x81;
pub(crate) const LIDAR_ANS_LENGTH_MEASUREMENT: u8 = 5;
pub(crate) const POLL_INTERVAL_MS: u64 = 2;
pub(crate) const HANDSHAKE_TIMEOUT_MS: u64 = 1000;
pub(crate) const PROBE_TIMEOUT_MS: u64 = 50;

/// Silicon Labs CP210x bridge fitted to the sensor's USB adapter board.
pub const CP210X_VID: u16 = 0x10C4;
pub const CP210X_PID: u16 = 0xEA60;
