pub mod device_info;
pub mod point;
pub mod rotation;
pub mod sample;
pub mod sensor_model;
pub mod session;

pub use device_info::{DeviceHealth, DeviceInfo};
pub use point::{Point, PointCloud};
pub use rotation::Rotation;
pub use sample::{RawSample, NO_RETURN_MM};
pub use sensor_model::{model_baud_rate, SensorModel};
pub use session::{FailureKind, OutputPaths, Progress, SessionState};
