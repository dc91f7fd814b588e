#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Supported sensor models.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SensorModel {
    #[default]
    A1,
    A2,
    A3,
    S1,
}

impl SensorModel {
    /// Whether the motor speed is set with the PWM command instead of DTR alone.
    pub fn has_pwm_motor(self) -> bool {
        !matches!(self, SensorModel::A1)
    }
}

pub fn model_baud_rate(model: SensorModel) -> u32 {
    match model {
        SensorModel::A1 | SensorModel::A2 => 115_200,
        SensorModel::A3 | SensorModel::S1 => 256_000,
    }
}
