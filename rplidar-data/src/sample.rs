#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Distance the sensor reports when a pulse produced no return.
pub const NO_RETURN_MM: f64 = 0.0;

/// One measurement decoded from the sensor.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RawSample {
    /// Confidence reported by the sensor.
    pub quality: u8,
    /// Heading in degrees, clockwise from the sensor's zero mark.
    pub angle_deg: f64,
    /// Range in millimetres.
    pub distance_mm: f64,
}

impl RawSample {
    pub fn new(quality: u8, angle_deg: f64, distance_mm: f64) -> Self {
        RawSample {
            quality,
            angle_deg,
            distance_mm,
        }
    }

    /// `false` when the pulse came back empty.
    pub fn has_return(&self) -> bool {
        self.distance_mm != NO_RETURN_MM
    }
}
