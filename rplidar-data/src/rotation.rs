use crate::sample::RawSample;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Struct to hold one sealed 360 degree sweep.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Rotation {
    /// Samples that passed the quality and no-return filters, in arrival order.
    pub accepted: Vec<RawSample>,
    /// Samples seen during the sweep but left out of `accepted`.
    pub rejected: usize,
}

impl Rotation {
    /// Every sample seen during the sweep, accepted or not.
    pub fn total(&self) -> usize {
        self.accepted.len() + self.rejected
    }

    pub fn accepted_count(&self) -> usize {
        self.accepted.len()
    }
}
