use rplidar_data::PointCloud;
use serde::Serialize;
use std::collections::HashSet;

const BIN_WIDTH_DEG: f64 = 2.0;
const N_BINS: usize = 180;

/// 2 degree bin holding `angle_deg`.
pub(crate) fn bin_of(angle_deg: f64) -> usize {
    ((angle_deg.rem_euclid(360.) / BIN_WIDTH_DEG) as usize).min(N_BINS - 1)
}

/// How evenly a sweep covers the full circle.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Coverage {
    /// Fraction of 2 degree bins holding at least one point.
    pub coverage: f64,
    /// Widest angular gap between neighbouring points, including the one
    /// across 360 degrees.
    pub max_gap_deg: f64,
    pub points: usize,
}

impl Coverage {
    pub fn of(cloud: &PointCloud) -> Coverage {
        Coverage::of_angles(cloud.iter().map(|p| p.angle_deg))
    }

    /// Coverage of a set of headings in degrees.
    pub fn of_angles<I: IntoIterator<Item = f64>>(angles: I) -> Coverage {
        let mut angles: Vec<f64> = angles.into_iter().map(|a| a.rem_euclid(360.)).collect();
        angles.sort_by(f64::total_cmp);

        let bins: HashSet<usize> = angles.iter().map(|&a| bin_of(a)).collect();

        let max_gap_deg = match (angles.first(), angles.last()) {
            (Some(first), Some(last)) => angles
                .windows(2)
                .map(|pair| pair[1] - pair[0])
                .fold(360. - last + first, f64::max),
            _ => 360.,
        };

        Coverage {
            coverage: bins.len() as f64 / N_BINS as f64,
            max_gap_deg,
            points: angles.len(),
        }
    }

    pub fn is_acceptable(&self, min_coverage: f64, max_gap_deg: f64) -> bool {
        self.coverage >= min_coverage && self.max_gap_deg <= max_gap_deg
    }
}
