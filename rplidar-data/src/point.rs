#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Cartesian point derived from one accepted sample.
///
/// Coordinates are in metres. The remaining fields record the sample the
/// point was computed from and the tilt of the sweep it belongs to.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub quality: u8,
    pub angle_deg: f64,
    pub distance_mm: f64,
    /// Zero for planar sweeps.
    pub tilt_deg: f64,
}

/// Points of one or more sealed rotations, in sample order.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PointCloud {
    pub points: Vec<Point>,
}

impl PointCloud {
    pub fn new(points: Vec<Point>) -> PointCloud {
        PointCloud { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// A planar cloud has every point captured without tilt, so on z = 0.
    pub fn is_planar(&self) -> bool {
        self.points.iter().all(|p| p.tilt_deg == 0.0)
    }

    /// Distinct tilts the cloud was captured at, in first-seen order.
    pub fn tilts(&self) -> Vec<f64> {
        let mut tilts: Vec<f64> = Vec::new();
        for point in &self.points {
            if !tilts.contains(&point.tilt_deg) {
                tilts.push(point.tilt_deg);
            }
        }
        tilts
    }

    /// Appends the points of another sweep.
    pub fn extend(&mut self, other: PointCloud) {
        self.points.extend(other.points);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Point> {
        self.points.iter()
    }
}

impl<'a> IntoIterator for &'a PointCloud {
    type Item = &'a Point;
    type IntoIter = std::slice::Iter<'a, Point>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at_tilt(tilt_deg: f64) -> Point {
        Point {
            tilt_deg,
            ..Default::default()
        }
    }

    #[test]
    fn test_planar_until_a_tilted_sweep_joins() {
        let mut cloud = PointCloud::new(vec![at_tilt(0.), at_tilt(0.)]);
        assert!(cloud.is_planar());
        assert_eq!(cloud.tilts(), vec![0.]);

        cloud.extend(PointCloud::new(vec![at_tilt(15.), at_tilt(15.)]));
        assert!(!cloud.is_planar());
        assert_eq!(cloud.len(), 4);
        assert_eq!(cloud.tilts(), vec![0., 15.]);
    }

    #[test]
    fn test_empty_cloud_is_planar() {
        assert!(PointCloud::default().is_planar());
        assert!(PointCloud::default().tilts().is_empty());
    }
}
