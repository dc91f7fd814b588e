//! Polar to Cartesian conversion.
//!
//! Angles follow the sensor's convention: zero straight ahead along +y,
//! increasing clockwise when viewed from above, so 90 degrees lies on +x.

use crate::error::{Result, ScanError};
use crate::numeric::degree_to_radian;
use rplidar_data::{Point, PointCloud, RawSample, Rotation};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointTransformer {
    tilt_deg: f64,
    tilt_sin: f64,
    tilt_cos: f64,
}

impl PointTransformer {
    /// `tilt_deg` rotates the scan plane about the sensor's x axis; zero keeps
    /// every point on z = 0.
    pub fn new(tilt_deg: f64) -> PointTransformer {
        let tilt = degree_to_radian(tilt_deg);
        PointTransformer {
            tilt_deg,
            tilt_sin: tilt.sin(),
            tilt_cos: tilt.cos(),
        }
    }

    pub fn transform(&self, sample: &RawSample) -> Result<Point> {
        if !sample.distance_mm.is_finite() || sample.distance_mm < 0. {
            return Err(ScanError::InvalidSample(format!(
                "distance {} mm at {} degrees",
                sample.distance_mm, sample.angle_deg
            )));
        }
        if !sample.angle_deg.is_finite() {
            return Err(ScanError::InvalidSample(format!(
                "angle {} degrees",
                sample.angle_deg
            )));
        }

        let distance_m = sample.distance_mm / 1000.;
        let angle = degree_to_radian(sample.angle_deg);
        let x = distance_m * angle.sin();
        let planar_y = distance_m * angle.cos();

        let (y, z) = if self.tilt_deg == 0. {
            (planar_y, 0.)
        } else {
            (planar_y * self.tilt_cos, planar_y * self.tilt_sin)
        };

        Ok(Point {
            x,
            y,
            z,
            quality: sample.quality,
            angle_deg: sample.angle_deg,
            distance_mm: sample.distance_mm,
            tilt_deg: self.tilt_deg,
        })
    }

    /// Converts every accepted sample of a sealed sweep, in order.
    pub fn cloud(&self, rotation: &Rotation) -> Result<PointCloud> {
        let points = rotation
            .accepted
            .iter()
            .map(|sample| self.transform(sample))
            .collect::<Result<Vec<_>>>()?;
        Ok(PointCloud::new(points))
    }
}

pub fn transform(sample: &RawSample, tilt_deg: f64) -> Result<Point> {
    PointTransformer::new(tilt_deg).transform(sample)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn radian_to_degree(e: f64) -> f64 {
        e * 180. / std::f64::consts::PI
    }

    #[test]
    fn test_planar_axes() {
        let point = transform(&RawSample::new(20, 0., 1000.), 0.).unwrap();
        assert!(point.x.abs() < 1e-12);
        assert!((point.y - 1.).abs() < 1e-12);
        assert_eq!(point.z, 0.);

        let point = transform(&RawSample::new(20, 90., 2000.), 0.).unwrap();
        assert!((point.x - 2.).abs() < 1e-12);
        assert!(point.y.abs() < 1e-12);
    }

    #[test]
    fn test_planar_inverse_recovers_polar() {
        for i in 0..720 {
            let angle = i as f64 * 0.5;
            let distance = 150. + i as f64 * 7.25;
            let point = transform(&RawSample::new(10, angle, distance), 0.).unwrap();

            let recovered_distance = f64::hypot(point.x, point.y) * 1000.;
            let recovered_angle = radian_to_degree(f64::atan2(point.x, point.y)).rem_euclid(360.);
            assert!((recovered_distance - distance).abs() < 1e-9);
            let diff = (recovered_angle - angle).abs();
            assert!(diff < 1e-9 || (360. - diff) < 1e-9, "{} vs {}", recovered_angle, angle);
        }
    }

    #[test]
    fn test_tilt_lifts_points_out_of_plane() {
        let point = transform(&RawSample::new(20, 0., 1000.), 30.).unwrap();
        assert!((point.y - f64::cos(30f64.to_radians())).abs() < 1e-12);
        assert!((point.z - 0.5).abs() < 1e-12);
        assert_eq!(point.tilt_deg, 30.);

        // points on the tilt axis stay put
        let point = transform(&RawSample::new(20, 90., 1000.), 30.).unwrap();
        assert!((point.x - 1.).abs() < 1e-12);
        assert!(point.z.abs() < 1e-12);

        // tilt keeps the range
        let point = transform(&RawSample::new(20, 33., 1234.), 45.).unwrap();
        let range = (point.x * point.x + point.y * point.y + point.z * point.z).sqrt();
        assert!((range - 1.234).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_invalid_samples() {
        assert!(matches!(
            transform(&RawSample::new(20, 0., -1.), 0.),
            Err(ScanError::InvalidSample(_))
        ));
        assert!(matches!(
            transform(&RawSample::new(20, f64::NAN, 10.), 0.),
            Err(ScanError::InvalidSample(_))
        ));
    }

    #[test]
    fn test_cloud_keeps_sample_order() {
        let rotation = Rotation {
            accepted: vec![
                RawSample::new(20, 0., 1000.),
                RawSample::new(30, 90., 2000.),
            ],
            rejected: 3,
        };
        let cloud = PointTransformer::new(0.).cloud(&rotation).unwrap();
        assert_eq!(cloud.len(), 2);
        assert!(cloud.is_planar());
        assert_eq!(cloud.points[1].quality, 30);
    }
}
