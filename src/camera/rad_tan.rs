//! Radial-tangential (Brown-Conrady, four coefficient) lens distortion.
//!
//! The distortion acts on normalized image coordinates, i.e. `(X/Z, Y/Z)`
//! before the intrinsic matrix is applied. Kalibr's `radtan` model stores the
//! coefficients in the order `[k1, k2, p1, p2]`; there is no `k3` term.

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

/// Number of fixed-point iterations used to invert the distortion.
///
/// Same count as the default of OpenCV's `undistortPoints`.
pub const UNDISTORT_ITERATIONS: usize = 5;

/// Radial-tangential distortion coefficients.
///
/// # Examples
///
/// ```rust
/// use nalgebra::Vector2;
/// use dataset_prep_tools::camera::RadTanDistortion;
///
/// let distortion = RadTanDistortion::from_coeffs(&[-0.28, 0.07, 0.0002, 0.00002]);
/// let point = Vector2::new(0.1, -0.2);
/// let distorted = distortion.distort(&point);
/// let restored = distortion.undistort(&distorted);
/// assert!((restored - point).norm() < 1e-4);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RadTanDistortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
}

impl RadTanDistortion {
    pub fn from_coeffs(coeffs: &[f64; 4]) -> Self {
        RadTanDistortion {
            k1: coeffs[0],
            k2: coeffs[1],
            p1: coeffs[2],
            p2: coeffs[3],
        }
    }

    /// Coefficients in Kalibr order `[k1, k2, p1, p2]`.
    pub fn coeffs(&self) -> [f64; 4] {
        [self.k1, self.k2, self.p1, self.p2]
    }

    pub fn is_zero(&self) -> bool {
        self.coeffs().iter().all(|c| *c == 0.0)
    }

    /// Applies the distortion to an undistorted normalized point.
    pub fn distort(&self, point: &Vector2<f64>) -> Vector2<f64> {
        let x = point.x;
        let y = point.y;

        let x2 = x * x;
        let y2 = y * y;
        let r2 = x2 + y2;
        let xy2 = 2.0 * x * y;

        let radial = 1.0 + (self.k2 * r2 + self.k1) * r2;

        Vector2::new(
            x * radial + self.p1 * xy2 + self.p2 * (r2 + 2.0 * x2),
            y * radial + self.p1 * (r2 + 2.0 * y2) + self.p2 * xy2,
        )
    }

    /// Recovers the undistorted normalized point from a distorted one.
    ///
    /// Uses the fixed-point scheme `x = (x_d - tangential(x)) / radial(x)`
    /// seeded with the distorted point, run for [`UNDISTORT_ITERATIONS`]
    /// steps. The scheme converges for the moderate distortion typical of
    /// pinhole lenses. Once the radial factor turns non-positive the point is
    /// past the fold of the model, and the distorted point is returned as is,
    /// like OpenCV's `undistortPoints` does.
    pub fn undistort(&self, distorted: &Vector2<f64>) -> Vector2<f64> {
        let x0 = distorted.x;
        let y0 = distorted.y;
        let mut x = x0;
        let mut y = y0;

        for _ in 0..UNDISTORT_ITERATIONS {
            let r2 = x * x + y * y;
            let radial = 1.0 + (self.k2 * r2 + self.k1) * r2;
            if radial <= 0.0 {
                x = x0;
                y = y0;
                break;
            }
            let inv_radial = 1.0 / radial;
            let delta_x = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
            let delta_y = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
            x = (x0 - delta_x) * inv_radial;
            y = (y0 - delta_y) * inv_radial;
        }

        Vector2::new(x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn euroc_distortion() -> RadTanDistortion {
        RadTanDistortion::from_coeffs(&[-0.28340811, 0.07395907, 0.00019359, 1.76187114e-05])
    }

    #[test]
    fn test_zero_distortion_is_identity() {
        let distortion = RadTanDistortion::default();
        assert!(distortion.is_zero());

        let point = Vector2::new(0.3, -0.4);
        assert_eq!(distortion.distort(&point), point);
        assert_eq!(distortion.undistort(&point), point);
    }

    #[test]
    fn test_distort_matches_closed_form() {
        let distortion = RadTanDistortion::from_coeffs(&[0.1, 0.01, 0.001, 0.002]);
        let (x, y) = (0.2_f64, 0.1_f64);
        let r2 = x * x + y * y;
        let radial = 1.0 + 0.1 * r2 + 0.01 * r2 * r2;
        let expected_x = x * radial + 2.0 * 0.001 * x * y + 0.002 * (r2 + 2.0 * x * x);
        let expected_y = y * radial + 0.001 * (r2 + 2.0 * y * y) + 2.0 * 0.002 * x * y;

        let distorted = distortion.distort(&Vector2::new(x, y));
        assert_relative_eq!(distorted.x, expected_x, epsilon = 1e-15);
        assert_relative_eq!(distorted.y, expected_y, epsilon = 1e-15);
    }

    #[test]
    fn test_undistort_inverts_distort_near_center() {
        let distortion = euroc_distortion();

        let test_points = [
            Vector2::new(0.0, 0.0),
            Vector2::new(0.05, 0.02),
            Vector2::new(-0.1, 0.08),
            Vector2::new(0.12, -0.1),
        ];

        for point in test_points {
            let restored = distortion.undistort(&distortion.distort(&point));
            assert!(
                (restored - point).norm() < 1e-4,
                "point {:?} restored as {:?}",
                point,
                restored
            );
        }
    }

    #[test]
    fn test_undistort_keeps_point_past_the_fold() {
        // 1 - 0.5 * r2 is negative at the corner of a wide 1280x720 image.
        let distortion = RadTanDistortion::from_coeffs(&[-0.5, 0.0, 0.0, 0.0]);
        let corner = Vector2::new(-1.28, -0.72);
        assert_eq!(distortion.undistort(&corner), corner);

        // The first step is valid but jumps past the fold, so the seed is kept.
        let edge = Vector2::new(-1.28, 0.0);
        assert_eq!(distortion.undistort(&edge), edge);

        // Points well inside the fold still converge.
        let point = Vector2::new(0.2, -0.1);
        let restored = distortion.undistort(&distortion.distort(&point));
        assert!((restored - point).norm() < 1e-3);
    }

    #[test]
    fn test_coeffs_round_trip_order() {
        let coeffs = [1.0, 2.0, 3.0, 4.0];
        let distortion = RadTanDistortion::from_coeffs(&coeffs);
        assert_eq!(distortion.k1, 1.0);
        assert_eq!(distortion.p2, 4.0);
        assert_eq!(distortion.coeffs(), coeffs);
    }
}
