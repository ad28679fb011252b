//! Implements the pinhole camera model with radial-tangential distortion.
//!
//! This module provides the [`PinholeModel`] struct, the camera description
//! consumed by the resampling tools. It adheres to the [`CameraModel`] trait
//! defined in the parent `camera` module ([`crate::camera`]) and reads and
//! writes the Kalibr `pinhole`/`radtan` calibration format.

use crate::camera::kalibr::{
    KalibrCalibration, KalibrCamera, PINHOLE_CAMERA_MODEL, RADTAN_DISTORTION_MODEL,
};
use crate::camera::{
    validation, CameraModel, CameraModelError, Intrinsics, RadTanDistortion, Resolution,
};
use log::debug;
use nalgebra::{Matrix3, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::Write;

/// Represents a pinhole camera with radial-tangential lens distortion.
///
/// This struct holds the intrinsic parameters (focal length, principal point),
/// the four Kalibr `radtan` distortion coefficients and the resolution of the
/// images the calibration applies to.
///
/// # Examples
///
/// ```rust
/// use dataset_prep_tools::camera::{Intrinsics, PinholeModel, Resolution};
///
/// let model = PinholeModel::new(
///     Intrinsics { fx: 500.0, fy: 500.0, cx: 320.0, cy: 240.0 },
///     [0.0; 4],
///     Resolution { width: 640, height: 480 },
/// )
/// .unwrap();
///
/// assert_eq!(model.camera_matrix()[(0, 2)], 320.0);
/// assert_eq!(model.resolution.width, 640);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinholeModel {
    /// The intrinsic parameters of the camera, [`Intrinsics`] (fx, fy, cx, cy).
    pub intrinsics: Intrinsics,
    /// The resolution of the camera image, [`Resolution`] (width, height).
    pub resolution: Resolution,
    /// The 4 distortion coefficients: `[k1, k2, p1, p2]`.
    pub distortions: [f64; 4],
    /// Topic the calibration was recorded on, carried through when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rostopic: Option<String>,
}

impl PinholeModel {
    /// Creates a new [`PinholeModel`] and validates its parameters.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::FocalLengthMustBePositive`]
    /// * [`CameraModelError::PrincipalPointMustBeFinite`]
    /// * [`CameraModelError::InvalidParams`] if a distortion coefficient is not finite.
    pub fn new(
        intrinsics: Intrinsics,
        distortions: [f64; 4],
        resolution: Resolution,
    ) -> Result<Self, CameraModelError> {
        let model = PinholeModel {
            intrinsics,
            resolution,
            distortions,
            rostopic: None,
        };

        model.validate_params()?;

        Ok(model)
    }

    /// Builds a model from an already parsed Kalibr `cam0` block.
    pub fn from_kalibr(camera: &KalibrCamera) -> Result<Self, CameraModelError> {
        camera.validate()?;

        let intrinsics = Intrinsics {
            fx: camera.intrinsics[0],
            fy: camera.intrinsics[1],
            cx: camera.intrinsics[2],
            cy: camera.intrinsics[3],
        };
        let distortions = [
            camera.distortion_coeffs[0],
            camera.distortion_coeffs[1],
            camera.distortion_coeffs[2],
            camera.distortion_coeffs[3],
        ];
        let resolution = Resolution {
            width: camera.resolution[0],
            height: camera.resolution[1],
        };

        let mut model = PinholeModel::new(intrinsics, distortions, resolution)?;
        model.rostopic = camera.rostopic.clone();
        Ok(model)
    }

    pub fn to_kalibr(&self) -> KalibrCalibration {
        KalibrCalibration {
            cam0: KalibrCamera {
                camera_model: PINHOLE_CAMERA_MODEL.to_string(),
                distortion_coeffs: self.distortions.to_vec(),
                distortion_model: RADTAN_DISTORTION_MODEL.to_string(),
                intrinsics: vec![
                    self.intrinsics.fx,
                    self.intrinsics.fy,
                    self.intrinsics.cx,
                    self.intrinsics.cy,
                ],
                resolution: vec![self.resolution.width, self.resolution.height],
                rostopic: self.rostopic.clone(),
            },
        }
    }

    /// The 3x3 intrinsic matrix `K`.
    pub fn camera_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.intrinsics.fx,
            0.0,
            self.intrinsics.cx,
            0.0,
            self.intrinsics.fy,
            self.intrinsics.cy,
            0.0,
            0.0,
            1.0,
        )
    }

    pub fn distortion(&self) -> RadTanDistortion {
        RadTanDistortion::from_coeffs(&self.distortions)
    }

    /// Maps an undistorted normalized point to (distorted) pixel coordinates.
    ///
    /// No bounds check is made; resampling needs coordinates that fall outside
    /// the image as well.
    pub fn normalized_to_pixel(&self, normalized: &Vector2<f64>) -> Vector2<f64> {
        let distorted = self.distortion().distort(normalized);
        Vector2::new(
            self.intrinsics.fx * distorted.x + self.intrinsics.cx,
            self.intrinsics.fy * distorted.y + self.intrinsics.cy,
        )
    }

    /// Maps (distorted) pixel coordinates to an undistorted normalized point.
    pub fn pixel_to_normalized(&self, pixel: &Vector2<f64>) -> Vector2<f64> {
        let distorted = Vector2::new(
            (pixel.x - self.intrinsics.cx) / self.intrinsics.fx,
            (pixel.y - self.intrinsics.cy) / self.intrinsics.fy,
        );
        self.distortion().undistort(&distorted)
    }

    fn contains(&self, pixel: &Vector2<f64>) -> bool {
        pixel.x >= 0.0
            && pixel.x < self.resolution.width as f64
            && pixel.y >= 0.0
            && pixel.y < self.resolution.height as f64
    }
}

/// Prints the model the way the tools report it on the console.
impl fmt::Display for PinholeModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let k = self.camera_matrix();
        writeln!(f, "PinholeModel:")?;
        writeln!(f, "K =")?;
        for row in 0..3 {
            writeln!(
                f,
                "  [{:12.6} {:12.6} {:12.6}]",
                k[(row, 0)],
                k[(row, 1)],
                k[(row, 2)]
            )?;
        }
        writeln!(f, "D = {:?}", self.distortions)?;
        write!(
            f,
            "shape = [{}, {}]",
            self.resolution.height, self.resolution.width
        )
    }
}

impl CameraModel for PinholeModel {
    /// Projects a 3D point in camera coordinates to distorted pixel coordinates.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::PointAtCameraCenter`]: If the point's Z-coordinate is too close to zero.
    /// * [`CameraModelError::ProjectionOutSideImage`]: If the projection falls outside the resolution.
    fn project(&self, point_3d: &Vector3<f64>) -> Result<Vector2<f64>, CameraModelError> {
        // If z is very small, the point is at the camera center
        if point_3d.z < f64::EPSILON.sqrt() {
            return Err(CameraModelError::PointAtCameraCenter);
        }

        let normalized = Vector2::new(point_3d.x / point_3d.z, point_3d.y / point_3d.z);
        let pixel = self.normalized_to_pixel(&normalized);

        if !self.contains(&pixel) {
            return Err(CameraModelError::ProjectionOutSideImage);
        }

        Ok(pixel)
    }

    /// Unprojects a distorted pixel to a unit-length ray in camera coordinates.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::PointIsOutSideImage`]: If the pixel is outside the resolution.
    fn unproject(&self, point_2d: &Vector2<f64>) -> Result<Vector3<f64>, CameraModelError> {
        if !self.contains(point_2d) {
            return Err(CameraModelError::PointIsOutSideImage);
        }

        let normalized = self.pixel_to_normalized(point_2d);

        Ok(Vector3::new(normalized.x, normalized.y, 1.0).normalize())
    }

    /// Loads camera parameters from a Kalibr YAML file.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::IOError`]: If the file cannot be read.
    /// * [`CameraModelError::YamlError`]: If the document is malformed or has no `cam0` block.
    /// * [`CameraModelError::UnsupportedCameraModel`] / [`CameraModelError::UnsupportedDistortionModel`]:
    ///   If the calibration is not `pinhole` / `radtan`.
    /// * [`CameraModelError::InvalidParams`]: If an array has the wrong number of values.
    ///
    /// # Related
    /// * [`PinholeModel::save_to_yaml()`]
    fn load_from_yaml(path: &str) -> Result<Self, CameraModelError> {
        let contents = fs::read_to_string(path)?;
        let calibration = KalibrCalibration::from_yaml_str(&contents)?;
        let model = PinholeModel::from_kalibr(&calibration.cam0)?;
        debug!("Loaded calibration from {path}: {:?}", model);
        Ok(model)
    }

    /// Saves the camera model to a Kalibr YAML file.
    ///
    /// # Related
    /// * [`PinholeModel::load_from_yaml()`]
    fn save_to_yaml(&self, path: &str) -> Result<(), CameraModelError> {
        let yaml_string = self.to_kalibr().to_yaml_string()?;

        let mut file = fs::File::create(path)?;
        file.write_all(yaml_string.as_bytes())?;

        Ok(())
    }

    fn validate_params(&self) -> Result<(), CameraModelError> {
        validation::validate_intrinsics(&self.intrinsics)?;
        validation::validate_distortion(&self.distortions)?;
        Ok(())
    }

    fn get_resolution(&self) -> Resolution {
        self.resolution
    }

    fn get_intrinsics(&self) -> Intrinsics {
        self.intrinsics.clone()
    }

    /// Returns `[k1, k2, p1, p2]`.
    fn get_distortion(&self) -> Vec<f64> {
        self.distortions.to_vec()
    }
}
