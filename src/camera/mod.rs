//! Camera model types shared by the resampling, video and bag tools.
//!
//! Only the pinhole projection with radial-tangential lens distortion is
//! supported, which is what Kalibr writes as `camera_model: pinhole` and
//! `distortion_model: radtan`.

use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

pub mod kalibr;
pub mod pinhole;
pub mod rad_tan;

pub use pinhole::PinholeModel;
pub use rad_tan::RadTanDistortion;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Resolution { width, height }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CameraModelError {
    #[error("Projection is outside the image")]
    ProjectionOutSideImage,
    #[error("Input point is outside the image")]
    PointIsOutSideImage,
    #[error("z is close to zero, point is at camera center")]
    PointAtCameraCenter,
    #[error("Focal length must be positive")]
    FocalLengthMustBePositive,
    #[error("Principal point must be finite")]
    PrincipalPointMustBeFinite,
    #[error("Unsupported camera model '{0}', expected 'pinhole'")]
    UnsupportedCameraModel(String),
    #[error("Unsupported distortion model '{0}', expected 'radtan'")]
    UnsupportedDistortionModel(String),
    #[error("Invalid camera parameters: {0}")]
    InvalidParams(String),
    #[error("Failed to load YAML: {0}")]
    YamlError(String),
    #[error("IO Error: {0}")]
    IOError(String),
}

impl CameraModelError {
    /// True for errors raised because the calibration document names a camera
    /// or distortion model this crate cannot handle.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            CameraModelError::UnsupportedCameraModel(_)
                | CameraModelError::UnsupportedDistortionModel(_)
        )
    }
}

impl From<std::io::Error> for CameraModelError {
    fn from(err: std::io::Error) -> Self {
        CameraModelError::IOError(err.to_string())
    }
}

impl From<serde_yaml::Error> for CameraModelError {
    fn from(err: serde_yaml::Error) -> Self {
        CameraModelError::YamlError(err.to_string())
    }
}

/// Trait defining the core functionality for camera models
pub trait CameraModel {
    /// Project a 3D point to 2D image coordinates
    fn project(&self, point_3d: &Vector3<f64>) -> Result<Vector2<f64>, CameraModelError>;

    /// Unproject 2D image coordinates to a unit 3D ray
    fn unproject(&self, point_2d: &Vector2<f64>) -> Result<Vector3<f64>, CameraModelError>;

    /// Load camera parameters from a YAML file
    fn load_from_yaml(path: &str) -> Result<Self, CameraModelError>
    where
        Self: Sized;

    /// Save camera parameters to a YAML file
    fn save_to_yaml(&self, path: &str) -> Result<(), CameraModelError>;

    /// Validate camera parameters
    fn validate_params(&self) -> Result<(), CameraModelError>;

    fn get_resolution(&self) -> Resolution;

    fn get_intrinsics(&self) -> Intrinsics;

    fn get_distortion(&self) -> Vec<f64>;
}

/// Common validation functions for camera parameters
pub mod validation {
    use super::*;

    pub fn validate_intrinsics(intrinsics: &Intrinsics) -> Result<(), CameraModelError> {
        if !(intrinsics.fx > 0.0 && intrinsics.fy > 0.0) {
            return Err(CameraModelError::FocalLengthMustBePositive);
        }
        if !intrinsics.cx.is_finite() || !intrinsics.cy.is_finite() {
            return Err(CameraModelError::PrincipalPointMustBeFinite);
        }
        Ok(())
    }

    pub fn validate_distortion(distortions: &[f64]) -> Result<(), CameraModelError> {
        if let Some(index) = distortions.iter().position(|d| !d.is_finite()) {
            return Err(CameraModelError::InvalidParams(format!(
                "Distortion coefficient at index {index} is not finite"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_intrinsics_rejects_bad_values() {
        let mut intrinsics = Intrinsics {
            fx: 500.0,
            fy: 500.0,
            cx: 320.0,
            cy: 240.0,
        };
        assert!(validation::validate_intrinsics(&intrinsics).is_ok());

        intrinsics.fy = 0.0;
        assert!(matches!(
            validation::validate_intrinsics(&intrinsics),
            Err(CameraModelError::FocalLengthMustBePositive)
        ));

        intrinsics.fy = f64::NAN;
        assert!(validation::validate_intrinsics(&intrinsics).is_err());

        intrinsics.fy = 500.0;
        intrinsics.cx = f64::INFINITY;
        assert!(matches!(
            validation::validate_intrinsics(&intrinsics),
            Err(CameraModelError::PrincipalPointMustBeFinite)
        ));
    }

    #[test]
    fn test_format_error_classification() {
        assert!(CameraModelError::UnsupportedDistortionModel("fisheye".into()).is_format_error());
        assert!(CameraModelError::UnsupportedCameraModel("omni".into()).is_format_error());
        assert!(!CameraModelError::InvalidParams("x".into()).is_format_error());
    }
}
