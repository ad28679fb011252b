//! Serde schema for Kalibr camera calibration documents.
//!
//! A Kalibr camchain stores one block per camera (`cam0`, `cam1`, ...). The
//! tools in this crate only read and write `cam0`:
//!
//! ```yaml
//! cam0:
//!   camera_model: pinhole
//!   distortion_coeffs: [-0.28340811, 0.07395907, 0.00019359, 1.76187114e-05]
//!   distortion_model: radtan
//!   intrinsics: [458.654, 457.296, 367.215, 248.375]
//!   resolution: [752, 480]
//! ```
//!
//! Deserialization only checks the document shape. The semantic checks (model
//! names, array lengths) live in [`KalibrCamera::validate`] so that the error
//! tells the user which field is wrong.

use serde::{Deserialize, Serialize};

use crate::camera::CameraModelError;

pub const PINHOLE_CAMERA_MODEL: &str = "pinhole";
pub const RADTAN_DISTORTION_MODEL: &str = "radtan";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KalibrCalibration {
    pub cam0: KalibrCamera,
}

/// Field order matches the alphabetical key order Kalibr emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KalibrCamera {
    pub camera_model: String,
    pub distortion_coeffs: Vec<f64>,
    pub distortion_model: String,
    /// `[fx, fy, cx, cy]`
    pub intrinsics: Vec<f64>,
    /// `[width, height]`
    pub resolution: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rostopic: Option<String>,
}

impl KalibrCamera {
    /// Checks model names first, then the array lengths.
    pub fn validate(&self) -> Result<(), CameraModelError> {
        if self.camera_model != PINHOLE_CAMERA_MODEL {
            return Err(CameraModelError::UnsupportedCameraModel(
                self.camera_model.clone(),
            ));
        }
        if self.distortion_model != RADTAN_DISTORTION_MODEL {
            return Err(CameraModelError::UnsupportedDistortionModel(
                self.distortion_model.clone(),
            ));
        }
        expect_len("intrinsics", self.intrinsics.len(), 4)?;
        expect_len("distortion_coeffs", self.distortion_coeffs.len(), 4)?;
        expect_len("resolution", self.resolution.len(), 2)?;
        Ok(())
    }
}

fn expect_len(field: &str, found: usize, expected: usize) -> Result<(), CameraModelError> {
    if found != expected {
        return Err(CameraModelError::InvalidParams(format!(
            "Expected {expected} values in '{field}', found {found}"
        )));
    }
    Ok(())
}

impl KalibrCalibration {
    pub fn from_yaml_str(contents: &str) -> Result<Self, CameraModelError> {
        let calibration: KalibrCalibration = serde_yaml::from_str(contents)?;
        calibration.cam0.validate()?;
        Ok(calibration)
    }

    pub fn to_yaml_string(&self) -> Result<String, CameraModelError> {
        Ok(serde_yaml::to_string(self)?)
    }
}
