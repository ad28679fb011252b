//! Undistort, rescale and center-crop images of a calibrated pinhole camera.
//!
//! The pipeline for a folder of images sharing one calibration is:
//!
//! 1. [`derive_target_geometry`] picks the rescaled size that keeps the source
//!    aspect ratio at the requested height, and the centered square crop.
//! 2. [`compute_undistort_remap`] finds the new camera for the rescaled,
//!    undistorted image and builds the [`RemapTable`] once.
//! 3. [`apply_remap_and_crop`] transforms each image.
//! 4. [`finalize_intrinsics`] shifts the principal point by the crop offset.
//!
//! [`batch::run_sample_and_crop`] drives the steps over a directory.

use crate::camera::{CameraModelError, PinholeModel, Resolution};
use crate::util::UtilError;
use image::DynamicImage;
use log::debug;
use serde::{Deserialize, Serialize};

pub mod batch;
pub mod optimal;
pub mod remap;

pub use batch::{run_sample_and_crop, BatchSummary, SampleAndCropConfig};
pub use optimal::{optimal_new_intrinsics, PixelRoi};
pub use remap::{remap, CoordinateGrid, RemapTable};

/// Interpolation between the valid-pixels-only (0) and all-pixels (1) camera.
/// Zero gives the tightest view without black borders.
pub const UNDISTORT_ALPHA: f64 = 0.0;

#[derive(thiserror::Error, Debug)]
pub enum ResampleError {
    #[error("Precondition failed: {0}")]
    Precondition(String),
    #[error("Camera model error: {0}")]
    CameraModel(#[from] CameraModelError),
    #[error("Unsupported image layout: {0}")]
    UnsupportedImage(String),
    #[error("Image error: {0}")]
    ImageError(String),
    #[error("IO Error: {0}")]
    IOError(String),
}

impl From<std::io::Error> for ResampleError {
    fn from(err: std::io::Error) -> Self {
        ResampleError::IOError(err.to_string())
    }
}

impl From<UtilError> for ResampleError {
    fn from(err: UtilError) -> Self {
        match err {
            UtilError::NoFilesFound(_) | UtilError::ImageRead { .. } => {
                ResampleError::Precondition(err.to_string())
            }
            UtilError::ImageWrite { .. } => ResampleError::ImageError(err.to_string()),
            UtilError::InvalidParams(_) => ResampleError::Precondition(err.to_string()),
            UtilError::IOError(msg) => ResampleError::IOError(msg),
        }
    }
}

/// Half-open column range `[left, right)` kept from the rescaled image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRegion {
    pub left: u32,
    pub right: u32,
}

impl CropRegion {
    pub fn width(&self) -> u32 {
        self.right - self.left
    }
}

/// Rescaled (pre-crop) image size and the centered crop inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGeometry {
    pub rescaled: Resolution,
    pub crop: CropRegion,
}

/// Computes the rescaled size and the centered square crop for `target_height`.
///
/// `rescaled.width = floor(target_height * width / height)` and the crop
/// starts at `(rescaled.width - target_height) / 2`.
///
/// # Errors
///
/// [`ResampleError::Precondition`] unless the source is landscape
/// (`height < width`) and taller than `target_height`, and `target_height > 0`.
///
/// # Examples
///
/// ```rust
/// use dataset_prep_tools::camera::Resolution;
/// use dataset_prep_tools::resample::derive_target_geometry;
///
/// let geometry = derive_target_geometry(&Resolution::new(1500, 1000), 500).unwrap();
/// assert_eq!(geometry.rescaled, Resolution::new(750, 500));
/// assert_eq!((geometry.crop.left, geometry.crop.right), (125, 625));
/// ```
pub fn derive_target_geometry(
    original: &Resolution,
    target_height: u32,
) -> Result<TargetGeometry, ResampleError> {
    if original.height >= original.width {
        return Err(ResampleError::Precondition(format!(
            "Only landscape images are supported, got height = {}, width = {}",
            original.height, original.width
        )));
    }
    if target_height == 0 || original.height <= target_height {
        return Err(ResampleError::Precondition(format!(
            "Target height must be in (0, {}), got {}",
            original.height, target_height
        )));
    }

    let rescaled_width =
        (target_height as u64 * original.width as u64 / original.height as u64) as u32;
    let left = (rescaled_width - target_height) / 2;

    Ok(TargetGeometry {
        rescaled: Resolution::new(rescaled_width, target_height),
        crop: CropRegion {
            left,
            right: left + target_height,
        },
    })
}

/// Computes the camera of the undistorted, rescaled image and the remap table
/// producing that image from the original.
///
/// The returned model has the new intrinsics, no distortion and the
/// `rescaled` resolution. The [`PixelRoi`] is the valid-pixel rectangle of the
/// undistorted image.
///
/// # Errors
///
/// [`ResampleError::Precondition`] if `rescaled` is empty, or the undistorted
/// image region collapses (degenerate calibration).
pub fn compute_undistort_remap(
    model: &PinholeModel,
    rescaled: &Resolution,
) -> Result<(PinholeModel, RemapTable, PixelRoi), ResampleError> {
    if rescaled.width == 0 || rescaled.height == 0 {
        return Err(ResampleError::Precondition(format!(
            "Rescaled size must be non-empty, got {}x{}",
            rescaled.width, rescaled.height
        )));
    }

    let (new_intrinsics, roi) = optimal_new_intrinsics(model, rescaled, UNDISTORT_ALPHA);
    debug!("roi = {:?}", roi);

    let new_model = PinholeModel::new(new_intrinsics, [0.0; 4], *rescaled).map_err(|e| {
        ResampleError::Precondition(format!("Undistorted camera is degenerate: {e}"))
    })?;

    let table = RemapTable::undistort_rectify(model, &new_model.intrinsics, rescaled);

    Ok((
        PinholeModel {
            rostopic: model.rostopic.clone(),
            ..new_model
        },
        table,
        roi,
    ))
}

/// Resamples `image` through `table` and keeps the columns of `crop`.
///
/// # Errors
///
/// * [`ResampleError::Precondition`] if `crop` does not fit in the table width.
/// * [`ResampleError::UnsupportedImage`] for unsupported pixel layouts.
pub fn apply_remap_and_crop(
    image: &DynamicImage,
    table: &RemapTable,
    crop: &CropRegion,
) -> Result<DynamicImage, ResampleError> {
    if crop.left >= crop.right || crop.right > table.width() {
        return Err(ResampleError::Precondition(format!(
            "Crop columns [{}, {}) do not fit in width {}",
            crop.left,
            crop.right,
            table.width()
        )));
    }

    let sampled = remap(image, table)?;
    Ok(sampled.crop_imm(crop.left, 0, crop.width(), table.height()))
}

/// Moves the principal point into the cropped frame and records the square
/// output resolution.
///
/// # Examples
///
/// ```rust
/// use dataset_prep_tools::camera::{Intrinsics, PinholeModel, Resolution};
/// use dataset_prep_tools::resample::{finalize_intrinsics, CropRegion};
///
/// let rescaled = PinholeModel::new(
///     Intrinsics { fx: 600.0, fy: 600.0, cx: 400.0, cy: 250.0 },
///     [0.0; 4],
///     Resolution::new(750, 500),
/// )
/// .unwrap();
/// let cropped = finalize_intrinsics(&rescaled, &CropRegion { left: 125, right: 625 });
/// assert_eq!(cropped.intrinsics.cx, 275.0);
/// assert_eq!(cropped.resolution, Resolution::new(500, 500));
/// ```
pub fn finalize_intrinsics(model: &PinholeModel, crop: &CropRegion) -> PinholeModel {
    let mut finalized = model.clone();
    finalized.intrinsics.cx -= crop.left as f64;
    finalized.resolution = Resolution::new(crop.width(), crop.width());
    finalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraModel, Intrinsics};
    use approx::assert_relative_eq;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_geometry_reference_case() {
        let geometry = derive_target_geometry(&Resolution::new(1500, 1000), 500).unwrap();
        assert_eq!(geometry.rescaled, Resolution::new(750, 500));
        assert_eq!(
            geometry.crop,
            CropRegion {
                left: 125,
                right: 625
            }
        );
    }

    #[test]
    fn test_geometry_crop_is_centered() {
        let cases = [
            (Resolution::new(752, 480), 256),
            (Resolution::new(1920, 1080), 512),
            (Resolution::new(1280, 720), 511),
            (Resolution::new(641, 640), 100),
            (Resolution::new(1001, 999), 333),
        ];

        for (original, target_height) in cases {
            let geometry = derive_target_geometry(&original, target_height).unwrap();
            let crop = geometry.crop;
            assert_eq!(crop.width(), target_height);
            assert_eq!(geometry.rescaled.height, target_height);
            assert_eq!(
                geometry.rescaled.width,
                (target_height as u64 * original.width as u64 / original.height as u64) as u32
            );
            assert!(crop.right <= geometry.rescaled.width);

            let margin_left = crop.left as i64;
            let margin_right = (geometry.rescaled.width - crop.right) as i64;
            assert!((margin_left - margin_right).abs() <= 1, "{original:?}");
        }
    }

    #[test]
    fn test_geometry_rejects_portrait_and_square() {
        assert!(matches!(
            derive_target_geometry(&Resolution::new(480, 640), 256),
            Err(ResampleError::Precondition(_))
        ));
        assert!(matches!(
            derive_target_geometry(&Resolution::new(640, 640), 256),
            Err(ResampleError::Precondition(_))
        ));
    }

    #[test]
    fn test_geometry_rejects_target_not_smaller() {
        for target_height in [0, 480, 512] {
            assert!(matches!(
                derive_target_geometry(&Resolution::new(752, 480), target_height),
                Err(ResampleError::Precondition(_))
            ));
        }
    }

    #[test]
    fn test_finalize_shifts_principal_point() {
        let model = PinholeModel::new(
            Intrinsics {
                fx: 300.0,
                fy: 301.0,
                cx: 400.0,
                cy: 250.0,
            },
            [0.0; 4],
            Resolution::new(750, 500),
        )
        .unwrap();
        let crop = CropRegion {
            left: 125,
            right: 625,
        };

        let finalized = finalize_intrinsics(&model, &crop);
        assert_eq!(finalized.intrinsics.cx, 275.0);
        assert_eq!(finalized.intrinsics.cy, 250.0);
        assert_eq!(finalized.intrinsics.fx, 300.0);
        assert_eq!(finalized.resolution, Resolution::new(500, 500));
        // The input is left untouched.
        assert_eq!(model.intrinsics.cx, 400.0);
    }

    #[test]
    fn test_undistort_remap_for_calibration() {
        let model = PinholeModel::load_from_yaml("samples/pinhole_radtan.yaml").unwrap();
        let geometry = derive_target_geometry(&model.resolution, 256).unwrap();

        let (new_model, table, roi) = compute_undistort_remap(&model, &geometry.rescaled).unwrap();

        assert_eq!(new_model.resolution, geometry.rescaled);
        assert_eq!(new_model.distortions, [0.0; 4]);
        assert_eq!(new_model.rostopic, model.rostopic);
        assert_eq!(table.width(), geometry.rescaled.width);
        assert_eq!(table.height(), geometry.rescaled.height);
        assert!(roi.x + roi.width <= geometry.rescaled.width);

        // The new principal point lies inside the rescaled image.
        assert!(new_model.intrinsics.cx > 0.0);
        assert!(new_model.intrinsics.cx < geometry.rescaled.width as f64);
        assert!(new_model.intrinsics.cy > 0.0);
        assert!(new_model.intrinsics.cy < geometry.rescaled.height as f64);

        // With alpha = 0 every sample of the table falls inside the source.
        let (w, h) = (
            model.resolution.width as f32,
            model.resolution.height as f32,
        );
        for (u, v) in [(0, 0), (table.width() - 1, table.height() - 1), (200, 100)] {
            let (x, y) = table.source_of(u, v);
            assert!(
                x > -1.0 && x < w && y > -1.0 && y < h,
                "({u}, {v}) -> ({x}, {y})"
            );
        }
    }

    #[test]
    fn test_undistort_remap_maps_principal_points() {
        let model = PinholeModel::load_from_yaml("samples/pinhole_radtan.yaml").unwrap();
        let rescaled = Resolution::new(400, 256);
        let (new_model, table, _) = compute_undistort_remap(&model, &rescaled).unwrap();

        // A ray along the optical axis is not distorted, so the new principal
        // point samples the old one.
        let u = new_model.intrinsics.cx.round() as u32;
        let v = new_model.intrinsics.cy.round() as u32;
        let (x, y) = table.source_of(u, v);
        let scale_x = model.intrinsics.fx / new_model.intrinsics.fx;
        let scale_y = model.intrinsics.fy / new_model.intrinsics.fy;
        assert_relative_eq!(x as f64, model.intrinsics.cx, epsilon = scale_x + 1e-3);
        assert_relative_eq!(y as f64, model.intrinsics.cy, epsilon = scale_y + 1e-3);
    }

    #[test]
    fn test_undistort_remap_reference_values() {
        let model = PinholeModel::load_from_yaml("samples/pinhole_radtan.yaml").unwrap();
        let rescaled = Resolution::new(400, 256);
        let (new_model, _, roi) = compute_undistort_remap(&model, &rescaled).unwrap();

        let k = &new_model.intrinsics;
        assert_relative_eq!(k.fx, 188.946346108914, epsilon = 1e-6);
        assert_relative_eq!(k.fy, 222.079877188416, epsilon = 1e-6);
        assert_relative_eq!(k.cx, 192.472007944713, epsilon = 1e-6);
        assert_relative_eq!(k.cy, 132.908255012195, epsilon = 1e-6);
        assert_eq!(
            roi,
            PixelRoi {
                x: 0,
                y: 0,
                width: 399,
                height: 255
            }
        );
    }

    #[test]
    fn test_undistort_remap_with_strong_barrel_distortion() {
        // The radial factor of this lens turns negative towards the corners.
        let model = PinholeModel::new(
            Intrinsics {
                fx: 500.0,
                fy: 500.0,
                cx: 640.0,
                cy: 360.0,
            },
            [-0.5, 0.0, 0.0, 0.0],
            Resolution::new(1280, 720),
        )
        .unwrap();
        let geometry = derive_target_geometry(&model.resolution, 256).unwrap();
        assert_eq!(geometry.rescaled, Resolution::new(455, 256));

        let (new_model, table, roi) = compute_undistort_remap(&model, &geometry.rescaled).unwrap();

        // Every border sample stays at its distorted position, so the inner
        // rectangle is the normalized image frame [-1.28, 1.28] x [-0.72, 0.72].
        let k = &new_model.intrinsics;
        assert_relative_eq!(k.fx, 454.0 / 2.56, epsilon = 1e-9);
        assert_relative_eq!(k.fy, 255.0 / 1.44, epsilon = 1e-9);
        assert_relative_eq!(k.cx, 227.0, epsilon = 1e-9);
        assert_relative_eq!(k.cy, 127.5, epsilon = 1e-9);
        assert_eq!(
            roi,
            PixelRoi {
                x: 0,
                y: 0,
                width: 454,
                height: 255
            }
        );
        assert_eq!(table.width(), 455);
    }

    #[test]
    fn test_apply_remap_and_crop_shape() {
        let model = PinholeModel::load_from_yaml("samples/pinhole_radtan.yaml").unwrap();
        let geometry = derive_target_geometry(&model.resolution, 64).unwrap();
        let (_, table, _) = compute_undistort_remap(&model, &geometry.rescaled).unwrap();

        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(
            model.resolution.width,
            model.resolution.height,
            Rgb([90, 120, 150]),
        ));
        let cropped = apply_remap_and_crop(&image, &table, &geometry.crop).unwrap();

        assert_eq!(cropped.width(), 64);
        assert_eq!(cropped.height(), 64);
        // Interior pixels sample a uniform image.
        assert_eq!(*cropped.to_rgb8().get_pixel(32, 32), Rgb([90, 120, 150]));
    }

    #[test]
    fn test_apply_remap_rejects_bad_crop() {
        let table = RemapTable {
            map_x: CoordinateGrid::new(10, 5),
            map_y: CoordinateGrid::new(10, 5),
        };
        let image = DynamicImage::ImageRgb8(RgbImage::new(10, 5));
        let crop = CropRegion { left: 6, right: 11 };
        assert!(matches!(
            apply_remap_and_crop(&image, &table, &crop),
            Err(ResampleError::Precondition(_))
        ));
    }
}
