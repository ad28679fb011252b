//! Directory-level driver for the undistort, rescale and crop pipeline.

use std::path::{Path, PathBuf};

use log::info;

use crate::camera::{CameraModel, PinholeModel};
use crate::util;

use super::{
    apply_remap_and_crop, compute_undistort_remap, derive_target_geometry, finalize_intrinsics,
    ResampleError,
};

pub const DEFAULT_TARGET_HEIGHT: u32 = 512;
pub const DEFAULT_IMAGE_PATTERN: &str = "frame_*.png";
pub const CALIBRATION_FILENAME: &str = "calib.yaml";

#[derive(Debug, Clone)]
pub struct SampleAndCropConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Kalibr calibration of the input images.
    pub calib_file: PathBuf,
    /// Height (and width) of the square output images.
    pub target_height: u32,
    /// Glob selecting the images inside `input_dir`.
    pub pattern: String,
}

impl SampleAndCropConfig {
    pub fn new(
        input_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        calib_file: impl Into<PathBuf>,
    ) -> Self {
        SampleAndCropConfig {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            calib_file: calib_file.into(),
            target_height: DEFAULT_TARGET_HEIGHT,
            pattern: DEFAULT_IMAGE_PATTERN.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub processed: usize,
    pub calibration_path: PathBuf,
    pub final_model: PinholeModel,
}

fn path_str(path: &Path) -> Result<&str, ResampleError> {
    path.to_str().ok_or_else(|| {
        ResampleError::Precondition(format!("Path is not valid UTF-8: {}", path.display()))
    })
}

/// Undistorts, rescales and crops every matching image of `config.input_dir`
/// into `config.output_dir`, then writes the calibration of the output images
/// as `calib.yaml` next to them.
///
/// All images share one calibration, so the remap table is built once. Files
/// are processed in lexicographic order and the first failure aborts the run.
///
/// # Errors
///
/// * [`ResampleError::CameraModel`] if the calibration cannot be loaded or is
///   not a `pinhole`/`radtan` model.
/// * [`ResampleError::Precondition`] if the geometry is unsupported, no input
///   image matches (reported before anything is written), an image cannot be
///   read, or an image size differs from the calibration resolution.
pub fn run_sample_and_crop(config: &SampleAndCropConfig) -> Result<BatchSummary, ResampleError> {
    let model = PinholeModel::load_from_yaml(path_str(&config.calib_file)?)?;
    info!("Input camera model: \n{model}");

    let geometry = derive_target_geometry(&model.resolution, config.target_height)?;
    info!(
        "new_shape = [{}, {}], crop_col_range = [{}, {})",
        geometry.rescaled.height, geometry.rescaled.width, geometry.crop.left, geometry.crop.right
    );

    let (rescaled_model, table, roi) = compute_undistort_remap(&model, &geometry.rescaled)?;
    info!("roi = {roi:?}");
    info!("new_cam_model = \n{rescaled_model}");

    let in_images = util::find_files(&config.input_dir, &config.pattern)?;
    info!(
        "Processing {} images from {}",
        in_images.len(),
        config.input_dir.display()
    );

    util::ensure_output_dir(&config.output_dir)?;

    for path in &in_images {
        println!("{}", path.display());

        let image = util::load_image(path)?;
        if image.width() != model.resolution.width || image.height() != model.resolution.height {
            return Err(ResampleError::Precondition(format!(
                "{} is {}x{}, calibration expects {}x{}",
                path.display(),
                image.width(),
                image.height(),
                model.resolution.width,
                model.resolution.height
            )));
        }

        let cropped = apply_remap_and_crop(&image, &table, &geometry.crop)?;

        let file_name = path.file_name().ok_or_else(|| {
            ResampleError::Precondition(format!("No file name in {}", path.display()))
        })?;
        util::save_image(&cropped, &config.output_dir.join(file_name))?;
    }

    let final_model = finalize_intrinsics(&rescaled_model, &geometry.crop);
    let calibration_path = config.output_dir.join(CALIBRATION_FILENAME);
    final_model.save_to_yaml(path_str(&calibration_path)?)?;
    info!("The camera intrinsics after cropping is \n{final_model}");

    Ok(BatchSummary {
        processed: in_images.len(),
        calibration_path,
        final_model,
    })
}
