//! Undistort, rescale and center-crop a folder of images.
//!
//! Usage:
//! ```bash
//! cargo run --bin sample_and_crop_images -- \
//!   frames/ cropped/ samples/pinhole_radtan.yaml --new-height 512
//! ```
//!
//! Every `frame_*.png` of the input folder is written under the same name to
//! the output folder, together with `calib.yaml`, the calibration of the
//! cropped, distortion-free images.

use clap::Parser;
use dataset_prep_tools::resample::batch::{DEFAULT_IMAGE_PATTERN, DEFAULT_TARGET_HEIGHT};
use dataset_prep_tools::resample::{run_sample_and_crop, SampleAndCropConfig};
use dataset_prep_tools::util;
use flexi_logger::{colored_detailed_format, Logger};
use log::info;
use std::path::PathBuf;

/// Undistort, resize and center-crop images of a pinhole/radtan camera
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Folder with the input images
    indir: PathBuf,

    /// Folder for the cropped images and calib.yaml
    outdir: PathBuf,

    /// Kalibr calibration of the input images
    calib_file: PathBuf,

    /// Height and width of the square output images
    #[arg(long, default_value_t = DEFAULT_TARGET_HEIGHT)]
    new_height: u32,

    /// Glob selecting the input images
    #[arg(long, default_value = DEFAULT_IMAGE_PATTERN)]
    pattern: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _logger = Logger::try_with_env_or_str("info")?
        .format(colored_detailed_format)
        .set_palette("196;208;76;39;178".to_string())
        .start()?;

    let cli = Cli::parse();
    info!("Input folder: {:?}", cli.indir);
    info!("Output folder: {:?}", cli.outdir);
    info!("Calibration: {:?}", cli.calib_file);

    let config = SampleAndCropConfig {
        target_height: cli.new_height,
        pattern: cli.pattern,
        ..SampleAndCropConfig::new(cli.indir, cli.outdir, cli.calib_file)
    };

    let summary = run_sample_and_crop(&config)?;

    util::display_model_parameters("Cropped camera", &summary.final_model);
    println!(
        "{} images processed, calibration written to {}",
        summary.processed,
        summary.calibration_path.display()
    );

    Ok(())
}
