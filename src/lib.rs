//! Dataset Preparation Tools Library
//!
//! Offline tools for preparing camera datasets:
//! - Kalibr pinhole/radtan calibration loading and saving
//! - Undistortion, rescaling and center-cropping of image folders, with the
//!   calibration of the output images
//! - Frame extraction from video files through `ffmpeg`
//! - Packing frame folders into ROS bag 2.0 files
//!
//! Each tool has a binary under `src/bin`.

pub mod bag;
pub mod camera;
pub mod resample;
pub mod util;
pub mod video;

// Re-export commonly used types
pub use bag::{pack_frames, BagError, BagReader, BagWriter, FramePackConfig, RosTime};
pub use camera::{
    CameraModel, CameraModelError, Intrinsics, PinholeModel, RadTanDistortion, Resolution,
};
pub use resample::{run_sample_and_crop, ResampleError, SampleAndCropConfig};
pub use video::{extract_frames, FfmpegVideo, FrameSelection, FrameSource, VideoError};
