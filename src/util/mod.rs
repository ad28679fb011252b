use crate::camera::{CameraModel, PinholeModel};
use image::DynamicImage;
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum UtilError {
    #[error("No files found in {0}")]
    NoFilesFound(String),
    #[error("Cannot read {path}: {reason}")]
    ImageRead { path: String, reason: String },
    #[error("Cannot write {path}: {reason}")]
    ImageWrite { path: String, reason: String },
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
    #[error("IO Error: {0}")]
    IOError(String),
}

impl From<std::io::Error> for UtilError {
    fn from(err: std::io::Error) -> Self {
        UtilError::IOError(err.to_string())
    }
}

/// Ensure the output directory exists
pub fn ensure_output_dir(output_dir: &Path) -> Result<(), UtilError> {
    if !output_dir.exists() {
        fs::create_dir_all(output_dir).map_err(|e| {
            UtilError::IOError(format!(
                "Failed to create output directory {}: {e}",
                output_dir.display()
            ))
        })?;
    }
    Ok(())
}

/// Find the files in `dir` matching a glob `pattern`, sorted by path.
///
/// The search is not recursive. The directory part is escaped, so only
/// `pattern` is interpreted as a glob.
///
/// # Errors
///
/// * [`UtilError::NoFilesFound`] if the directory does not exist or nothing matches.
/// * [`UtilError::InvalidParams`] if `pattern` is not a valid glob.
pub fn find_files(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>, UtilError> {
    if !dir.is_dir() {
        return Err(UtilError::NoFilesFound(format!(
            "{} (not a directory)",
            dir.display()
        )));
    }

    let escaped_dir = glob::Pattern::escape(&dir.to_string_lossy());
    let full_pattern = format!("{escaped_dir}/{pattern}");

    let mut files: Vec<PathBuf> = glob::glob(&full_pattern)
        .map_err(|e| UtilError::InvalidParams(format!("Bad file pattern '{pattern}': {e}")))?
        .filter_map(Result::ok)
        .filter(|path| path.is_file())
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(UtilError::NoFilesFound(format!(
            "{} (pattern '{pattern}')",
            dir.display()
        )));
    }

    debug!("Found {} files in {}", files.len(), dir.display());
    Ok(files)
}

/// Load an image keeping its native channel layout and bit depth.
pub fn load_image(image_path: &Path) -> Result<DynamicImage, UtilError> {
    image::open(image_path).map_err(|e| UtilError::ImageRead {
        path: image_path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Save an image, choosing the encoder from the file extension.
pub fn save_image(image: &DynamicImage, image_path: &Path) -> Result<(), UtilError> {
    image.save(image_path).map_err(|e| UtilError::ImageWrite {
        path: image_path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Display camera model parameters
pub fn display_model_parameters(title: &str, model: &PinholeModel) {
    let intrinsics = model.get_intrinsics();
    let resolution = model.get_resolution();
    println!("📷 {title}:");
    println!(
        "Pinhole parameters: fx={:.3}, fy={:.3}, cx={:.3}, cy={:.3}",
        intrinsics.fx, intrinsics.fy, intrinsics.cx, intrinsics.cy
    );
    if model.distortion().is_zero() {
        println!("RadTan distortion: none");
    } else {
        let d = model.get_distortion();
        println!(
            "RadTan distortion: k1={:.6}, k2={:.6}, p1={:.6}, p2={:.6}",
            d[0], d[1], d[2], d[3]
        );
    }
    println!("Resolution: {}x{}", resolution.width, resolution.height);
}
