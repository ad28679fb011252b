//! Frame extraction from video files.
//!
//! Frames come from a [`FrameSource`]; [`FfmpegVideo`] is the implementation
//! backed by the `ffmpeg`/`ffprobe` command line tools. Which frames are kept
//! is described by a [`FrameSelection`].

use std::path::{Path, PathBuf};

use image::RgbImage;
use log::{debug, info};

use crate::util::{self, UtilError};

pub mod ffmpeg;

pub use ffmpeg::FfmpegVideo;

pub const DEFAULT_SKIP_BEGINNING: u64 = 15;
pub const DEFAULT_SKIP_ENDING: u64 = 15;

#[derive(thiserror::Error, Debug)]
pub enum VideoError {
    #[error("Precondition failed: {0}")]
    Precondition(String),
    #[error("ffmpeg error: {0}")]
    Ffmpeg(String),
    #[error("Failed to parse ffprobe output: {0}")]
    Probe(String),
    #[error("Image error: {0}")]
    ImageError(String),
    #[error("IO Error: {0}")]
    IOError(String),
}

impl From<std::io::Error> for VideoError {
    fn from(err: std::io::Error) -> Self {
        VideoError::IOError(err.to_string())
    }
}

impl From<serde_json::Error> for VideoError {
    fn from(err: serde_json::Error) -> Self {
        VideoError::Probe(err.to_string())
    }
}

impl From<UtilError> for VideoError {
    fn from(err: UtilError) -> Self {
        match err {
            UtilError::ImageWrite { .. } | UtilError::ImageRead { .. } => {
                VideoError::ImageError(err.to_string())
            }
            UtilError::IOError(msg) => VideoError::IOError(msg),
            other => VideoError::Precondition(other.to_string()),
        }
    }
}

/// A decoded stream of video frames.
pub trait FrameSource {
    /// Total number of frames, when the container reports it.
    fn frame_count(&self) -> Option<u64>;

    /// Decodes the next frame, `None` once the stream is exhausted.
    fn read_frame(&mut self) -> Result<Option<RgbImage>, VideoError>;
}

/// Which frames of a video are written out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameSelection {
    /// Keep one frame, then drop `skip_frames`, repeatedly, starting with the
    /// first frame.
    FixedSkip { skip_frames: u64 },
    /// Keep `total_frames` frames evenly spread between `skip_beginning` and
    /// `frame_count - skip_ending`.
    TotalFrames {
        total_frames: usize,
        skip_beginning: u64,
        skip_ending: u64,
    },
}

/// Frame indices `floor(linspace(skip_beginning, frame_count - skip_ending, total_frames))`,
/// deduplicated and ascending.
///
/// # Errors
///
/// [`VideoError::Precondition`] if `total_frames` is zero, the video is too
/// short (`frame_count - skip_beginning - skip_ending <= total_frames`) or
/// fewer than `total_frames` distinct indices result.
///
/// # Examples
///
/// ```rust
/// use dataset_prep_tools::video::evenly_spaced_indices;
///
/// let indices = evenly_spaced_indices(100, 5, 15, 15).unwrap();
/// assert_eq!(indices, vec![15, 32, 50, 67, 85]);
/// ```
pub fn evenly_spaced_indices(
    frame_count: u64,
    total_frames: usize,
    skip_beginning: u64,
    skip_ending: u64,
) -> Result<Vec<u64>, VideoError> {
    if total_frames == 0 {
        return Err(VideoError::Precondition(
            "total_frames must be positive".to_string(),
        ));
    }

    let usable = frame_count as i128 - skip_beginning as i128 - skip_ending as i128;
    if usable <= total_frames as i128 {
        return Err(VideoError::Precondition(format!(
            "Not enough frames to extract: frame_count = {frame_count}, \
             skip_beginning = {skip_beginning}, skip_ending = {skip_ending}, \
             total_frames = {total_frames}"
        )));
    }

    let start = skip_beginning as f64;
    let stop = (frame_count - skip_ending) as f64;

    let mut indices: Vec<u64> = if total_frames == 1 {
        vec![skip_beginning]
    } else {
        let step = (stop - start) / (total_frames - 1) as f64;
        (0..total_frames)
            .map(|i| {
                if i == total_frames - 1 {
                    stop
                } else {
                    start + i as f64 * step
                }
            })
            .map(|value| value.floor() as u64)
            .collect()
    };
    indices.dedup();

    if indices.len() < total_frames {
        return Err(VideoError::Precondition(format!(
            "Not enough unique indices: {} of {total_frames}, frame_count = {frame_count}",
            indices.len()
        )));
    }

    Ok(indices)
}

/// Writes the frames chosen by `selection` into `output_dir` and returns the
/// written paths in order.
///
/// Fixed-skip frames are numbered from 1 and saved as `frame_NNNNNN.jpg`;
/// evenly spaced frames are numbered from 0 and saved as `frame_NNNNNN.png`.
/// A stream that ends early stops the extraction without error.
pub fn extract_frames<S: FrameSource + ?Sized>(
    source: &mut S,
    output_dir: &Path,
    selection: &FrameSelection,
) -> Result<Vec<PathBuf>, VideoError> {
    match selection {
        FrameSelection::FixedSkip { skip_frames } => {
            util::ensure_output_dir(output_dir)?;
            extract_by_skipping_frames(source, output_dir, *skip_frames)
        }
        FrameSelection::TotalFrames {
            total_frames,
            skip_beginning,
            skip_ending,
        } => {
            let frame_count = source.frame_count().ok_or_else(|| {
                VideoError::Precondition("The video does not report its frame count".to_string())
            })?;
            let indices =
                evenly_spaced_indices(frame_count, *total_frames, *skip_beginning, *skip_ending)?;
            util::ensure_output_dir(output_dir)?;
            extract_indices(source, output_dir, &indices)
        }
    }
}

fn save_frame(frame: &RgbImage, path: &Path) -> Result<(), VideoError> {
    frame
        .save(path)
        .map_err(|e| VideoError::ImageError(format!("Cannot write {}: {e}", path.display())))?;
    println!("{} written. ", path.display());
    Ok(())
}

fn extract_by_skipping_frames<S: FrameSource + ?Sized>(
    source: &mut S,
    output_dir: &Path,
    skip_frames: u64,
) -> Result<Vec<PathBuf>, VideoError> {
    let period = skip_frames + 1;
    let mut written = Vec::new();
    let mut frame_number = 0_u64;

    while let Some(frame) = source.read_frame()? {
        frame_number += 1;
        if (frame_number - 1) % period != 0 {
            continue;
        }

        let path = output_dir.join(format!("frame_{frame_number:06}.jpg"));
        save_frame(&frame, &path)?;
        written.push(path);
    }

    info!("End of stream after {frame_number} frames");
    Ok(written)
}

fn extract_indices<S: FrameSource + ?Sized>(
    source: &mut S,
    output_dir: &Path,
    indices: &[u64],
) -> Result<Vec<PathBuf>, VideoError> {
    let mut written = Vec::with_capacity(indices.len());
    let mut pending = indices.iter().peekable();
    let mut frame_index = 0_u64;

    while let Some(&&next_index) = pending.peek() {
        let Some(frame) = source.read_frame()? else {
            info!("End of stream at frame {frame_index}, next wanted {next_index}");
            break;
        };

        if frame_index == next_index {
            let path = output_dir.join(format!("frame_{frame_index:06}.png"));
            save_frame(&frame, &path)?;
            written.push(path);
            pending.next();
        }
        frame_index += 1;
    }

    if pending.peek().is_none() {
        info!("{} frames reached", indices.len());
    }
    debug!("Decoded {frame_index} frames");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::fs;

    /// In-memory frames, each filled with its own index.
    struct SyntheticVideo {
        frames: u64,
        next: u64,
        report_count: bool,
    }

    impl SyntheticVideo {
        fn new(frames: u64) -> Self {
            SyntheticVideo {
                frames,
                next: 0,
                report_count: true,
            }
        }
    }

    impl FrameSource for SyntheticVideo {
        fn frame_count(&self) -> Option<u64> {
            self.report_count.then_some(self.frames)
        }

        fn read_frame(&mut self) -> Result<Option<RgbImage>, VideoError> {
            if self.next >= self.frames {
                return Ok(None);
            }
            let value = self.next as u8;
            self.next += 1;
            Ok(Some(RgbImage::from_pixel(8, 6, Rgb([value, value, value]))))
        }
    }

    fn file_names(paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_evenly_spaced_reference_case() {
        assert_eq!(
            evenly_spaced_indices(100, 5, 15, 15).unwrap(),
            vec![15, 32, 50, 67, 85]
        );
    }

    #[test]
    fn test_evenly_spaced_single_frame() {
        assert_eq!(evenly_spaced_indices(40, 1, 15, 15).unwrap(), vec![15]);
    }

    #[test]
    fn test_evenly_spaced_rejects_short_video() {
        assert!(matches!(
            evenly_spaced_indices(35, 5, 15, 15),
            Err(VideoError::Precondition(_))
        ));
        assert!(matches!(
            evenly_spaced_indices(10, 1, 15, 15),
            Err(VideoError::Precondition(_))
        ));
        assert!(matches!(
            evenly_spaced_indices(100, 0, 15, 15),
            Err(VideoError::Precondition(_))
        ));
    }

    #[test]
    fn test_evenly_spaced_are_unique_and_in_range() {
        for (count, total) in [(1000, 100), (131, 100), (250, 7)] {
            let indices = evenly_spaced_indices(count, total, 15, 15).unwrap();
            assert_eq!(indices.len(), total);
            assert!(indices.windows(2).all(|w| w[0] < w[1]));
            assert_eq!(indices[0], 15);
            assert_eq!(*indices.last().unwrap(), count - 15);
        }
    }

    #[test]
    fn test_fixed_skip_selection() {
        let dir = tempfile::tempdir().unwrap();
        let mut video = SyntheticVideo::new(7);

        let written = extract_frames(
            &mut video,
            dir.path(),
            &FrameSelection::FixedSkip { skip_frames: 2 },
        )
        .unwrap();

        assert_eq!(
            file_names(&written),
            vec!["frame_000001.jpg", "frame_000004.jpg", "frame_000007.jpg"]
        );
        for path in &written {
            assert!(path.is_file());
        }
    }

    #[test]
    fn test_fixed_skip_zero_keeps_every_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut video = SyntheticVideo::new(3);

        let written = extract_frames(
            &mut video,
            &dir.path().join("nested"),
            &FrameSelection::FixedSkip { skip_frames: 0 },
        )
        .unwrap();

        assert_eq!(written.len(), 3);
    }

    #[test]
    fn test_total_frames_selection_writes_pngs() {
        let dir = tempfile::tempdir().unwrap();
        let mut video = SyntheticVideo::new(100);

        let written = extract_frames(
            &mut video,
            dir.path(),
            &FrameSelection::TotalFrames {
                total_frames: 5,
                skip_beginning: 15,
                skip_ending: 15,
            },
        )
        .unwrap();

        assert_eq!(
            file_names(&written),
            vec![
                "frame_000015.png",
                "frame_000032.png",
                "frame_000050.png",
                "frame_000067.png",
                "frame_000085.png"
            ]
        );
        // Each frame holds its index, so the right frames were saved.
        let frame = image::open(&written[2]).unwrap().to_rgb8();
        assert_eq!(frame.get_pixel(0, 0)[0], 50);
        // Decoding stops after the last wanted frame.
        assert_eq!(video.next, 86);
    }

    #[test]
    fn test_total_frames_needs_frame_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut video = SyntheticVideo::new(100);
        video.report_count = false;

        let err = extract_frames(
            &mut video,
            &dir.path().join("out"),
            &FrameSelection::TotalFrames {
                total_frames: 5,
                skip_beginning: 15,
                skip_ending: 15,
            },
        )
        .unwrap_err();

        assert!(matches!(err, VideoError::Precondition(_)));
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn test_total_frames_short_stream_stops_early() {
        let dir = tempfile::tempdir().unwrap();
        // Claims 100 frames but only delivers 40.
        let video = SyntheticVideo::new(40);
        struct Lying(SyntheticVideo);
        impl FrameSource for Lying {
            fn frame_count(&self) -> Option<u64> {
                Some(100)
            }
            fn read_frame(&mut self) -> Result<Option<RgbImage>, VideoError> {
                self.0.read_frame()
            }
        }
        let mut lying = Lying(video);

        let written = extract_frames(
            &mut lying,
            dir.path(),
            &FrameSelection::TotalFrames {
                total_frames: 5,
                skip_beginning: 15,
                skip_ending: 15,
            },
        )
        .unwrap();

        assert_eq!(written.len(), 2);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }
}
