//! Packs a folder of frames into a bag of `sensor_msgs/Image` messages.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;
use std::time::Duration;

use log::{info, warn};

use crate::util;

use super::{BagError, BagWriter, ImageMessage, RosTime, IMAGE_MESSAGE};

pub const DEFAULT_TOPIC: &str = "/image";
pub const DEFAULT_FRAME_PATTERN: &str = "*.jpg";

#[derive(Debug, Clone)]
pub struct FramePackConfig {
    pub image_folder: PathBuf,
    pub output_bag: PathBuf,
    /// Spacing between consecutive frame stamps.
    pub time_delta: Duration,
    /// Stamp before the first frame; the current time when `None`.
    pub start_time: Option<RosTime>,
    pub topic: String,
    pub pattern: String,
}

impl FramePackConfig {
    pub fn new(
        image_folder: impl Into<PathBuf>,
        output_bag: impl Into<PathBuf>,
        time_delta: Duration,
    ) -> Self {
        FramePackConfig {
            image_folder: image_folder.into(),
            output_bag: output_bag.into(),
            time_delta,
            start_time: None,
            topic: DEFAULT_TOPIC.to_string(),
            pattern: DEFAULT_FRAME_PATTERN.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackSummary {
    pub written: usize,
    pub first_stamp: Option<RosTime>,
    pub last_stamp: Option<RosTime>,
    pub output_bag: PathBuf,
}

/// Writes every matching image of `config.image_folder`, in lexicographic
/// order, as one message on `config.topic`.
///
/// Frame `i` is stamped `start_time + (i + 1) * time_delta`; the stamp is used
/// for both the message header and the record time.
///
/// # Errors
///
/// * [`BagError::Precondition`] if no image matches.
/// * [`BagError::ImageError`] if an image cannot be decoded.
/// * [`BagError::TimeOverflow`] if a stamp leaves the ROS time range.
///
/// A bag left unfinished by an error is removed.
pub fn pack_frames(config: &FramePackConfig) -> Result<PackSummary, BagError> {
    let files = util::find_files(&config.image_folder, &config.pattern)?;
    info!(
        "Packing {} frames from {} into {}",
        files.len(),
        config.image_folder.display(),
        config.output_bag.display()
    );

    if let Some(parent) = config.output_bag.parent() {
        if !parent.as_os_str().is_empty() {
            util::ensure_output_dir(parent)?;
        }
    }

    let start_time = match config.start_time {
        Some(time) => time,
        None => RosTime::now()?,
    };

    let file = File::create(&config.output_bag)?;
    let written = write_frames(BufWriter::new(file), config, &files, start_time);
    let (first_stamp, last_stamp) = match written {
        Ok(stamps) => stamps,
        Err(e) => {
            if let Err(remove_err) = fs::remove_file(&config.output_bag) {
                warn!(
                    "Failed to remove unfinished {}: {remove_err}",
                    config.output_bag.display()
                );
            }
            return Err(e);
        }
    };
    info!("Wrote {}", config.output_bag.display());

    Ok(PackSummary {
        written: files.len(),
        first_stamp,
        last_stamp,
        output_bag: config.output_bag.clone(),
    })
}

/// Returns the first and last stamps written.
fn write_frames(
    writer: BufWriter<File>,
    config: &FramePackConfig,
    files: &[PathBuf],
    start_time: RosTime,
) -> Result<(Option<RosTime>, Option<RosTime>), BagError> {
    let mut bag = BagWriter::new(writer)?;
    let connection = bag.add_connection(&config.topic, IMAGE_MESSAGE)?;

    let mut stamp = start_time;
    let mut first_stamp = None;
    for (i, path) in files.iter().enumerate() {
        println!("Writing {}... ", path.display());

        let image = util::load_image(path)?.to_rgb8();
        stamp = stamp.checked_add(config.time_delta)?;
        first_stamp.get_or_insert(stamp);

        let seq = u32::try_from(i)
            .map_err(|_| BagError::Precondition(format!("Too many frames: {}", files.len())))?;
        let message = ImageMessage::from_rgb(&image, seq, stamp);
        bag.write_message(connection, stamp, &message.serialize()?)?;
    }

    bag.finish()?;
    Ok((first_stamp, first_stamp.map(|_| stamp)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bag::BagReader;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::fs;

    fn write_jpgs(dir: &std::path::Path, count: u32) {
        fs::create_dir_all(dir).unwrap();
        for i in 0..count {
            let image = RgbImage::from_pixel(16, 8 + i, Rgb([200, 100, 50]));
            DynamicImage::ImageRgb8(image)
                .save(dir.join(format!("frame_{:06}.jpg", i + 1)))
                .unwrap();
        }
    }

    #[test]
    fn test_pack_frames_stamps_and_sizes() {
        let root = tempfile::tempdir().unwrap();
        let folder = root.path().join("frames");
        write_jpgs(&folder, 3);
        fs::write(folder.join("notes.txt"), "not an image").unwrap();

        let mut config = FramePackConfig::new(
            &folder,
            root.path().join("bags").join("out.bag"),
            Duration::new(0, 50_000_000),
        );
        config.start_time = Some(RosTime::new(1000, 0).unwrap());

        let summary = pack_frames(&config).unwrap();
        assert_eq!(summary.written, 3);
        assert_eq!(
            summary.first_stamp,
            Some(RosTime::new(1000, 50_000_000).unwrap())
        );
        assert_eq!(
            summary.last_stamp,
            Some(RosTime::new(1000, 150_000_000).unwrap())
        );

        let mut reader = BagReader::new(File::open(&summary.output_bag).unwrap()).unwrap();
        let bag = reader.summary();
        assert_eq!(bag.connections.len(), 1);
        assert_eq!(bag.connections[0].topic, "/image");
        assert_eq!(bag.message_count, 3);
        assert_eq!(bag.start_time, summary.first_stamp);
        assert_eq!(bag.end_time, summary.last_stamp);

        for (i, message) in reader.messages().unwrap().iter().enumerate() {
            let image = ImageMessage::deserialize(&message.data).unwrap();
            assert_eq!(image.seq, i as u32);
            assert_eq!(image.stamp, message.time);
            assert_eq!(image.encoding, "bgr8");
            assert_eq!((image.width, image.height), (16, 8 + i as u32));
            assert_eq!(image.step, 48);
        }
    }

    #[test]
    fn test_pack_frames_empty_folder() {
        let root = tempfile::tempdir().unwrap();
        let folder = root.path().join("frames");
        fs::create_dir_all(&folder).unwrap();
        let output = root.path().join("out").join("out.bag");

        let config = FramePackConfig::new(&folder, &output, Duration::from_secs(1));
        let err = pack_frames(&config).unwrap_err();
        assert!(matches!(err, BagError::Precondition(_)));
        assert!(!output.exists());
    }

    #[test]
    fn test_pack_frames_removes_bag_on_bad_frame() {
        let root = tempfile::tempdir().unwrap();
        let folder = root.path().join("frames");
        write_jpgs(&folder, 3);
        fs::write(folder.join("frame_000002.jpg"), b"not a jpeg").unwrap();
        let output = root.path().join("out.bag");

        let mut config = FramePackConfig::new(&folder, &output, Duration::from_millis(10));
        config.start_time = Some(RosTime::new(1, 0).unwrap());

        assert!(pack_frames(&config).is_err());
        assert!(!output.exists());
    }

    #[test]
    fn test_pack_frames_custom_topic_and_zero_delta() {
        let root = tempfile::tempdir().unwrap();
        let folder = root.path().join("frames");
        write_jpgs(&folder, 2);

        let mut config = FramePackConfig::new(&folder, root.path().join("cam.bag"), Duration::ZERO);
        config.topic = "/cam0/image_raw".to_string();
        config.start_time = Some(RosTime::new(7, 0).unwrap());

        let summary = pack_frames(&config).unwrap();
        assert_eq!(summary.first_stamp, summary.last_stamp);

        let reader = BagReader::new(File::open(&summary.output_bag).unwrap()).unwrap();
        assert_eq!(reader.connections()[0].topic, "/cam0/image_raw");
    }
}
