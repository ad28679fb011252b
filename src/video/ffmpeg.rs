//! Video decoding through the `ffprobe` and `ffmpeg` executables.
//!
//! `ffprobe` reports the size and frame count of the first video stream as
//! JSON. `ffmpeg` then decodes that stream to packed `rgb24` on its stdout,
//! one `width * height * 3` byte block per frame, without frame-rate
//! conversion so every decoded frame is delivered exactly once.
//!
//! `ffmpeg` applies the display rotation of phone footage while decoding, so
//! the reported size is swapped for quarter turns.

use std::io::{ErrorKind, Read};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};

use image::RgbImage;
use log::{debug, warn};
use serde::Deserialize;

use super::{FrameSource, VideoError};

#[derive(Debug, Deserialize)]
struct ProbeReport {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: u32,
    height: u32,
    #[serde(default)]
    nb_frames: Option<String>,
    #[serde(default)]
    nb_read_packets: Option<String>,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
    #[serde(default)]
    tags: Option<ProbeTags>,
}

#[derive(Debug, Deserialize)]
struct ProbeSideData {
    #[serde(default)]
    rotation: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ProbeTags {
    #[serde(default)]
    rotate: Option<String>,
}

impl ProbeStream {
    /// Clockwise display rotation in degrees, within `[0, 360)`.
    ///
    /// The display matrix side data wins over the legacy `rotate` tag. Its
    /// angle is counterclockwise, hence the sign flip.
    fn rotation(&self) -> i64 {
        let degrees = self
            .side_data_list
            .iter()
            .find_map(|side_data| side_data.rotation.map(|angle| -angle))
            .or_else(|| {
                self.tags
                    .as_ref()
                    .and_then(|tags| tags.rotate.as_deref())
                    .and_then(|rotate| rotate.trim().parse::<f64>().ok())
            })
            .unwrap_or(0.0);
        (degrees.round() as i64).rem_euclid(360)
    }
}

/// Size and length of a video stream.
///
/// `width` and `height` are the size of the decoded frames, after the display
/// rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub frame_count: Option<u64>,
    pub rotation: u32,
}

/// Parses `ffprobe -of json -show_entries stream=...` output.
///
/// The counted packets are preferred over the container's `nb_frames`, which
/// some formats omit or report as `N/A`.
pub fn parse_probe_report(json: &[u8]) -> Result<StreamInfo, VideoError> {
    let report: ProbeReport = serde_json::from_slice(json)?;
    let stream = report
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| VideoError::Probe("No video stream found".to_string()))?;

    if stream.width == 0 || stream.height == 0 {
        return Err(VideoError::Probe(format!(
            "Invalid frame size {}x{}",
            stream.width, stream.height
        )));
    }

    let parse_count = |value: &Option<String>| value.as_deref().and_then(|v| v.parse::<u64>().ok());
    let frame_count =
        parse_count(&stream.nb_read_packets).or_else(|| parse_count(&stream.nb_frames));

    let rotation = stream.rotation();
    let (width, height) = match rotation {
        90 | 270 => (stream.height, stream.width),
        _ => (stream.width, stream.height),
    };

    Ok(StreamInfo {
        width,
        height,
        frame_count,
        rotation: rotation as u32,
    })
}

/// Runs `ffprobe` on the first video stream of `path`.
pub fn probe(path: &Path) -> Result<StreamInfo, VideoError> {
    let output = Command::new("ffprobe")
        .args(["-v", "error", "-select_streams", "v:0", "-count_packets"])
        .args([
            "-show_entries",
            "stream=width,height,nb_frames,nb_read_packets:stream_tags=rotate\
             :stream_side_data=rotation",
        ])
        .args(["-of", "json"])
        .arg(path)
        .output()
        .map_err(|e| VideoError::Ffmpeg(format!("Failed to run ffprobe: {e}")))?;

    if !output.status.success() {
        return Err(VideoError::Ffmpeg(format!(
            "ffprobe failed on {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    parse_probe_report(&output.stdout)
}

/// A video file decoded frame by frame by an `ffmpeg` child process.
pub struct FfmpegVideo {
    child: Child,
    stdout: ChildStdout,
    info: StreamInfo,
    frames_read: u64,
}

impl FfmpegVideo {
    /// Probes `path` and starts decoding it.
    ///
    /// # Errors
    ///
    /// * [`VideoError::Precondition`] if `path` is not a file.
    /// * [`VideoError::Ffmpeg`] if `ffprobe`/`ffmpeg` cannot be run or fail.
    /// * [`VideoError::Probe`] if the stream information cannot be parsed.
    pub fn open(path: &Path) -> Result<Self, VideoError> {
        if !path.is_file() {
            return Err(VideoError::Precondition(format!(
                "Video file not found: {}",
                path.display()
            )));
        }

        let info = probe(path)?;
        debug!("Probed {}: {:?}", path.display(), info);

        let mut child = Command::new("ffmpeg")
            .args(["-v", "error", "-nostdin", "-i"])
            .arg(path)
            .args(["-map", "0:v:0", "-vsync", "0"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| VideoError::Ffmpeg(format!("Failed to spawn ffmpeg: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| VideoError::Ffmpeg("Failed to open ffmpeg stdout".to_string()))?;

        Ok(FfmpegVideo {
            child,
            stdout,
            info,
            frames_read: 0,
        })
    }

    /// Size, length and rotation of the decoded stream.
    pub fn info(&self) -> StreamInfo {
        self.info
    }

    fn frame_len(&self) -> usize {
        self.info.width as usize * self.info.height as usize * 3
    }
}

impl FrameSource for FfmpegVideo {
    fn frame_count(&self) -> Option<u64> {
        self.info.frame_count
    }

    fn read_frame(&mut self) -> Result<Option<RgbImage>, VideoError> {
        let mut buffer = vec![0_u8; self.frame_len()];
        match self.stdout.read_exact(&mut buffer) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                let status = self.child.wait()?;
                if !status.success() {
                    return Err(VideoError::Ffmpeg(format!(
                        "ffmpeg exited with {status} after {} frames",
                        self.frames_read
                    )));
                }
                debug!("Decoder finished after {} frames", self.frames_read);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }

        self.frames_read += 1;
        RgbImage::from_raw(self.info.width, self.info.height, buffer)
            .map(Some)
            .ok_or_else(|| VideoError::Ffmpeg("Decoded frame has the wrong size".to_string()))
    }
}

impl Drop for FfmpegVideo {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            if let Err(e) = self.child.kill() {
                warn!("Failed to stop ffmpeg: {e}");
            }
            let _ = self.child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_probe_prefers_counted_packets() {
        let json = br#"{
            "programs": [],
            "streams": [
                { "width": 1920, "height": 1080, "nb_frames": "1200", "nb_read_packets": "1198" }
            ]
        }"#;
        let info = parse_probe_report(json).unwrap();
        assert_eq!(
            info,
            StreamInfo {
                width: 1920,
                height: 1080,
                frame_count: Some(1198),
                rotation: 0
            }
        );
    }

    #[test]
    fn test_parse_probe_swaps_size_for_quarter_turns() {
        let json = br#"{
            "streams": [
                {
                    "width": 1920,
                    "height": 1080,
                    "nb_read_packets": "90",
                    "side_data_list": [ { "side_data_type": "Display Matrix", "rotation": -90 } ]
                }
            ]
        }"#;
        let info = parse_probe_report(json).unwrap();
        assert_eq!((info.width, info.height), (1080, 1920));
        assert_eq!(info.rotation, 90);

        let json = br#"{
            "streams": [ { "width": 1920, "height": 1080, "tags": { "rotate": "90" } } ]
        }"#;
        let info = parse_probe_report(json).unwrap();
        assert_eq!((info.width, info.height), (1080, 1920));
        assert_eq!(info.rotation, 90);

        let json = br#"{
            "streams": [ { "width": 1920, "height": 1080, "tags": { "rotate": "180" } } ]
        }"#;
        let info = parse_probe_report(json).unwrap();
        assert_eq!((info.width, info.height), (1920, 1080));
        assert_eq!(info.rotation, 180);
    }

    #[test]
    fn test_parse_probe_falls_back_to_nb_frames() {
        let json = br#"{ "streams": [ { "width": 640, "height": 480, "nb_frames": "300" } ] }"#;
        assert_eq!(parse_probe_report(json).unwrap().frame_count, Some(300));

        let json = br#"{ "streams": [ { "width": 640, "height": 480, "nb_frames": "N/A" } ] }"#;
        assert_eq!(parse_probe_report(json).unwrap().frame_count, None);
    }

    #[test]
    fn test_parse_probe_without_stream() {
        let err = parse_probe_report(br#"{ "streams": [] }"#).unwrap_err();
        assert!(matches!(err, VideoError::Probe(_)));

        let err = parse_probe_report(b"not json").unwrap_err();
        assert!(matches!(err, VideoError::Probe(_)));
    }

    #[test]
    fn test_open_missing_file() {
        let err = FfmpegVideo::open(Path::new("/non/existent/video.mp4"))
            .err()
            .unwrap();
        assert!(matches!(err, VideoError::Precondition(_)));
    }
}
