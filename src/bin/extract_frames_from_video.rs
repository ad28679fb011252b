//! Extract frames from a video file.
//!
//! Usage:
//! ```bash
//! # every third frame, as frame_000001.jpg, frame_000004.jpg, ...
//! cargo run --bin extract_frames_from_video -- frames/ input.mp4 --skip-frames 2
//!
//! # 200 frames spread over the video, as frame_<index>.png
//! cargo run --bin extract_frames_from_video -- frames/ input.mp4 \
//!   --frame-mode total-frames --total-frames 200
//! ```
//!
//! Decoding needs `ffmpeg` and `ffprobe` on the `PATH`.

use clap::{Parser, ValueEnum};
use dataset_prep_tools::video::{
    extract_frames, FfmpegVideo, FrameSelection, DEFAULT_SKIP_BEGINNING, DEFAULT_SKIP_ENDING,
};
use flexi_logger::{colored_detailed_format, Logger};
use log::info;
use std::path::PathBuf;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum FrameMode {
    /// Keep one frame, then skip --skip-frames frames
    FixedSkip,
    /// Keep --total-frames frames evenly spread over the video
    TotalFrames,
}

/// Extract frames from a video file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// The output folder
    outdir: PathBuf,

    /// The input video file
    videopath: PathBuf,

    /// How frames are selected
    #[arg(long, value_enum, default_value_t = FrameMode::FixedSkip)]
    frame_mode: FrameMode,

    /// Frames dropped after each kept frame in fixed-skip mode
    #[arg(long, default_value_t = 0)]
    skip_frames: u64,

    /// Number of frames to extract in total-frames mode
    #[arg(long, default_value_t = 0)]
    total_frames: usize,

    /// Frames ignored at the start in total-frames mode
    #[arg(long, default_value_t = DEFAULT_SKIP_BEGINNING)]
    skip_beginning: u64,

    /// Frames ignored at the end in total-frames mode
    #[arg(long, default_value_t = DEFAULT_SKIP_ENDING)]
    skip_ending: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _logger = Logger::try_with_env_or_str("info")?
        .format(colored_detailed_format)
        .set_palette("196;208;76;39;178".to_string())
        .start()?;

    let cli = Cli::parse();

    let selection = match cli.frame_mode {
        FrameMode::FixedSkip => FrameSelection::FixedSkip {
            skip_frames: cli.skip_frames,
        },
        FrameMode::TotalFrames => FrameSelection::TotalFrames {
            total_frames: cli.total_frames,
            skip_beginning: cli.skip_beginning,
            skip_ending: cli.skip_ending,
        },
    };
    info!("Frame selection: {selection:?}");

    let mut video = FfmpegVideo::open(&cli.videopath)?;
    let stream = video.info();
    info!(
        "Opened {}: {}x{}, rotated {} degrees, {} frames",
        cli.videopath.display(),
        stream.width,
        stream.height,
        stream.rotation,
        stream
            .frame_count
            .map_or_else(|| "unknown".to_string(), |count| count.to_string())
    );
    let written = extract_frames(&mut video, &cli.outdir, &selection)?;

    println!(
        "{} frames written to {}",
        written.len(),
        cli.outdir.display()
    );
    Ok(())
}
