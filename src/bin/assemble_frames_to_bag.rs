//! Pack a folder of frames into a ROS bag.
//!
//! Usage:
//! ```bash
//! cargo run --bin assemble_frames_to_bag -- \
//!   --image-folder frames/ --out-bag bags/frames.bag --time-delta-ns 50000000
//! ```
//!
//! Every `*.jpg` of the folder becomes one `sensor_msgs/Image` (`bgr8`) on
//! `/image`, stamped `time_delta` after the previous frame.

use clap::Parser;
use dataset_prep_tools::bag::pack::{DEFAULT_FRAME_PATTERN, DEFAULT_TOPIC};
use dataset_prep_tools::bag::{pack_frames, BagReader, FramePackConfig, RosTime};
use flexi_logger::{colored_detailed_format, Logger};
use log::info;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Duration;

/// Pack a folder of frames into a ROS bag of sensor_msgs/Image messages
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Folder with the frames
    #[arg(long)]
    image_folder: PathBuf,

    /// Output bag file; its folder is created if needed
    #[arg(long)]
    out_bag: PathBuf,

    /// Seconds between consecutive frames
    #[arg(long, default_value_t = 0)]
    time_delta_s: u64,

    /// Nanoseconds between consecutive frames, added to --time-delta-s
    #[arg(long, default_value_t = 0)]
    time_delta_ns: u64,

    /// Stamp before the first frame in seconds since the epoch; defaults to now
    #[arg(long)]
    start_time: Option<u32>,

    /// Topic of the image messages
    #[arg(long, default_value = DEFAULT_TOPIC)]
    topic: String,

    /// Glob selecting the frames
    #[arg(long, default_value = DEFAULT_FRAME_PATTERN)]
    pattern: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _logger = Logger::try_with_env_or_str("info")?
        .format(colored_detailed_format)
        .set_palette("196;208;76;39;178".to_string())
        .start()?;

    let cli = Cli::parse();

    let time_delta = Duration::from_secs(cli.time_delta_s)
        .checked_add(Duration::from_nanos(cli.time_delta_ns))
        .ok_or("Time delta is out of range")?;
    let start_time = cli
        .start_time
        .map(|secs| RosTime::new(secs, 0))
        .transpose()?;
    info!("Time delta: {time_delta:?}");

    let config = FramePackConfig {
        start_time,
        topic: cli.topic,
        pattern: cli.pattern,
        ..FramePackConfig::new(cli.image_folder, cli.out_bag, time_delta)
    };
    let summary = pack_frames(&config)?;

    let reader = BagReader::new(BufReader::new(File::open(&summary.output_bag)?))?;
    let bag = reader.summary();
    println!("path:     {}", summary.output_bag.display());
    if let (Some(start), Some(end)) = (bag.start_time, bag.end_time) {
        println!("start:    {start}");
        println!("end:      {end}");
    }
    println!("messages: {}", bag.message_count);
    println!("chunks:   {}", bag.chunk_count);
    for connection in &bag.connections {
        println!(
            "topic:    {} ({} msgs) : {}",
            connection.topic, summary.written, connection.message_type
        );
    }

    Ok(())
}
