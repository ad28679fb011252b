//! Minimal ROS bag 2.0 support for storing image sequences.
//!
//! [`BagWriter`] produces uncompressed, indexed bags readable by the ROS
//! tooling, [`BagReader`] reads the same layout back, and [`pack_frames`]
//! stores a folder of frames as `sensor_msgs/Image` messages.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::util::UtilError;

pub mod image_msg;
pub mod pack;
pub mod reader;
mod record;
pub mod writer;

pub use image_msg::{ImageMessage, MessageType, IMAGE_MESSAGE};
pub use pack::{pack_frames, FramePackConfig, PackSummary};
pub use reader::{BagMessage, BagReader, BagSummary, ConnectionInfo};
pub use writer::BagWriter;

/// Every bag 2.0 file starts with this line.
pub const BAG_MAGIC: &[u8] = b"#ROSBAG V2.0\n";

const NANOS_PER_SEC: u32 = 1_000_000_000;

#[derive(thiserror::Error, Debug)]
pub enum BagError {
    #[error("Precondition failed: {0}")]
    Precondition(String),
    #[error("Invalid bag record: {0}")]
    InvalidRecord(String),
    #[error("Time out of range: {0}")]
    TimeOverflow(String),
    #[error("Image error: {0}")]
    ImageError(String),
    #[error("IO Error: {0}")]
    IOError(String),
}

impl From<std::io::Error> for BagError {
    fn from(err: std::io::Error) -> Self {
        BagError::IOError(err.to_string())
    }
}

impl From<UtilError> for BagError {
    fn from(err: UtilError) -> Self {
        match err {
            UtilError::ImageRead { .. } | UtilError::ImageWrite { .. } => {
                BagError::ImageError(err.to_string())
            }
            UtilError::IOError(msg) => BagError::IOError(msg),
            other => BagError::Precondition(other.to_string()),
        }
    }
}

/// ROS time: seconds and nanoseconds since the Unix epoch, both unsigned
/// 32-bit as stored in bags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RosTime {
    pub secs: u32,
    pub nsecs: u32,
}

impl RosTime {
    /// # Errors
    ///
    /// [`BagError::TimeOverflow`] if `nsecs` is not below one second.
    pub fn new(secs: u32, nsecs: u32) -> Result<Self, BagError> {
        if nsecs >= NANOS_PER_SEC {
            return Err(BagError::TimeOverflow(format!(
                "nsecs = {nsecs} is not below one second"
            )));
        }
        Ok(RosTime { secs, nsecs })
    }

    /// Time elapsed since the epoch, as a [`RosTime`].
    ///
    /// # Errors
    ///
    /// [`BagError::TimeOverflow`] if the seconds do not fit in 32 bits.
    pub fn from_duration(since_epoch: Duration) -> Result<Self, BagError> {
        let secs = u32::try_from(since_epoch.as_secs()).map_err(|_| {
            BagError::TimeOverflow(format!(
                "{} s does not fit a ROS time",
                since_epoch.as_secs()
            ))
        })?;
        Ok(RosTime {
            secs,
            nsecs: since_epoch.subsec_nanos(),
        })
    }

    pub fn from_system_time(time: SystemTime) -> Result<Self, BagError> {
        let since_epoch = time
            .duration_since(UNIX_EPOCH)
            .map_err(|e| BagError::TimeOverflow(format!("Time before the epoch: {e}")))?;
        Self::from_duration(since_epoch)
    }

    pub fn now() -> Result<Self, BagError> {
        Self::from_system_time(SystemTime::now())
    }

    pub fn as_duration(&self) -> Duration {
        Duration::new(u64::from(self.secs), self.nsecs)
    }

    /// `self + delta`, failing instead of wrapping past the 32-bit seconds.
    pub fn checked_add(&self, delta: Duration) -> Result<Self, BagError> {
        let sum = self
            .as_duration()
            .checked_add(delta)
            .ok_or_else(|| BagError::TimeOverflow(format!("{self} + {delta:?}")))?;
        Self::from_duration(sum)
    }

    /// Little-endian `secs`, `nsecs` as stored in records and messages.
    pub fn to_bytes(&self) -> [u8; 8] {
        let mut bytes = [0u8; 8];
        bytes[..4].copy_from_slice(&self.secs.to_le_bytes());
        bytes[4..].copy_from_slice(&self.nsecs.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BagError> {
        let (secs, tail) = record::munch_u32_le(bytes)?;
        let (nsecs, tail) = record::munch_u32_le(tail)?;
        if !tail.is_empty() {
            return Err(BagError::InvalidRecord(format!(
                "Time field has {} bytes",
                bytes.len()
            )));
        }
        Ok(RosTime { secs, nsecs })
    }
}

impl fmt::Display for RosTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.secs, self.nsecs)
    }
}
