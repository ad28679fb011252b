//! `sensor_msgs/Image` in ROS serialization.

use image::RgbImage;

use super::record::{emit_sized, munch_sized, munch_string, munch_time, munch_u32_le, munch_u8};
use super::{BagError, RosTime};

/// Name, checksum and full definition of a ROS message type, as stored in
/// connection records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageType {
    pub name: &'static str,
    pub md5sum: &'static str,
    pub definition: &'static str,
}

pub const IMAGE_MESSAGE: MessageType = MessageType {
    name: "sensor_msgs/Image",
    md5sum: "060021388200f6f0f447d0fcd9c64743",
    definition: "std_msgs/Header header
uint32 height
uint32 width
string encoding
uint8 is_bigendian
uint32 step
uint8[] data

================================================================================
MSG: std_msgs/Header
uint32 seq
time stamp
string frame_id
",
};

pub const BGR8: &str = "bgr8";
pub const RGB8: &str = "rgb8";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageMessage {
    pub seq: u32,
    pub stamp: RosTime,
    pub frame_id: String,
    pub height: u32,
    pub width: u32,
    pub encoding: String,
    pub is_bigendian: u8,
    /// Row length in bytes.
    pub step: u32,
    pub data: Vec<u8>,
}

impl ImageMessage {
    /// Wraps `image` as a `bgr8` message with an empty `frame_id`.
    pub fn from_rgb(image: &RgbImage, seq: u32, stamp: RosTime) -> Self {
        let mut data = Vec::with_capacity(image.as_raw().len());
        for pixel in image.pixels() {
            let [r, g, b] = pixel.0;
            data.extend_from_slice(&[b, g, r]);
        }

        ImageMessage {
            seq,
            stamp,
            frame_id: String::new(),
            height: image.height(),
            width: image.width(),
            encoding: BGR8.to_string(),
            is_bigendian: 0,
            step: 3 * image.width(),
            data,
        }
    }

    /// Decodes `bgr8` and `rgb8` payloads.
    pub fn to_rgb(&self) -> Result<RgbImage, BagError> {
        let row_len = 3 * self.width as usize;
        if row_len == 0 || self.height == 0 {
            return Err(BagError::ImageError("Empty image".to_string()));
        }
        if (self.step as usize) < row_len
            || self.data.len() < self.step as usize * self.height as usize
        {
            return Err(BagError::ImageError(format!(
                "{}x{} image with step {} holds {} bytes",
                self.width,
                self.height,
                self.step,
                self.data.len()
            )));
        }

        let swap = match self.encoding.as_str() {
            BGR8 => true,
            RGB8 => false,
            other => {
                return Err(BagError::ImageError(format!(
                    "Unsupported encoding '{other}'"
                )))
            }
        };

        let mut raw = Vec::with_capacity(row_len * self.height as usize);
        let rows = self.data.chunks(self.step as usize);
        for row in rows.take(self.height as usize) {
            for pixel in row[..row_len].chunks_exact(3) {
                if swap {
                    raw.extend_from_slice(&[pixel[2], pixel[1], pixel[0]]);
                } else {
                    raw.extend_from_slice(pixel);
                }
            }
        }

        RgbImage::from_raw(self.width, self.height, raw)
            .ok_or_else(|| BagError::ImageError("Image buffer has the wrong size".to_string()))
    }

    pub fn serialize(&self) -> Result<Vec<u8>, BagError> {
        let mut buf = Vec::with_capacity(64 + self.frame_id.len() + self.data.len());
        buf.extend_from_slice(&self.seq.to_le_bytes());
        buf.extend_from_slice(&self.stamp.to_bytes());
        emit_sized(&mut buf, self.frame_id.as_bytes())?;
        buf.extend_from_slice(&self.height.to_le_bytes());
        buf.extend_from_slice(&self.width.to_le_bytes());
        emit_sized(&mut buf, self.encoding.as_bytes())?;
        buf.push(self.is_bigendian);
        buf.extend_from_slice(&self.step.to_le_bytes());
        emit_sized(&mut buf, &self.data)?;
        Ok(buf)
    }

    pub fn deserialize(buf: &[u8]) -> Result<Self, BagError> {
        let (seq, tail) = munch_u32_le(buf)?;
        let (stamp, tail) = munch_time(tail)?;
        let (frame_id, tail) = munch_string(tail)?;
        let (height, tail) = munch_u32_le(tail)?;
        let (width, tail) = munch_u32_le(tail)?;
        let (encoding, tail) = munch_string(tail)?;
        let (is_bigendian, tail) = munch_u8(tail)?;
        let (step, tail) = munch_u32_le(tail)?;
        let (data, tail) = munch_sized(tail)?;
        if !tail.is_empty() {
            return Err(BagError::InvalidRecord(format!(
                "{} trailing bytes after image message",
                tail.len()
            )));
        }

        Ok(ImageMessage {
            seq,
            stamp,
            frame_id,
            height,
            width,
            encoding,
            is_bigendian,
            step,
            data: data.to_vec(),
        })
    }
}
