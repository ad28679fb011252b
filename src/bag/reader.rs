//! Reader for indexed, uncompressed ROS bag 2.0 files.

use std::io::{Read, Seek, SeekFrom};

use super::record::{
    munch_u32_le, parse_record, read_record, HeaderFields, Record, OP_BAG_HEADER, OP_CHUNK,
    OP_CHUNK_INFO, OP_CONNECTION, OP_MESSAGE_DATA,
};
use super::{BagError, RosTime, BAG_MAGIC};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: u32,
    pub topic: String,
    pub message_type: String,
    pub md5sum: String,
    pub message_definition: String,
}

impl ConnectionInfo {
    fn from_record(record: &Record) -> Result<Self, BagError> {
        record.header.expect_op(OP_CONNECTION)?;
        let fields = HeaderFields::decode(&record.data)?;
        Ok(ConnectionInfo {
            id: record.header.get_u32("conn")?,
            topic: record.header.get_string("topic")?,
            message_type: fields.get_string("type")?,
            md5sum: fields.get_string("md5sum")?,
            message_definition: fields.get_string("message_definition")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ChunkInfo {
    position: u64,
    start_time: RosTime,
    end_time: RosTime,
    message_count: u64,
}

impl ChunkInfo {
    fn from_record(record: &Record) -> Result<Self, BagError> {
        record.header.expect_op(OP_CHUNK_INFO)?;
        let entries = record.header.get_u32("count")?;

        let mut message_count = 0_u64;
        let mut tail = record.data.as_slice();
        for _ in 0..entries {
            let (_conn, rest) = munch_u32_le(tail)?;
            let (count, rest) = munch_u32_le(rest)?;
            message_count += u64::from(count);
            tail = rest;
        }

        Ok(ChunkInfo {
            position: record.header.get_u64("chunk_pos")?,
            start_time: record.header.get_time("start_time")?,
            end_time: record.header.get_time("end_time")?,
            message_count,
        })
    }
}

/// What a bag holds, from its index alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BagSummary {
    pub connections: Vec<ConnectionInfo>,
    pub chunk_count: usize,
    pub message_count: u64,
    pub start_time: Option<RosTime>,
    pub end_time: Option<RosTime>,
}

/// One message data record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BagMessage {
    pub connection: u32,
    pub time: RosTime,
    pub data: Vec<u8>,
}

pub struct BagReader<R: Read + Seek> {
    reader: R,
    connections: Vec<ConnectionInfo>,
    chunks: Vec<ChunkInfo>,
}

impl<R: Read + Seek> BagReader<R> {
    /// Checks the magic line and loads the connection and chunk index.
    ///
    /// # Errors
    ///
    /// [`BagError::InvalidRecord`] if the file is not a bag 2.0 file or was
    /// never finished.
    pub fn new(mut reader: R) -> Result<Self, BagError> {
        reader.seek(SeekFrom::Start(0))?;
        let mut magic = [0u8; BAG_MAGIC.len()];
        reader.read_exact(&mut magic)?;
        if &magic[..] != BAG_MAGIC {
            return Err(BagError::InvalidRecord(
                "Not a ROS bag 2.0 file".to_string(),
            ));
        }

        let header = read_record(&mut reader)?.header;
        header.expect_op(OP_BAG_HEADER)?;
        let index_pos = header.get_u64("index_pos")?;
        if index_pos == 0 {
            return Err(BagError::InvalidRecord(
                "Bag has no index, it was not closed".to_string(),
            ));
        }
        let conn_count = header.get_u32("conn_count")?;
        let chunk_count = header.get_u32("chunk_count")?;

        reader.seek(SeekFrom::Start(index_pos))?;
        let connections = (0..conn_count)
            .map(|_| ConnectionInfo::from_record(&read_record(&mut reader)?))
            .collect::<Result<Vec<_>, _>>()?;
        let chunks = (0..chunk_count)
            .map(|_| ChunkInfo::from_record(&read_record(&mut reader)?))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(BagReader {
            reader,
            connections,
            chunks,
        })
    }

    pub fn connections(&self) -> &[ConnectionInfo] {
        &self.connections
    }

    pub fn summary(&self) -> BagSummary {
        BagSummary {
            connections: self.connections.clone(),
            chunk_count: self.chunks.len(),
            message_count: self.chunks.iter().map(|c| c.message_count).sum(),
            start_time: self.chunks.iter().map(|c| c.start_time).min(),
            end_time: self.chunks.iter().map(|c| c.end_time).max(),
        }
    }

    /// Every message in file order.
    ///
    /// # Errors
    ///
    /// [`BagError::InvalidRecord`] for compressed chunks, chunk sizes that do
    /// not match, or records other than connections and messages inside a
    /// chunk.
    pub fn messages(&mut self) -> Result<Vec<BagMessage>, BagError> {
        let mut messages = Vec::new();
        for chunk in &self.chunks {
            self.reader.seek(SeekFrom::Start(chunk.position))?;
            let record = read_record(&mut self.reader)?;
            record.header.expect_op(OP_CHUNK)?;

            let compression = record.header.get_string("compression")?;
            if compression != "none" {
                return Err(BagError::InvalidRecord(format!(
                    "Unsupported chunk compression '{compression}'"
                )));
            }
            let size = record.header.get_u32("size")? as usize;
            if size != record.data.len() {
                return Err(BagError::InvalidRecord(format!(
                    "Chunk at {} declares {size} bytes, holds {}",
                    chunk.position,
                    record.data.len()
                )));
            }

            let mut tail = record.data.as_slice();
            while !tail.is_empty() {
                let (inner, rest) = parse_record(tail)?;
                match inner.header.op()? {
                    OP_CONNECTION => {}
                    OP_MESSAGE_DATA => messages.push(BagMessage {
                        connection: inner.header.get_u32("conn")?,
                        time: inner.header.get_time("time")?,
                        data: inner.data,
                    }),
                    op => {
                        return Err(BagError::InvalidRecord(format!(
                            "Unexpected op 0x{op:02x} inside a chunk"
                        )))
                    }
                }
                tail = rest;
            }
        }
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bag::{BagWriter, ImageMessage, IMAGE_MESSAGE};
    use image::{Rgb, RgbImage};
    use std::io::Cursor;

    fn time(secs: u32, nsecs: u32) -> RosTime {
        RosTime::new(secs, nsecs).unwrap()
    }

    fn image_bag(count: u32, chunk_threshold: usize) -> Vec<u8> {
        let mut writer = BagWriter::new(Cursor::new(Vec::new()))
            .unwrap()
            .with_chunk_threshold(chunk_threshold);
        let conn = writer.add_connection("/image", IMAGE_MESSAGE).unwrap();
        for i in 0..count {
            let image = RgbImage::from_pixel(4 + i, 3, Rgb([i as u8, 0, 0]));
            let stamp = time(100 + i, 500);
            let message = ImageMessage::from_rgb(&image, i, stamp);
            writer
                .write_message(conn, stamp, &message.serialize().unwrap())
                .unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_two_messages_read_back() {
        let mut reader = BagReader::new(Cursor::new(image_bag(2, 1 << 20))).unwrap();

        let summary = reader.summary();
        assert_eq!(summary.connections.len(), 1);
        assert_eq!(summary.connections[0].topic, "/image");
        assert_eq!(summary.connections[0].message_type, "sensor_msgs/Image");
        assert_eq!(summary.connections[0].md5sum, IMAGE_MESSAGE.md5sum);
        assert_eq!(summary.chunk_count, 1);
        assert_eq!(summary.message_count, 2);
        assert_eq!(summary.start_time, Some(time(100, 500)));
        assert_eq!(summary.end_time, Some(time(101, 500)));

        let messages = reader.messages().unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].time < messages[1].time);
        for (i, message) in messages.iter().enumerate() {
            assert_eq!(message.connection, 0);
            let image = ImageMessage::deserialize(&message.data).unwrap();
            assert_eq!(image.seq, i as u32);
            assert_eq!(image.stamp, message.time);
            assert_eq!((image.width, image.height), (4 + i as u32, 3));
            assert_eq!(
                *image.to_rgb().unwrap().get_pixel(0, 0),
                Rgb([i as u8, 0, 0])
            );
        }
    }

    #[test]
    fn test_many_chunks_keep_order() {
        let mut reader = BagReader::new(Cursor::new(image_bag(5, 1))).unwrap();
        let summary = reader.summary();
        assert_eq!(summary.chunk_count, 5);
        assert_eq!(summary.message_count, 5);
        assert_eq!(summary.connections.len(), 1);

        let times: Vec<u32> = reader
            .messages()
            .unwrap()
            .iter()
            .map(|m| m.time.secs)
            .collect();
        assert_eq!(times, vec![100, 101, 102, 103, 104]);
    }

    #[test]
    fn test_empty_bag() {
        let bytes = BagWriter::new(Cursor::new(Vec::new()))
            .unwrap()
            .finish()
            .unwrap()
            .into_inner();
        let mut reader = BagReader::new(Cursor::new(bytes)).unwrap();
        let summary = reader.summary();
        assert_eq!(summary.message_count, 0);
        assert_eq!(summary.start_time, None);
        assert!(reader.messages().unwrap().is_empty());
    }

    #[test]
    fn test_rejects_foreign_and_unfinished_files() {
        let err = BagReader::new(Cursor::new(b"#ROSBAG V1.2\n and more".to_vec()))
            .err()
            .unwrap();
        assert!(matches!(err, BagError::InvalidRecord(_)));

        // Header still holds the placeholder written on open.
        let mut unfinished = Cursor::new(Vec::new());
        {
            let mut writer = BagWriter::new(&mut unfinished).unwrap();
            let conn = writer.add_connection("/image", IMAGE_MESSAGE).unwrap();
            writer.write_message(conn, time(1, 0), b"x").unwrap();
        }
        let err = BagReader::new(Cursor::new(unfinished.into_inner()))
            .err()
            .unwrap();
        assert!(matches!(err, BagError::InvalidRecord(_)));
    }

    #[test]
    fn test_corrupted_chunk_size() {
        let mut bytes = image_bag(1, 1 << 20);
        let chunk_pos = BAG_MAGIC.len() + 8 + 4096;
        // Corrupt the data length of the chunk record.
        let header_len = u32::from_le_bytes([
            bytes[chunk_pos],
            bytes[chunk_pos + 1],
            bytes[chunk_pos + 2],
            bytes[chunk_pos + 3],
        ]) as usize;
        let data_len_pos = chunk_pos + 4 + header_len;
        bytes[data_len_pos] = bytes[data_len_pos].wrapping_sub(1);

        let result = BagReader::new(Cursor::new(bytes)).and_then(|mut r| r.messages());
        assert!(result.is_err());
    }
}
