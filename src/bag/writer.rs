//! Indexed, uncompressed ROS bag 2.0 writer.
//!
//! File layout:
//!
//! ```text
//! #ROSBAG V2.0\n
//! bag header record            (rewritten by `finish`)
//! chunk record, index data records      (repeated)
//! connection records                    (at index_pos)
//! chunk info records
//! ```

use std::collections::BTreeMap;
use std::io::{Seek, SeekFrom, Write};

use log::debug;

use super::image_msg::MessageType;
use super::record::{
    length_u32, write_record, HeaderFields, OP_BAG_HEADER, OP_CHUNK, OP_CHUNK_INFO,
    OP_CONNECTION, OP_INDEX_DATA, OP_MESSAGE_DATA,
};
use super::{BagError, RosTime, BAG_MAGIC};

/// Chunks are closed once their data reaches this size.
pub const CHUNK_THRESHOLD: usize = 768 * 1024;

/// Header fields plus padding of the bag header record, so the record can be
/// rewritten in place.
const BAG_HEADER_LENGTH: usize = 4096;

const INDEX_VERSION: u32 = 1;
const CHUNK_INFO_VERSION: u32 = 1;

#[derive(Debug)]
struct Connection {
    id: u32,
    topic: String,
    message_type: MessageType,
    /// Whether the connection record already went into a chunk.
    announced: bool,
}

impl Connection {
    fn header(&self) -> HeaderFields {
        HeaderFields::with_op(OP_CONNECTION)
            .u32("conn", self.id)
            .string("topic", &self.topic)
    }

    fn data(&self) -> Result<Vec<u8>, BagError> {
        HeaderFields::default()
            .string("topic", &self.topic)
            .string("type", self.message_type.name)
            .string("md5sum", self.message_type.md5sum)
            .string("message_definition", self.message_type.definition)
            .encode()
    }
}

#[derive(Debug)]
struct ChunkInfo {
    position: u64,
    start_time: RosTime,
    end_time: RosTime,
    counts: BTreeMap<u32, u32>,
}

#[derive(Debug, Default)]
struct OpenChunk {
    data: Vec<u8>,
    time_range: Option<(RosTime, RosTime)>,
    /// Per connection: message time and offset into `data`.
    index: BTreeMap<u32, Vec<(RosTime, u32)>>,
}

/// Writes messages into a bag on any seekable sink.
///
/// Call [`BagWriter::finish`] once all messages are written; a bag dropped
/// before that has no index.
///
/// # Examples
///
/// ```rust
/// use std::io::Cursor;
/// use dataset_prep_tools::bag::{BagReader, BagWriter, RosTime, IMAGE_MESSAGE};
///
/// let mut writer = BagWriter::new(Cursor::new(Vec::new())).unwrap();
/// let conn = writer.add_connection("/image", IMAGE_MESSAGE).unwrap();
/// writer.write_message(conn, RosTime::new(1, 0).unwrap(), b"payload").unwrap();
/// let bytes = writer.finish().unwrap().into_inner();
///
/// let reader = BagReader::new(Cursor::new(bytes)).unwrap();
/// assert_eq!(reader.summary().message_count, 1);
/// ```
pub struct BagWriter<W: Write + Seek> {
    writer: W,
    connections: Vec<Connection>,
    chunks: Vec<ChunkInfo>,
    chunk: OpenChunk,
    chunk_threshold: usize,
}

fn write_bag_header<W: Write>(
    writer: &mut W,
    index_pos: u64,
    conn_count: u32,
    chunk_count: u32,
) -> Result<(), BagError> {
    let header = HeaderFields::with_op(OP_BAG_HEADER)
        .u64("index_pos", index_pos)
        .u32("conn_count", conn_count)
        .u32("chunk_count", chunk_count);
    let padding = BAG_HEADER_LENGTH.saturating_sub(header.encode()?.len());
    write_record(writer, &header, &vec![b' '; padding])?;
    Ok(())
}

impl<W: Write + Seek> BagWriter<W> {
    /// Writes the magic line and a placeholder bag header.
    pub fn new(mut writer: W) -> Result<Self, BagError> {
        writer.write_all(BAG_MAGIC)?;
        write_bag_header(&mut writer, 0, 0, 0)?;

        Ok(BagWriter {
            writer,
            connections: Vec::new(),
            chunks: Vec::new(),
            chunk: OpenChunk::default(),
            chunk_threshold: CHUNK_THRESHOLD,
        })
    }

    pub fn with_chunk_threshold(mut self, chunk_threshold: usize) -> Self {
        self.chunk_threshold = chunk_threshold;
        self
    }

    /// Registers `topic` and returns its connection id. Adding a topic again
    /// with the same type returns the existing id.
    ///
    /// # Errors
    ///
    /// [`BagError::Precondition`] if the topic is empty or already carries a
    /// different message type.
    pub fn add_connection(
        &mut self,
        topic: &str,
        message_type: MessageType,
    ) -> Result<u32, BagError> {
        if topic.is_empty() {
            return Err(BagError::Precondition("Topic must not be empty".to_string()));
        }

        if let Some(existing) = self.connections.iter().find(|c| c.topic == topic) {
            if existing.message_type != message_type {
                return Err(BagError::Precondition(format!(
                    "Topic {topic} already carries {}",
                    existing.message_type.name
                )));
            }
            return Ok(existing.id);
        }

        let id = length_u32(self.connections.len(), "Connection table")?;
        self.connections.push(Connection {
            id,
            topic: topic.to_string(),
            message_type,
            announced: false,
        });
        Ok(id)
    }

    /// Appends one serialized message on `connection` with record time `time`.
    pub fn write_message(
        &mut self,
        connection: u32,
        time: RosTime,
        payload: &[u8],
    ) -> Result<(), BagError> {
        let conn = self
            .connections
            .get_mut(connection as usize)
            .ok_or_else(|| BagError::Precondition(format!("Unknown connection {connection}")))?;

        if !conn.announced {
            write_record(&mut self.chunk.data, &conn.header(), &conn.data()?)?;
            conn.announced = true;
        }

        let offset = length_u32(self.chunk.data.len(), "Chunk")?;
        let header = HeaderFields::with_op(OP_MESSAGE_DATA)
            .u32("conn", connection)
            .time("time", time);
        write_record(&mut self.chunk.data, &header, payload)?;

        let entries = self.chunk.index.entry(connection).or_default();
        entries.push((time, offset));
        self.chunk.time_range = Some(match self.chunk.time_range {
            Some((start, end)) => (start.min(time), end.max(time)),
            None => (time, time),
        });

        if self.chunk.data.len() >= self.chunk_threshold {
            self.flush_chunk()?;
        }
        Ok(())
    }

    fn flush_chunk(&mut self) -> Result<(), BagError> {
        let chunk = std::mem::take(&mut self.chunk);
        let Some((start_time, end_time)) = chunk.time_range else {
            return Ok(());
        };

        let position = self.writer.stream_position()?;
        let header = HeaderFields::with_op(OP_CHUNK)
            .string("compression", "none")
            .u32("size", length_u32(chunk.data.len(), "Chunk")?);
        write_record(&mut self.writer, &header, &chunk.data)?;

        let mut counts = BTreeMap::new();
        for (conn, entries) in &chunk.index {
            let mut data = Vec::with_capacity(entries.len() * 12);
            for (time, offset) in entries {
                data.extend_from_slice(&time.to_bytes());
                data.extend_from_slice(&offset.to_le_bytes());
            }
            let count = length_u32(entries.len(), "Index")?;
            let header = HeaderFields::with_op(OP_INDEX_DATA)
                .u32("ver", INDEX_VERSION)
                .u32("conn", *conn)
                .u32("count", count);
            write_record(&mut self.writer, &header, &data)?;
            counts.insert(*conn, count);
        }

        debug!(
            "Chunk {} at {position}: {} bytes, {start_time} to {end_time}",
            self.chunks.len(),
            chunk.data.len()
        );
        self.chunks.push(ChunkInfo {
            position,
            start_time,
            end_time,
            counts,
        });
        Ok(())
    }

    /// Flushes the open chunk, writes the index and the final bag header,
    /// and hands back the sink positioned at its end.
    pub fn finish(mut self) -> Result<W, BagError> {
        self.flush_chunk()?;

        let index_pos = self.writer.stream_position()?;
        for conn in &self.connections {
            write_record(&mut self.writer, &conn.header(), &conn.data()?)?;
        }

        for chunk in &self.chunks {
            let mut data = Vec::with_capacity(chunk.counts.len() * 8);
            for (conn, count) in &chunk.counts {
                data.extend_from_slice(&conn.to_le_bytes());
                data.extend_from_slice(&count.to_le_bytes());
            }
            let header = HeaderFields::with_op(OP_CHUNK_INFO)
                .u32("ver", CHUNK_INFO_VERSION)
                .u64("chunk_pos", chunk.position)
                .time("start_time", chunk.start_time)
                .time("end_time", chunk.end_time)
                .u32("count", length_u32(chunk.counts.len(), "Chunk info")?);
            write_record(&mut self.writer, &header, &data)?;
        }

        let conn_count = length_u32(self.connections.len(), "Connection table")?;
        let chunk_count = length_u32(self.chunks.len(), "Chunk table")?;
        self.writer.seek(SeekFrom::Start(BAG_MAGIC.len() as u64))?;
        write_bag_header(&mut self.writer, index_pos, conn_count, chunk_count)?;
        self.writer.seek(SeekFrom::End(0))?;
        self.writer.flush()?;

        Ok(self.writer)
    }
}
