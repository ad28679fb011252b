//! Record framing shared by the bag writer and reader.
//!
//! A record is `header_len: u32`, the header fields, `data_len: u32`, the
//! data. Each header field is `field_len: u32` followed by `name=value`, where
//! the value is raw bytes. All integers are little endian.

use std::io::{Read, Write};

use super::{BagError, RosTime};

pub(crate) const OP_MESSAGE_DATA: u8 = 0x02;
pub(crate) const OP_BAG_HEADER: u8 = 0x03;
pub(crate) const OP_INDEX_DATA: u8 = 0x04;
pub(crate) const OP_CHUNK: u8 = 0x05;
pub(crate) const OP_CHUNK_INFO: u8 = 0x06;
pub(crate) const OP_CONNECTION: u8 = 0x07;

const U32_SIZE: usize = std::mem::size_of::<u32>();

// Record headers are a handful of short fields; anything larger is corrupt.
const MAX_HEADER_LEN: u32 = 1 << 20;

pub(crate) fn munch_bytes(buf: &[u8], len: usize) -> Result<(&[u8], &[u8]), BagError> {
    if buf.len() < len {
        return Err(BagError::InvalidRecord(format!(
            "Need {len} bytes, {} left",
            buf.len()
        )));
    }
    Ok(buf.split_at(len))
}

pub(crate) fn munch_u8(buf: &[u8]) -> Result<(u8, &[u8]), BagError> {
    let (byte, tail) = munch_bytes(buf, 1)?;
    Ok((byte[0], tail))
}

pub(crate) fn munch_u32_le(buf: &[u8]) -> Result<(u32, &[u8]), BagError> {
    let (word_bytes, tail) = munch_bytes(buf, U32_SIZE)?;
    let mut word = [0u8; U32_SIZE];
    word.copy_from_slice(word_bytes);
    Ok((u32::from_le_bytes(word), tail))
}

pub(crate) fn munch_u64_le(buf: &[u8]) -> Result<(u64, &[u8]), BagError> {
    let (word_bytes, tail) = munch_bytes(buf, 8)?;
    let mut word = [0u8; 8];
    word.copy_from_slice(word_bytes);
    Ok((u64::from_le_bytes(word), tail))
}

pub(crate) fn munch_time(buf: &[u8]) -> Result<(RosTime, &[u8]), BagError> {
    let (time_bytes, tail) = munch_bytes(buf, 8)?;
    Ok((RosTime::from_bytes(time_bytes)?, tail))
}

/// A `u32` length prefix followed by that many bytes.
pub(crate) fn munch_sized(buf: &[u8]) -> Result<(&[u8], &[u8]), BagError> {
    let (len, tail) = munch_u32_le(buf)?;
    munch_bytes(tail, len as usize)
}

pub(crate) fn munch_string(buf: &[u8]) -> Result<(String, &[u8]), BagError> {
    let (bytes, tail) = munch_sized(buf)?;
    let text = String::from_utf8(bytes.to_vec())
        .map_err(|e| BagError::InvalidRecord(format!("String is not UTF-8: {e}")))?;
    Ok((text, tail))
}

pub(crate) fn length_u32(len: usize, what: &str) -> Result<u32, BagError> {
    u32::try_from(len)
        .map_err(|_| BagError::Precondition(format!("{what} of {len} bytes is too large")))
}

pub(crate) fn emit_sized(buf: &mut Vec<u8>, bytes: &[u8]) -> Result<(), BagError> {
    buf.extend_from_slice(&length_u32(bytes.len(), "Field")?.to_le_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

/// Ordered `name=value` fields of a record header, or of a connection
/// record's data block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct HeaderFields {
    fields: Vec<(String, Vec<u8>)>,
}

impl HeaderFields {
    pub(crate) fn with_op(op: u8) -> Self {
        HeaderFields::default().bytes("op", vec![op])
    }

    pub(crate) fn bytes(mut self, name: &str, value: Vec<u8>) -> Self {
        self.fields.push((name.to_string(), value));
        self
    }

    pub(crate) fn u32(self, name: &str, value: u32) -> Self {
        self.bytes(name, value.to_le_bytes().to_vec())
    }

    pub(crate) fn u64(self, name: &str, value: u64) -> Self {
        self.bytes(name, value.to_le_bytes().to_vec())
    }

    pub(crate) fn time(self, name: &str, value: RosTime) -> Self {
        self.bytes(name, value.to_bytes().to_vec())
    }

    pub(crate) fn string(self, name: &str, value: &str) -> Self {
        self.bytes(name, value.as_bytes().to_vec())
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>, BagError> {
        let mut buf = Vec::new();
        for (name, value) in &self.fields {
            let mut field = Vec::with_capacity(name.len() + 1 + value.len());
            field.extend_from_slice(name.as_bytes());
            field.push(b'=');
            field.extend_from_slice(value);
            emit_sized(&mut buf, &field)?;
        }
        Ok(buf)
    }

    pub(crate) fn decode(mut buf: &[u8]) -> Result<Self, BagError> {
        let mut fields = Vec::new();
        while !buf.is_empty() {
            let (field, tail) = munch_sized(buf)?;
            let separator = field.iter().position(|&b| b == b'=').ok_or_else(|| {
                BagError::InvalidRecord("Header field without '='".to_string())
            })?;
            let name = std::str::from_utf8(&field[..separator])
                .map_err(|e| BagError::InvalidRecord(format!("Field name is not UTF-8: {e}")))?;
            fields.push((name.to_string(), field[separator + 1..].to_vec()));
            buf = tail;
        }
        Ok(HeaderFields { fields })
    }

    pub(crate) fn get(&self, name: &str) -> Result<&[u8], BagError> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_slice())
            .ok_or_else(|| BagError::InvalidRecord(format!("Missing header field '{name}'")))
    }

    fn get_exact(&self, name: &str, len: usize) -> Result<&[u8], BagError> {
        let value = self.get(name)?;
        if value.len() != len {
            return Err(BagError::InvalidRecord(format!(
                "Field '{name}' has {} bytes, expected {len}",
                value.len()
            )));
        }
        Ok(value)
    }

    pub(crate) fn get_u8(&self, name: &str) -> Result<u8, BagError> {
        Ok(munch_u8(self.get_exact(name, 1)?)?.0)
    }

    pub(crate) fn get_u32(&self, name: &str) -> Result<u32, BagError> {
        Ok(munch_u32_le(self.get_exact(name, 4)?)?.0)
    }

    pub(crate) fn get_u64(&self, name: &str) -> Result<u64, BagError> {
        Ok(munch_u64_le(self.get_exact(name, 8)?)?.0)
    }

    pub(crate) fn get_time(&self, name: &str) -> Result<RosTime, BagError> {
        RosTime::from_bytes(self.get_exact(name, 8)?)
    }

    pub(crate) fn get_string(&self, name: &str) -> Result<String, BagError> {
        String::from_utf8(self.get(name)?.to_vec())
            .map_err(|e| BagError::InvalidRecord(format!("Field '{name}' is not UTF-8: {e}")))
    }

    pub(crate) fn op(&self) -> Result<u8, BagError> {
        self.get_u8("op")
    }

    /// Fails unless the record carries the `expected` op code.
    pub(crate) fn expect_op(&self, expected: u8) -> Result<(), BagError> {
        match self.op()? {
            op if op == expected => Ok(()),
            op => Err(BagError::InvalidRecord(format!(
                "Expected op 0x{expected:02x}, found 0x{op:02x}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Record {
    pub(crate) header: HeaderFields,
    pub(crate) data: Vec<u8>,
}

/// Writes one record and returns its size in bytes.
pub(crate) fn write_record<W: Write>(
    writer: &mut W,
    header: &HeaderFields,
    data: &[u8],
) -> Result<usize, BagError> {
    let header = header.encode()?;
    let mut buf = Vec::with_capacity(2 * U32_SIZE + header.len() + data.len());
    emit_sized(&mut buf, &header)?;
    emit_sized(&mut buf, data)?;
    writer.write_all(&buf)?;
    Ok(buf.len())
}

fn read_sized<R: Read>(reader: &mut R, limit: u32, what: &str) -> Result<Vec<u8>, BagError> {
    let mut len = [0u8; U32_SIZE];
    reader.read_exact(&mut len)?;
    let len = u32::from_le_bytes(len);
    if len > limit {
        return Err(BagError::InvalidRecord(format!("{what} length {len} is too large")));
    }

    let mut buf = Vec::new();
    reader.by_ref().take(u64::from(len)).read_to_end(&mut buf)?;
    if buf.len() != len as usize {
        return Err(BagError::InvalidRecord(format!(
            "Truncated {what}: {} of {len} bytes",
            buf.len()
        )));
    }
    Ok(buf)
}

pub(crate) fn read_record<R: Read>(reader: &mut R) -> Result<Record, BagError> {
    let header = HeaderFields::decode(&read_sized(reader, MAX_HEADER_LEN, "header")?)?;
    let data = read_sized(reader, u32::MAX, "data")?;
    Ok(Record { header, data })
}

/// Splits the first record off `buf`, as found inside chunk data.
pub(crate) fn parse_record(buf: &[u8]) -> Result<(Record, &[u8]), BagError> {
    let (header, tail) = munch_sized(buf)?;
    let (data, tail) = munch_sized(tail)?;
    Ok((
        Record {
            header: HeaderFields::decode(header)?,
            data: data.to_vec(),
        },
        tail,
    ))
}
