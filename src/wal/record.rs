//! WAL record types and binary framing
//!
//! Each record is written once, append-only. All integers are big-endian.
//!
//! ```text
//! MAGIC      u32   0xCAFEBABE
//! TOTAL_LEN  i32   whole record length, header included
//! TYPE       u8    1 = PUT, 2 = DELETE
//! KEY_LEN    i32
//! KEY        KEY_LEN bytes     table || '|' || canonical(primary key)
//! VALUE_LEN  i32   -1 = absent (DELETE)
//! VALUE      VALUE_LEN bytes   canonical(columns), only when VALUE_LEN > 0
//! ```

use std::io::{self, Cursor, Read};

use crate::row::{self, CodecError, ColumnMap};

/// Fixed sentinel at the start of every record.
pub const MAGIC: u32 = 0xCAFE_BABE;

/// Bytes preceding the record body: magic + total length.
pub const FRAME_PREFIX_SIZE: usize = 4 + 4;

/// Smallest well-formed record: prefix + type + key length + value length.
pub const MIN_RECORD_SIZE: usize = FRAME_PREFIX_SIZE + 1 + 4 + 4;

/// Value length sentinel marking an absent value.
const ABSENT_VALUE: i32 = -1;

/// WAL record types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordType {
    /// Full post-write column state for a row
    Put = 1,
    /// Row deletion (tombstone)
    Delete = 2,
}

impl RecordType {
    /// Convert from u8, returns None for invalid values
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(RecordType::Put),
            2 => Some(RecordType::Delete),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// A decoded row operation carried by a record.
#[derive(Debug, Clone, PartialEq)]
pub struct RowOp {
    pub table: String,
    pub primary_key: ColumnMap,
    /// `None` for deletes
    pub columns: Option<ColumnMap>,
}

/// One entry of the mutation stream. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    kind: RecordType,
    key: Vec<u8>,
    value: Option<Vec<u8>>,
}

impl LogRecord {
    /// Create a PUT record from raw key/value payloads
    pub fn put(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            kind: RecordType::Put,
            key,
            value: Some(value),
        }
    }

    /// Create a DELETE record from a raw key payload
    pub fn delete(key: Vec<u8>) -> Self {
        Self {
            kind: RecordType::Delete,
            key,
            value: None,
        }
    }

    /// Create a PUT record for a row
    pub fn put_row(table: &str, primary_key: &ColumnMap, columns: &ColumnMap) -> Self {
        Self::put(row::encode_key(table, primary_key), row::encode_map(columns))
    }

    /// Create a DELETE record for a row
    pub fn delete_row(table: &str, primary_key: &ColumnMap) -> Self {
        Self::delete(row::encode_key(table, primary_key))
    }

    pub fn kind(&self) -> RecordType {
        self.kind
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    /// Decode the key and value payloads back into a row operation.
    pub fn decode_row(&self) -> Result<RowOp, CodecError> {
        let (table, primary_key) = row::decode_key(&self.key)?;
        let columns = match (self.kind, &self.value) {
            (RecordType::Put, Some(value)) => Some(row::decode_map(value)?),
            // A PUT with an absent value carries an empty column set.
            (RecordType::Put, None) => Some(ColumnMap::new()),
            (RecordType::Delete, _) => None,
        };

        Ok(RowOp {
            table,
            primary_key,
            columns,
        })
    }

    /// Total encoded size of this record in bytes
    pub fn encoded_len(&self) -> usize {
        MIN_RECORD_SIZE + self.key.len() + self.value.as_ref().map_or(0, Vec::len)
    }

    /// Serialize the complete record
    pub fn serialize(&self) -> Vec<u8> {
        let total_len = self.encoded_len();
        let mut buf = Vec::with_capacity(total_len);

        buf.extend_from_slice(&MAGIC.to_be_bytes());
        buf.extend_from_slice(&(total_len as i32).to_be_bytes());
        buf.push(self.kind.as_u8());

        buf.extend_from_slice(&(self.key.len() as i32).to_be_bytes());
        buf.extend_from_slice(&self.key);

        match &self.value {
            Some(value) => {
                buf.extend_from_slice(&(value.len() as i32).to_be_bytes());
                buf.extend_from_slice(value);
            }
            None => buf.extend_from_slice(&ABSENT_VALUE.to_be_bytes()),
        }

        buf
    }

    /// Deserialize one complete record (header included).
    ///
    /// `data` must be exactly the bytes covered by the record's TOTAL_LEN.
    pub fn deserialize(data: &[u8]) -> io::Result<Self> {
        if data.len() < MIN_RECORD_SIZE {
            return Err(invalid(format!(
                "record of {} bytes is shorter than minimum {}",
                data.len(),
                MIN_RECORD_SIZE
            )));
        }

        let mut cursor = Cursor::new(data);

        let magic = read_u32(&mut cursor)?;
        if magic != MAGIC {
            return Err(invalid(format!("bad magic 0x{:08X}", magic)));
        }

        let total_len = read_i32(&mut cursor)?;
        if total_len < 0 || total_len as usize != data.len() {
            return Err(invalid(format!(
                "declared length {} does not match record size {}",
                total_len,
                data.len()
            )));
        }

        let mut type_buf = [0u8; 1];
        cursor.read_exact(&mut type_buf)?;
        let kind = RecordType::from_u8(type_buf[0])
            .ok_or_else(|| invalid(format!("unknown record type {}", type_buf[0])))?;

        let key_len = read_i32(&mut cursor)?;
        if key_len < 0 {
            return Err(invalid(format!("negative key length {}", key_len)));
        }
        let key = read_exact_vec(&mut cursor, key_len as usize)?;

        let value_len = read_i32(&mut cursor)?;
        let value = match value_len {
            ABSENT_VALUE => None,
            len if len < 0 => {
                return Err(invalid(format!("negative value length {}", len)));
            }
            len => Some(read_exact_vec(&mut cursor, len as usize)?),
        };

        if cursor.position() as usize != data.len() {
            return Err(invalid("record payload shorter than declared length"));
        }

        Ok(Self { kind, key, value })
    }
}

fn invalid(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}

fn read_u32(cursor: &mut Cursor<&[u8]>) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    cursor.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

fn read_i32(cursor: &mut Cursor<&[u8]>) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    cursor.read_exact(&mut buf)?;
    Ok(i32::from_be_bytes(buf))
}

fn read_exact_vec(cursor: &mut Cursor<&[u8]>, len: usize) -> io::Result<Vec<u8>> {
    let remaining = cursor.get_ref().len() - cursor.position() as usize;
    if len > remaining {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("field of {} bytes exceeds remaining {}", len, remaining),
        ));
    }
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf)?;
    Ok(buf)
}
