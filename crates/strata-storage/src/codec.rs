//! Binary encoding of tuple batches for spilling.
//!
//! Layout (little-endian):
//! - row_count: 4 bytes
//! - column_count: 2 bytes
//! - per value: 1 byte type tag, then the payload
//!   (variable-length payloads carry a 4 byte length prefix)
//! - checksum: 4 bytes, CRC32 of everything before it

use bytes::{Buf, BufMut, Bytes, BytesMut};
use strata_common::value::estimate_batch_size;
use strata_common::{BatchId, Result, StrataError, Tuple, TupleBatch, TypeId, Value};

/// Size of the batch header in bytes.
pub const BATCH_HEADER_SIZE: usize = 6;

/// Size of the trailing checksum in bytes.
pub const CHECKSUM_SIZE: usize = 4;

/// Encodes a batch of tuples.
///
/// All tuples in a batch must have the same arity. Fails with
/// `InvalidParameter` when a count or length does not fit its header field.
pub fn encode_batch(batch: &[Tuple]) -> Result<Bytes> {
    let columns = batch.first().map_or(0, Vec::len);
    let mut buf = BytesMut::with_capacity(
        BATCH_HEADER_SIZE + estimate_batch_size(batch) + CHECKSUM_SIZE,
    );
    buf.put_u32_le(checked_u32("row_count", batch.len())?);
    buf.put_u16_le(u16::try_from(columns).map_err(|_| overflow("column_count", columns))?);

    for tuple in batch {
        for value in tuple {
            encode_value(&mut buf, value)?;
        }
    }

    let checksum = crc32fast::hash(&buf);
    buf.put_u32_le(checksum);
    Ok(buf.freeze())
}

fn encode_value(buf: &mut BytesMut, value: &Value) -> Result<()> {
    buf.put_u8(value.type_id() as u8);
    match value {
        Value::Null => {}
        Value::Boolean(v) => buf.put_u8(u8::from(*v)),
        Value::Int32(v) | Value::Date(v) => buf.put_i32_le(*v),
        Value::Int64(v) | Value::Timestamp(v) => buf.put_i64_le(*v),
        Value::Float64(v) => buf.put_f64_le(*v),
        Value::Varchar(s) => {
            buf.put_u32_le(checked_u32("varchar_length", s.len())?);
            buf.put_slice(s.as_bytes());
        }
        Value::Binary(b) => {
            buf.put_u32_le(checked_u32("binary_length", b.len())?);
            buf.put_slice(b);
        }
    }
    Ok(())
}

/// Narrows a length to the 4 byte field that stores it.
pub(crate) fn checked_u32(name: &str, len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| overflow(name, len))
}

fn overflow(name: &str, len: usize) -> StrataError {
    StrataError::InvalidParameter {
        name: name.to_string(),
        value: format!("{} exceeds the encodable range", len),
    }
}

/// Decodes a batch, validating its checksum and every type tag.
pub fn decode_batch(batch_id: BatchId, data: &[u8]) -> Result<TupleBatch> {
    let id = batch_id.as_u64();
    if data.len() < BATCH_HEADER_SIZE + CHECKSUM_SIZE {
        return Err(StrataError::corrupted(id, "batch shorter than header"));
    }

    let (body, trailer) = data.split_at(data.len() - CHECKSUM_SIZE);
    let stored = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    if crc32fast::hash(body) != stored {
        return Err(StrataError::corrupted(id, "checksum mismatch"));
    }

    let mut buf = body;
    let rows = buf.get_u32_le() as usize;
    let columns = buf.get_u16_le() as usize;

    let mut batch = Vec::with_capacity(rows);
    for _ in 0..rows {
        let mut tuple = Vec::with_capacity(columns);
        for _ in 0..columns {
            tuple.push(decode_value(id, &mut buf)?);
        }
        batch.push(tuple);
    }

    if buf.has_remaining() {
        return Err(StrataError::corrupted(
            id,
            format!("{} trailing bytes", buf.remaining()),
        ));
    }
    Ok(batch)
}

fn decode_value(id: u64, buf: &mut &[u8]) -> Result<Value> {
    let tag = take(id, buf, 1)?.get_u8();
    let type_id = TypeId::from_u8(tag).map_err(|_| {
        StrataError::corrupted(id, format!("unknown type tag {}", tag))
    })?;

    let value = match type_id {
        TypeId::Null => Value::Null,
        TypeId::Boolean => Value::Boolean(take(id, buf, 1)?.get_u8() != 0),
        TypeId::Int32 => Value::Int32(take(id, buf, 4)?.get_i32_le()),
        TypeId::Date => Value::Date(take(id, buf, 4)?.get_i32_le()),
        TypeId::Int64 => Value::Int64(take(id, buf, 8)?.get_i64_le()),
        TypeId::Timestamp => Value::Timestamp(take(id, buf, 8)?.get_i64_le()),
        TypeId::Float64 => Value::Float64(take(id, buf, 8)?.get_f64_le()),
        TypeId::Varchar => {
            let len = take(id, buf, 4)?.get_u32_le() as usize;
            let bytes = take(id, buf, len)?;
            let s = std::str::from_utf8(bytes)
                .map_err(|_| StrataError::corrupted(id, "invalid UTF-8 in varchar"))?;
            Value::Varchar(s.to_string())
        }
        TypeId::Binary => {
            let len = take(id, buf, 4)?.get_u32_le() as usize;
            Value::Binary(take(id, buf, len)?.to_vec())
        }
    };
    Ok(value)
}

/// Splits `len` bytes off the front of `buf`.
fn take<'a>(id: u64, buf: &mut &'a [u8], len: usize) -> Result<&'a [u8]> {
    if buf.len() < len {
        return Err(StrataError::corrupted(id, "truncated value"));
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}
