use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ProxyError, Result};

/// Decode a length-encoded integer, returning the value and the number of
/// bytes consumed.
pub fn read_lenenc_int(src: &[u8]) -> Result<(u64, usize)> {
    let first = *src.first().ok_or_else(|| ProxyError::Protocol("truncated lenenc int".into()))?;
    match first {
        0xFB => Ok((0, 1)), // NULL sentinel, callers that care check the byte themselves
        0xFC => {
            let bytes = src.get(1..3).ok_or_else(|| ProxyError::Protocol("truncated lenenc int (u16)".into()))?;
            Ok((u16::from_le_bytes([bytes[0], bytes[1]]) as u64, 3))
        }
        0xFD => {
            let bytes = src.get(1..4).ok_or_else(|| ProxyError::Protocol("truncated lenenc int (u24)".into()))?;
            Ok((u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]) as u64, 4))
        }
        0xFE => {
            let bytes = src.get(1..9).ok_or_else(|| ProxyError::Protocol("truncated lenenc int (u64)".into()))?;
            let mut arr = [0u8; 8];
            arr.copy_from_slice(bytes);
            Ok((u64::from_le_bytes(arr), 9))
        }
        n => Ok((n as u64, 1)),
    }
}

pub fn write_lenenc_int(dst: &mut BytesMut, value: u64) {
    if value < 251 {
        dst.put_u8(value as u8);
    } else if value < (1 << 16) {
        dst.put_u8(0xFC);
        dst.put_u16_le(value as u16);
    } else if value < (1 << 24) {
        dst.put_u8(0xFD);
        dst.put_uint_le(value, 3);
    } else {
        dst.put_u8(0xFE);
        dst.put_u64_le(value);
    }
}

/// Decode a length-encoded string, returning the string bytes and total
/// bytes consumed (length prefix plus payload).
pub fn read_lenenc_str(src: &[u8]) -> Result<(Bytes, usize)> {
    let (len, prefix_len) = read_lenenc_int(src)?;
    let len = len as usize;
    let end = prefix_len + len;
    let bytes = src.get(prefix_len..end).ok_or_else(|| ProxyError::Protocol("truncated lenenc string".into()))?;
    Ok((Bytes::copy_from_slice(bytes), end))
}

pub fn write_lenenc_str(dst: &mut BytesMut, value: &[u8]) {
    write_lenenc_int(dst, value.len() as u64);
    dst.put_slice(value);
}

/// Read a NUL-terminated string, returning the string bytes (excluding the
/// NUL) and total bytes consumed (including the NUL).
pub fn read_null_str(src: &[u8]) -> Result<(Bytes, usize)> {
    let nul = src.iter().position(|&b| b == 0).ok_or_else(|| ProxyError::Protocol("missing NUL terminator".into()))?;
    Ok((Bytes::copy_from_slice(&src[..nul]), nul + 1))
}

pub fn write_null_str(dst: &mut BytesMut, value: &[u8]) {
    dst.put_slice(value);
    dst.put_u8(0);
}

pub fn write_fixed_str(dst: &mut BytesMut, value: &str, len: usize) {
    let mut bytes = value.as_bytes().to_vec();
    bytes.resize(len, 0);
    dst.put_slice(&bytes);
}

pub fn read_u24_le(src: &[u8]) -> Result<u32> {
    let b = src.get(..3).ok_or_else(|| ProxyError::Protocol("truncated u24".into()))?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], 0]))
}
