//! Length-encoded and fixed-width integer primitives.
//!
//! Readers operate on a `&mut &[u8]` cursor and never panic on short input.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

/// Marker byte for a NULL column value inside a text row
pub const NULL_MARKER: u8 = 0xFB;

const MARKER_U16: u8 = 0xFC;
const MARKER_U24: u8 = 0xFD;
const MARKER_U64: u8 = 0xFE;
const MARKER_INVALID: u8 = 0xFF;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("unexpected end of packet: needed {needed} bytes, {remaining} left")]
    Truncated { needed: usize, remaining: usize },

    #[error("malformed length-encoded integer (marker 0x{0:02X})")]
    InvalidMarker(u8),

    #[error("missing NUL terminator")]
    Unterminated,

    #[error("fixed-width integer must be 1..=8 bytes, got {0}")]
    InvalidWidth(usize),
}

/// Number of bytes `put_lenenc_int` writes for `value`
#[cfg(test)]
pub fn lenenc_int_len(value: u64) -> usize {
    if value < 251 {
        1
    } else if value < 1 << 16 {
        3
    } else if value < 1 << 24 {
        4
    } else {
        9
    }
}

pub fn put_lenenc_int(buf: &mut BytesMut, value: u64) {
    if value < 251 {
        buf.put_u8(value as u8);
    } else if value < 1 << 16 {
        buf.put_u8(MARKER_U16);
        buf.put_u16_le(value as u16);
    } else if value < 1 << 24 {
        buf.put_u8(MARKER_U24);
        buf.put_uint_le(value, 3);
    } else {
        buf.put_u8(MARKER_U64);
        buf.put_u64_le(value);
    }
}

pub fn put_lenenc_bytes(buf: &mut BytesMut, value: &[u8]) {
    put_lenenc_int(buf, value.len() as u64);
    buf.extend_from_slice(value);
}

pub fn put_lenenc_str(buf: &mut BytesMut, value: &str) {
    put_lenenc_bytes(buf, value.as_bytes());
}

pub fn put_null_terminated(buf: &mut BytesMut, value: &str) {
    buf.extend_from_slice(value.as_bytes());
    buf.put_u8(0);
}

/// Write the low `width` bytes of `value` little-endian
#[cfg(test)]
pub fn put_fixed_int(buf: &mut BytesMut, value: u64, width: usize) -> Result<(), CodecError> {
    if !(1..=8).contains(&width) {
        return Err(CodecError::InvalidWidth(width));
    }
    buf.put_uint_le(value, width);
    Ok(())
}

fn ensure(src: &[u8], needed: usize) -> Result<(), CodecError> {
    if src.remaining() < needed {
        return Err(CodecError::Truncated {
            needed,
            remaining: src.remaining(),
        });
    }
    Ok(())
}

pub fn get_fixed_int(src: &mut &[u8], width: usize) -> Result<u64, CodecError> {
    if !(1..=8).contains(&width) {
        return Err(CodecError::InvalidWidth(width));
    }
    ensure(src, width)?;
    Ok(src.get_uint_le(width))
}

pub fn get_u8(src: &mut &[u8]) -> Result<u8, CodecError> {
    ensure(src, 1)?;
    Ok(src.get_u8())
}

#[cfg(test)]
pub fn get_u16(src: &mut &[u8]) -> Result<u16, CodecError> {
    ensure(src, 2)?;
    Ok(src.get_u16_le())
}

pub fn get_u32(src: &mut &[u8]) -> Result<u32, CodecError> {
    ensure(src, 4)?;
    Ok(src.get_u32_le())
}

pub fn get_lenenc_int(src: &mut &[u8]) -> Result<u64, CodecError> {
    let marker = get_u8(src)?;
    match marker {
        0..=0xFA => Ok(marker as u64),
        MARKER_U16 => get_fixed_int(src, 2),
        MARKER_U24 => get_fixed_int(src, 3),
        MARKER_U64 => get_fixed_int(src, 8),
        NULL_MARKER | MARKER_INVALID => Err(CodecError::InvalidMarker(marker)),
    }
}

pub fn get_bytes<'a>(src: &mut &'a [u8], len: usize) -> Result<&'a [u8], CodecError> {
    ensure(src, len)?;
    let (head, tail) = src.split_at(len);
    *src = tail;
    Ok(head)
}

pub fn get_lenenc_bytes<'a>(src: &mut &'a [u8]) -> Result<&'a [u8], CodecError> {
    let len = get_lenenc_int(src)?;
    let len = usize::try_from(len).map_err(|_| CodecError::Truncated {
        needed: usize::MAX,
        remaining: src.len(),
    })?;
    get_bytes(src, len)
}

pub fn get_null_terminated<'a>(src: &mut &'a [u8]) -> Result<&'a [u8], CodecError> {
    let pos = src
        .iter()
        .position(|&b| b == 0)
        .ok_or(CodecError::Unterminated)?;
    let value = &src[..pos];
    *src = &src[pos + 1..];
    Ok(value)
}

/// Read a NUL-terminated string, or the rest of the buffer when the terminator is absent
pub fn get_null_terminated_lossy(src: &mut &[u8]) -> String {
    let pos = src.iter().position(|&b| b == 0).unwrap_or(src.len());
    let value = String::from_utf8_lossy(&src[..pos]).into_owned();
    *src = &src[(pos + 1).min(src.len())..];
    value
}
