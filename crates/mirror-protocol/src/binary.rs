//! Big-endian wire helpers shared by the control encoder and the demuxers.
//!
//! All multi-byte integers on the wire are big-endian regardless of host
//! byte order; `bytes::BufMut::put_*` and `bytes::Buf::get_*` already are,
//! so this module only adds the fixed-point mappings and the length-prefixed
//! string layouts the agent expects.

use bytes::{BufMut, BytesMut};

/// Map a pressure in `[0, 1]` to an unsigned 16-bit fixed-point value.
///
/// `round(clamp(v, 0, 1) * 65535)`. NaN maps to 0.
pub fn float_to_u16_fixed(value: f32) -> u16 {
    let clamped = f64::from(value).clamp(0.0, 1.0);
    (clamped * f64::from(u16::MAX)).round() as u16
}

/// Map a signed scroll delta to a 16.16 fixed-point value.
///
/// `floor(d * 65536)`, saturating at the `i32` bounds. NaN maps to 0.
pub fn float_to_i32_fixed(value: f32) -> i32 {
    (f64::from(value) * 65536.0).floor() as i32
}

/// Inverse of [`float_to_u16_fixed`], up to quantization.
pub fn u16_fixed_to_float(value: u16) -> f32 {
    f32::from(value) / f32::from(u16::MAX)
}

/// Inverse of [`float_to_i32_fixed`], up to quantization.
pub fn i32_fixed_to_float(value: i32) -> f32 {
    (f64::from(value) / 65536.0) as f32
}

/// Hard-truncate a string's UTF-8 bytes to `max` bytes.
///
/// The cut is byte-exact and may split a multi-byte character; the agent
/// decodes leniently.
pub fn truncate_utf8(text: &str, max: usize) -> &[u8] {
    let bytes = text.as_bytes();
    &bytes[..bytes.len().min(max)]
}

/// Write `u32` length + bytes, truncating to `max`.
pub fn put_string_u32(buf: &mut BytesMut, text: &str, max: usize) {
    let bytes = truncate_utf8(text, max);
    buf.put_u32(bytes.len() as u32);
    buf.put_slice(bytes);
}

/// Write `u8` length + bytes, truncating to `max` (at most 255).
pub fn put_string_u8(buf: &mut BytesMut, text: &str, max: usize) {
    let bytes = truncate_utf8(text, max.min(u8::MAX as usize));
    buf.put_u8(bytes.len() as u8);
    buf.put_slice(bytes);
}

/// Write `u16` length + bytes, truncating to 65535 bytes.
pub fn put_blob_u16(buf: &mut BytesMut, data: &[u8]) {
    let len = data.len().min(u16::MAX as usize);
    buf.put_u16(len as u16);
    buf.put_slice(&data[..len]);
}
