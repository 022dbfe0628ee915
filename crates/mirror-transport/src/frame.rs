//! Exact-length reads and the fixed headers shared by both demuxers.

use std::io::{self, Read};

use bytes::Buf;
use tracing::{debug, warn};

use crate::{
    TransportError, TransportResult, DEVICE_NAME_FIELD_LENGTH, FRAME_HEADER_LENGTH,
    PACKET_FLAG_CONFIG, PACKET_FLAG_KEY_FRAME, PACKET_PTS_MASK,
};

/// Fill `buf` completely or fail with `ConnectionClosed` on EOF.
pub(crate) fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> TransportResult<()> {
    reader.read_exact(buf).map_err(TransportError::from)
}

pub(crate) fn read_array<R: Read, const N: usize>(reader: &mut R) -> TransportResult<[u8; N]> {
    let mut buf = [0u8; N];
    read_exact(reader, &mut buf)?;
    Ok(buf)
}

pub(crate) fn read_u32<R: Read>(reader: &mut R) -> TransportResult<u32> {
    Ok(u32::from_be_bytes(read_array(reader)?))
}

/// Read and throw away `len` bytes.
pub(crate) fn skip<R: Read>(reader: &mut R, len: usize) -> TransportResult<()> {
    let copied = io::copy(&mut reader.by_ref().take(len as u64), &mut io::sink())?;
    if copied < len as u64 {
        return Err(TransportError::ConnectionClosed);
    }
    Ok(())
}

/// Read the device name header.
///
/// The field is NUL padded. Leading NULs are skipped and the name ends at
/// the first NUL after that.
pub fn read_device_name<R: Read>(reader: &mut R) -> TransportResult<String> {
    let raw: [u8; DEVICE_NAME_FIELD_LENGTH] = read_array(reader)?;
    let start = raw.iter().position(|&b| b != 0).unwrap_or(raw.len());
    let end = raw[start..]
        .iter()
        .position(|&b| b == 0)
        .map_or(raw.len(), |p| start + p);

    let name = String::from_utf8_lossy(&raw[start..end]).into_owned();
    debug!(device_name = %name, "Read device name");
    Ok(name)
}

/// The 12-byte header in front of every framed packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Raw 64-bit field: flags in the top two bits, timestamp below.
    pub pts_flags: u64,

    /// Payload size as sent. May be negative on a corrupt stream.
    pub size: i32,
}

impl FrameHeader {
    pub fn parse(bytes: [u8; FRAME_HEADER_LENGTH]) -> Self {
        let mut buf = &bytes[..];
        Self {
            pts_flags: buf.get_u64(),
            size: buf.get_i32(),
        }
    }

    pub fn read<R: Read>(reader: &mut R) -> TransportResult<Self> {
        Ok(Self::parse(read_array(reader)?))
    }

    pub fn is_config(&self) -> bool {
        self.pts_flags & PACKET_FLAG_CONFIG != 0
    }

    pub fn is_key_frame(&self) -> bool {
        self.pts_flags & PACKET_FLAG_KEY_FRAME != 0
    }

    /// Timestamp in microseconds. Config packets carry none.
    pub fn pts(&self) -> Option<u64> {
        if self.is_config() {
            None
        } else {
            Some(self.pts_flags & PACKET_PTS_MASK)
        }
    }

    /// Read the payload this header announces.
    ///
    /// Returns `None` for an empty or negative size, and for a size above
    /// `limit`; in the latter case the payload is consumed and discarded so
    /// the next header stays aligned.
    pub fn read_payload<R: Read>(
        &self,
        reader: &mut R,
        limit: usize,
    ) -> TransportResult<Option<Vec<u8>>> {
        if self.size <= 0 {
            if self.size < 0 {
                warn!(size = self.size, "Skipping frame with negative size");
            }
            return Ok(None);
        }

        let size = self.size as usize;
        if size > limit {
            warn!(size, limit, "Discarding oversized frame");
            skip(reader, size)?;
            return Ok(None);
        }

        let mut payload = vec![0u8; size];
        read_exact(reader, &mut payload)?;
        Ok(Some(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn name_field(name: &[u8], leading_nuls: usize) -> Vec<u8> {
        let mut field = vec![0u8; DEVICE_NAME_FIELD_LENGTH];
        field[leading_nuls..leading_nuls + name.len()].copy_from_slice(name);
        field
    }

    #[test]
    fn test_device_name_strips_nuls() {
        let mut cursor = Cursor::new(name_field(b"Pixel 7", 0));
        assert_eq!(read_device_name(&mut cursor).unwrap(), "Pixel 7");
        assert_eq!(cursor.position(), 65);

        let mut cursor = Cursor::new(name_field(b"SM-G99", 2));
        assert_eq!(read_device_name(&mut cursor).unwrap(), "SM-G99");
    }

    #[test]
    fn test_device_name_full_field() {
        let mut cursor = Cursor::new(vec![b'x'; 65]);
        assert_eq!(read_device_name(&mut cursor).unwrap().len(), 65);
    }

    #[test]
    fn test_short_read_is_connection_closed() {
        let mut cursor = Cursor::new(vec![0u8; 10]);
        assert!(matches!(
            read_device_name(&mut cursor),
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_header_flags() {
        let mut bytes = [0u8; 12];
        bytes[..8].copy_from_slice(&(PACKET_FLAG_CONFIG | 5).to_be_bytes());
        bytes[8..].copy_from_slice(&7i32.to_be_bytes());
        let header = FrameHeader::parse(bytes);
        assert!(header.is_config());
        assert!(!header.is_key_frame());
        assert_eq!(header.pts(), None);
        assert_eq!(header.size, 7);

        bytes[..8].copy_from_slice(&(PACKET_FLAG_KEY_FRAME | 1234).to_be_bytes());
        let header = FrameHeader::parse(bytes);
        assert!(header.is_key_frame());
        assert_eq!(header.pts(), Some(1234));
    }

    #[test]
    fn test_oversized_payload_is_consumed() {
        let header = FrameHeader {
            pts_flags: 0,
            size: 16,
        };
        let mut data = vec![0xAAu8; 16];
        data.extend_from_slice(&[1, 2, 3]);
        let mut cursor = Cursor::new(data);
        assert_eq!(header.read_payload(&mut cursor, 8).unwrap(), None);
        assert_eq!(cursor.position(), 16);
    }

    #[test]
    fn test_non_positive_size_consumes_nothing() {
        let mut cursor = Cursor::new(vec![1u8, 2, 3]);
        for size in [0, -1] {
            let header = FrameHeader { pts_flags: 0, size };
            assert_eq!(header.read_payload(&mut cursor, 8).unwrap(), None);
        }
        assert_eq!(cursor.position(), 0);
    }
}
