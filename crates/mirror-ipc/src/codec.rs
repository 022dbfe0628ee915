//! Codec identities negotiated at stream start.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Video codec announced by the agent's 4-byte codec tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoCodec {
    H264,
    H265,
    Av1,
}

impl VideoCodec {
    /// Map a wire tag to a codec. Unknown tags yield `None`.
    ///
    /// AV1 is accepted as both `\0av1` (the big-endian integer the agent
    /// writes) and `av1\0`.
    pub fn from_tag(tag: [u8; 4]) -> Option<Self> {
        match &tag {
            b"h264" => Some(Self::H264),
            b"h265" => Some(Self::H265),
            b"\0av1" | b"av1\0" => Some(Self::Av1),
            _ => None,
        }
    }

    /// The wire tag for this codec.
    pub fn tag(self) -> [u8; 4] {
        match self {
            Self::H264 => *b"h264",
            Self::H265 => *b"h265",
            Self::Av1 => *b"\0av1",
        }
    }

    /// Whether the stream is a continuous Annex-B byte sequence that has to
    /// be split into access units by a bitstream parser.
    pub fn is_annex_b(self) -> bool {
        matches!(self, Self::H264 | Self::H265)
    }

    /// Display name.
    pub fn name(self) -> &'static str {
        match self {
            Self::H264 => "H.264",
            Self::H265 => "H.265",
            Self::Av1 => "AV1",
        }
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Audio codec announced by the agent's 4-byte codec tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioCodec {
    Opus,
    Aac,
    Flac,
    /// Uncompressed 16-bit little-endian PCM, 48 kHz stereo.
    Raw,
}

impl AudioCodec {
    /// Map a wire tag to a codec. Unknown tags yield `None`.
    pub fn from_tag(tag: [u8; 4]) -> Option<Self> {
        match &tag {
            b"opus" => Some(Self::Opus),
            b"\0aac" => Some(Self::Aac),
            b"flac" => Some(Self::Flac),
            b"\0raw" => Some(Self::Raw),
            _ => None,
        }
    }

    /// The wire tag for this codec.
    pub fn tag(self) -> [u8; 4] {
        match self {
            Self::Opus => *b"opus",
            Self::Aac => *b"\0aac",
            Self::Flac => *b"flac",
            Self::Raw => *b"\0raw",
        }
    }

    /// Whether packets must go through a decoder before reaching the mixer.
    pub fn needs_decoder(self) -> bool {
        !matches!(self, Self::Raw)
    }

    /// Display name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Opus => "Opus",
            Self::Aac => "AAC",
            Self::Flac => "FLAC",
            Self::Raw => "RAW",
        }
    }
}

impl fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_tags() {
        assert_eq!(VideoCodec::from_tag(*b"h264"), Some(VideoCodec::H264));
        assert_eq!(VideoCodec::from_tag(*b"h265"), Some(VideoCodec::H265));
        assert_eq!(VideoCodec::from_tag([0x00, 0x61, 0x76, 0x31]), Some(VideoCodec::Av1));
        assert_eq!(VideoCodec::from_tag(*b"vp9\0"), None);
        assert_eq!(VideoCodec::from_tag(*b"1va\0"), None);
        assert!(VideoCodec::H265.is_annex_b());
        assert!(!VideoCodec::Av1.is_annex_b());
    }

    #[test]
    fn test_av1_tag_both_orders() {
        assert_eq!(VideoCodec::from_tag(*b"av1\0"), Some(VideoCodec::Av1));
        assert_eq!(VideoCodec::from_tag(*b"\0av1"), Some(VideoCodec::Av1));
        assert_eq!(VideoCodec::from_tag(VideoCodec::Av1.tag()), Some(VideoCodec::Av1));
    }

    #[test]
    fn test_audio_tags() {
        assert_eq!(AudioCodec::from_tag([0x6F, 0x70, 0x75, 0x73]), Some(AudioCodec::Opus));
        assert_eq!(AudioCodec::from_tag([0x00, 0x61, 0x61, 0x63]), Some(AudioCodec::Aac));
        assert_eq!(AudioCodec::from_tag([0x66, 0x6C, 0x61, 0x63]), Some(AudioCodec::Flac));
        assert_eq!(AudioCodec::from_tag([0x00, 0x72, 0x61, 0x77]), Some(AudioCodec::Raw));
        assert_eq!(AudioCodec::from_tag(*b"mp3 "), None);
        assert!(!AudioCodec::Raw.needs_decoder());
    }
}
