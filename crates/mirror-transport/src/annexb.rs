//! Incremental access-unit splitting for Annex-B H.264 and H.265 streams.
//!
//! Annex B uses start codes (0x000001 or 0x00000001) to separate NAL units.
//! The video socket delivers them as one continuous byte sequence with no
//! framing of its own, so receive boundaries are arbitrary: a single chunk
//! may hold many units or a fraction of one.
//!
//! NAL units are collected until the first one that belongs to the next
//! access unit is seen. That is any parameter set, delimiter or SEI after a
//! picture has started, or a slice that carries the "first slice of the
//! picture" flag. Output depends only on the cumulative bytes pushed, never
//! on how they were chunked.

use bytes::{Bytes, BytesMut};
use tracing::{trace, warn};

use mirror_codec::AccessUnit;
use mirror_ipc::VideoCodec;

/// Bytes kept back after a scan so a start code split across pushes is found.
const START_CODE_OVERLAP: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Syntax {
    H264,
    H265,
}

/// What the splitter needs to know about one NAL unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NalInfo {
    /// Coded slice data.
    vcl: bool,
    /// First slice of a new picture.
    first_slice: bool,
    /// Must open a new access unit when a picture is already pending.
    starts_unit: bool,
    /// Random access point.
    key_frame: bool,
}

impl Syntax {
    fn classify(self, payload: &[u8]) -> NalInfo {
        match self {
            Self::H264 => {
                let nal_type = payload.first().map_or(0, |b| b & 0x1F);
                let vcl = (1..=5).contains(&nal_type);
                // first_mb_in_slice is ue(v); a leading 1 bit means zero.
                let first_slice = vcl && payload.get(1).is_some_and(|b| b & 0x80 != 0);
                NalInfo {
                    vcl,
                    first_slice,
                    starts_unit: matches!(nal_type, 6..=9 | 14..=18),
                    key_frame: nal_type == 5,
                }
            }
            Self::H265 => {
                let nal_type = payload.first().map_or(0, |b| (b >> 1) & 0x3F);
                let vcl = nal_type < 32;
                let first_slice = vcl && payload.get(2).is_some_and(|b| b & 0x80 != 0);
                NalInfo {
                    vcl,
                    first_slice,
                    starts_unit: matches!(nal_type, 32..=35 | 39 | 41..=44 | 48..=55),
                    key_frame: (16..=21).contains(&nal_type),
                }
            }
        }
    }
}

/// Find the next start code at or after `from`.
///
/// Returns its position and length. A zero byte directly in front of a
/// three-byte code is folded in as a four-byte code, as long as it lies at
/// or after `floor`.
fn find_start_code(data: &[u8], from: usize, floor: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 2 < data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            if i > floor && data[i - 1] == 0 {
                return Some((i - 1, 4));
            }
            return Some((i, 3));
        }
        i += 1;
    }
    None
}

/// Carves a continuous Annex-B byte stream into access units.
#[derive(Debug)]
pub struct AnnexBSplitter {
    syntax: Syntax,
    /// Unconsumed input. Starts with the start code of the NAL in progress.
    pending: BytesMut,
    /// Offset of the NAL payload in `pending`, once a start code was seen.
    payload_start: Option<usize>,
    /// Where the next start code scan resumes.
    scan_pos: usize,
    unit: BytesMut,
    unit_has_vcl: bool,
    unit_key_frame: bool,
    discarded: u64,
}

impl AnnexBSplitter {
    /// Create a splitter for an Annex-B codec. Returns `None` for AV1.
    pub fn new(codec: VideoCodec) -> Option<Self> {
        let syntax = match codec {
            VideoCodec::H264 => Syntax::H264,
            VideoCodec::H265 => Syntax::H265,
            VideoCodec::Av1 => return None,
        };
        Some(Self {
            syntax,
            pending: BytesMut::new(),
            payload_start: None,
            scan_pos: 0,
            unit: BytesMut::new(),
            unit_has_vcl: false,
            unit_key_frame: false,
            discarded: 0,
        })
    }

    /// Feed the next chunk of the stream, returning every access unit it completed.
    pub fn push(&mut self, data: &[u8]) -> Vec<AccessUnit> {
        self.pending.extend_from_slice(data);
        let mut out = Vec::new();

        loop {
            match self.payload_start {
                None => match find_start_code(&self.pending, self.scan_pos, 0) {
                    Some((pos, len)) => {
                        if pos > 0 {
                            warn!(bytes = pos, "Discarding bytes before first start code");
                            self.discarded += pos as u64;
                            let _ = self.pending.split_to(pos);
                        }
                        self.payload_start = Some(len);
                        self.scan_pos = len;
                    }
                    None => {
                        // Keep only what could still be the beginning of a start code.
                        let keep = self.pending.len().min(START_CODE_OVERLAP);
                        let drop = self.pending.len() - keep;
                        if drop > 0 {
                            self.discarded += drop as u64;
                            let _ = self.pending.split_to(drop);
                        }
                        self.scan_pos = 0;
                        break;
                    }
                },
                Some(payload_start) => {
                    let from = self.scan_pos.max(payload_start);
                    match find_start_code(&self.pending, from, payload_start) {
                        Some((pos, len)) => {
                            let nal = self.pending.split_to(pos).freeze();
                            self.accept_nal(nal, payload_start, &mut out);
                            self.payload_start = Some(len);
                            self.scan_pos = len;
                        }
                        None => {
                            self.scan_pos = self
                                .pending
                                .len()
                                .saturating_sub(START_CODE_OVERLAP)
                                .max(payload_start);
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    /// End of stream: emit whatever is still buffered.
    pub fn flush(&mut self) -> Vec<AccessUnit> {
        let mut out = Vec::new();
        if let Some(payload_start) = self.payload_start.take() {
            let nal = self.pending.split().freeze();
            self.accept_nal(nal, payload_start, &mut out);
        }
        self.pending.clear();
        self.scan_pos = 0;
        out.extend(self.take_unit());
        out
    }

    /// Bytes thrown away because they preceded any start code.
    pub fn discarded_bytes(&self) -> u64 {
        self.discarded
    }

    fn accept_nal(&mut self, nal: Bytes, payload_start: usize, out: &mut Vec<AccessUnit>) {
        let info = self.syntax.classify(&nal[payload_start.min(nal.len())..]);

        if self.unit_has_vcl && (info.starts_unit || info.first_slice) {
            if let Some(unit) = self.take_unit() {
                out.push(unit);
            }
        }

        trace!(size = nal.len(), vcl = info.vcl, "NAL unit");
        self.unit.extend_from_slice(&nal);
        if info.vcl {
            self.unit_has_vcl = true;
            self.unit_key_frame |= info.key_frame;
        }
    }

    fn take_unit(&mut self) -> Option<AccessUnit> {
        if self.unit.is_empty() {
            return None;
        }
        let key_frame = self.unit_key_frame;
        self.unit_has_vcl = false;
        self.unit_key_frame = false;
        Some(AccessUnit {
            data: self.unit.split().freeze(),
            pts: None,
            key_frame,
        })
    }
}
