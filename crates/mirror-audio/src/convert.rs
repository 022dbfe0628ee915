//! Sample rate and channel conversion into the mixer's output format.

use crate::{AudioError, AudioResult, CHANNELS, SAMPLE_RATE};

/// Converts interleaved 16-bit PCM of any rate and channel count into
/// 48 kHz stereo.
///
/// Mono is duplicated to both channels; for more than two channels only the
/// first two are kept. Resampling is linear and carries its position and
/// the last input frame across calls, so feeding a stream in pieces gives
/// the same output as feeding it whole.
#[derive(Debug, Clone)]
pub struct FormatConverter {
    sample_rate: u32,
    channels: u16,
    step: f64,
    position: f64,
    previous: Option<[f32; 2]>,
}

impl FormatConverter {
    pub fn new(sample_rate: u32, channels: u16) -> AudioResult<Self> {
        if sample_rate == 0 || channels == 0 {
            return Err(AudioError::InvalidFormat {
                sample_rate,
                channels,
            });
        }
        Ok(Self {
            sample_rate,
            channels,
            step: sample_rate as f64 / SAMPLE_RATE as f64,
            position: 0.0,
            previous: None,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Whether input is already in the output format.
    pub fn is_passthrough(&self) -> bool {
        self.sample_rate == SAMPLE_RATE && self.channels == CHANNELS
    }

    /// Convert `input` and append the result to `out`.
    ///
    /// A trailing partial frame is dropped.
    pub fn process(&mut self, input: &[i16], out: &mut impl Extend<i16>) {
        if self.is_passthrough() {
            let whole = input.len() - input.len() % 2;
            out.extend(input[..whole].iter().copied());
            return;
        }

        let frames: Vec<[f32; 2]> = input
            .chunks_exact(self.channels as usize)
            .map(|frame| {
                let left = frame[0] as f32;
                let right = if frame.len() > 1 { frame[1] as f32 } else { left };
                [left, right]
            })
            .collect();
        if frames.is_empty() {
            return;
        }

        if self.sample_rate == SAMPLE_RATE {
            out.extend(frames.iter().flat_map(|f| [to_i16(f[0]), to_i16(f[1])]));
            return;
        }

        // Index 0 is the frame carried over from the previous call, if any.
        let offset = usize::from(self.previous.is_some());
        let len = frames.len() + offset;
        let previous = self.previous;
        let frame_at = |i: usize| -> [f32; 2] {
            match previous {
                Some(prev) if i == 0 => prev,
                _ => frames[i - offset],
            }
        };

        let mut position = self.position;
        while (position as usize) + 1 < len {
            let index = position as usize;
            let t = (position - index as f64) as f32;
            let a = frame_at(index);
            let b = frame_at(index + 1);
            out.extend([
                to_i16(a[0] + (b[0] - a[0]) * t),
                to_i16(a[1] + (b[1] - a[1]) * t),
            ]);
            position += self.step;
        }

        self.position = position - (len - 1) as f64;
        self.previous = frames.last().copied();
    }

    /// Forget carried state, e.g. after the source was flushed.
    pub fn reset(&mut self) {
        self.position = 0.0;
        self.previous = None;
    }
}

/// Round a sample already in i16 scale and saturate it to the i16 range.
pub(crate) fn to_i16(sample: f32) -> i16 {
    sample.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}
