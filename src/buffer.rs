// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::{f32::consts::PI, fmt, sync::Arc, time::Duration};

/// Sample format enumeration for sound data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// 16-bit signed integer PCM.
    Pcm16,
    /// 32-bit floating point PCM.
    PcmFloat,
}

impl SampleFormat {
    /// Size of a single sample in bytes.
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::PcmFloat => std::mem::size_of::<f32>(),
            SampleFormat::Pcm16 => std::mem::size_of::<i16>(),
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleFormat::PcmFloat => write!(f, "pcmfloat"),
            SampleFormat::Pcm16 => write!(f, "pcm16"),
        }
    }
}

/// Errors for malformed sample buffers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BufferError {
    #[error("buffer {name} declares {expected} samples but holds {actual}")]
    LengthMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("buffer {0} has no channels")]
    NoChannels(String),

    #[error("buffer {0} has a sample rate of zero")]
    ZeroSampleRate(String),

    #[error("buffer {name} is too large ({sample_count} samples x {channel_count} channels)")]
    TooLarge {
        name: String,
        sample_count: usize,
        channel_count: u16,
    },
}

/// One playback request's PCM payload. The samples are interleaved 32-bit floats and
/// are never mutated once the buffer exists, so clones share them freely.
#[derive(Clone)]
pub struct AudioSampleBuffer {
    name: String,
    /// Samples per channel.
    sample_count: usize,
    channel_count: u16,
    sample_rate: u32,
    samples: Arc<[f32]>,
}

impl AudioSampleBuffer {
    /// Creates a buffer, checking that `sample_count * channel_count` matches the
    /// number of interleaved samples supplied.
    pub fn new(
        name: &str,
        sample_count: usize,
        channel_count: u16,
        sample_rate: u32,
        samples: Vec<f32>,
    ) -> Result<AudioSampleBuffer, BufferError> {
        if channel_count == 0 {
            return Err(BufferError::NoChannels(name.to_string()));
        }
        if sample_rate == 0 {
            return Err(BufferError::ZeroSampleRate(name.to_string()));
        }

        let expected = interleaved_len(name, sample_count, channel_count)?;
        if expected != samples.len() {
            return Err(BufferError::LengthMismatch {
                name: name.to_string(),
                expected,
                actual: samples.len(),
            });
        }

        Ok(AudioSampleBuffer {
            name: name.to_string(),
            sample_count,
            channel_count,
            sample_rate,
            samples: samples.into(),
        })
    }

    /// Creates a buffer from interleaved samples, deriving the per-channel sample count.
    pub fn from_interleaved(
        name: &str,
        channel_count: u16,
        sample_rate: u32,
        samples: Vec<f32>,
    ) -> Result<AudioSampleBuffer, BufferError> {
        let sample_count = match channel_count {
            0 => 0,
            channels => samples.len() / channels as usize,
        };
        Self::new(name, sample_count, channel_count, sample_rate, samples)
    }

    /// Generates a sine tone with the same signal on every channel.
    pub fn sine(
        name: &str,
        frequency: f32,
        amplitude: f32,
        duration: Duration,
        channel_count: u16,
        sample_rate: u32,
    ) -> Result<AudioSampleBuffer, BufferError> {
        let sample_count = (duration.as_secs_f64() * sample_rate as f64) as usize;
        let total = interleaved_len(name, sample_count, channel_count)?;
        let mut samples = Vec::with_capacity(total);
        for i in 0..sample_count {
            let t = i as f32 / sample_rate as f32;
            let value = amplitude * (2.0 * PI * frequency * t).sin();
            samples.extend(std::iter::repeat(value).take(channel_count as usize));
        }
        Self::new(name, sample_count, channel_count, sample_rate, samples)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn channel_count(&self) -> u16 {
        self.channel_count
    }

    /// Always [`SampleFormat::PcmFloat`].
    pub fn format(&self) -> SampleFormat {
        SampleFormat::PcmFloat
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// The interleaved samples.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Size of the sample data in bytes.
    pub fn byte_len(&self) -> usize {
        self.sample_count * self.channel_count as usize * self.format().bytes_per_sample()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.sample_count as f64 / self.sample_rate as f64)
    }
}

/// Total interleaved samples for a layout, if it fits in memory at all.
fn interleaved_len(
    name: &str,
    sample_count: usize,
    channel_count: u16,
) -> Result<usize, BufferError> {
    sample_count
        .checked_mul(channel_count as usize)
        .ok_or_else(|| BufferError::TooLarge {
            name: name.to_string(),
            sample_count,
            channel_count,
        })
}

impl fmt::Debug for AudioSampleBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioSampleBuffer")
            .field("name", &self.name)
            .field("sample_count", &self.sample_count)
            .field("channel_count", &self.channel_count)
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}
