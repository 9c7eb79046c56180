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

//! Copies float samples into, and back out of, locked sound memory that may be split
//! across several spans.

const SAMPLE_BYTES: usize = std::mem::size_of::<f32>();

/// Errors while copying samples into locked spans.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpanCopyError {
    #[error("span {index} is {len} bytes, which is not a whole number of samples")]
    Misaligned { index: usize, len: usize },

    #[error("locked spans hold {capacity} samples but only {available} are available")]
    SourceTooShort { capacity: usize, available: usize },
}

/// Writes `samples` into the spans in order. Each span continues where the previous one
/// left off, so a wrapped ring buffer region receives the samples contiguously.
///
/// The spans are validated before anything is written. Returns the number of samples copied.
pub fn copy_into_spans(samples: &[f32], spans: &mut [&mut [u8]]) -> Result<usize, SpanCopyError> {
    let mut capacity = 0;
    for (index, span) in spans.iter().enumerate() {
        if span.len() % SAMPLE_BYTES != 0 {
            return Err(SpanCopyError::Misaligned {
                index,
                len: span.len(),
            });
        }
        capacity += span.len() / SAMPLE_BYTES;
    }

    if capacity > samples.len() {
        return Err(SpanCopyError::SourceTooShort {
            capacity,
            available: samples.len(),
        });
    }

    let mut offset = 0;
    for span in spans.iter_mut() {
        let count = span.len() / SAMPLE_BYTES;
        for (bytes, sample) in span
            .chunks_exact_mut(SAMPLE_BYTES)
            .zip(&samples[offset..offset + count])
        {
            bytes.copy_from_slice(&sample.to_ne_bytes());
        }
        offset += count;
    }

    Ok(offset)
}

/// Reads samples back out of spans in order. Trailing bytes that do not form a whole
/// sample are ignored.
pub fn read_from_spans<S: AsRef<[u8]>>(spans: &[S]) -> Vec<f32> {
    spans
        .iter()
        .flat_map(|span| span.as_ref().chunks_exact(SAMPLE_BYTES))
        .map(|bytes| f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        .collect()
}
