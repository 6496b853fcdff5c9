//! Float to linear PCM encoders

use crate::error::CodecError;

/// Full-scale value for 16-bit samples
pub const L16_SCALE: f32 = 32767.0;

/// Full-scale value for 24-bit samples (2^23 - 1)
pub const L24_SCALE: f32 = 8_388_607.0;

/// Encode samples as 16-bit big-endian PCM.
///
/// Samples are clamped to [-1.0, 1.0]. Returns the number of bytes written.
pub fn encode_l16(samples: &[f32], out: &mut [u8]) -> Result<usize, CodecError> {
    let needed = samples.len() * 2;
    if out.len() < needed {
        return Err(CodecError::BufferTooSmall {
            needed,
            available: out.len(),
        });
    }

    for (sample, bytes) in samples.iter().zip(out.chunks_exact_mut(2)) {
        let value = (sample.clamp(-1.0, 1.0) * L16_SCALE).round() as i16;
        bytes.copy_from_slice(&value.to_be_bytes());
    }

    Ok(needed)
}

/// Encode samples as 24-bit big-endian PCM, three bytes per sample.
///
/// Samples are clamped to [-1.0, 1.0]. Returns the number of bytes written.
pub fn encode_l24(samples: &[f32], out: &mut [u8]) -> Result<usize, CodecError> {
    let needed = samples.len() * 3;
    if out.len() < needed {
        return Err(CodecError::BufferTooSmall {
            needed,
            available: out.len(),
        });
    }

    for (sample, bytes) in samples.iter().zip(out.chunks_exact_mut(3)) {
        let value = (sample.clamp(-1.0, 1.0) * L24_SCALE).round() as i32;
        let be = value.to_be_bytes();
        bytes.copy_from_slice(&be[1..4]);
    }

    Ok(needed)
}
