//! Linear PCM to float decoders

use crate::error::CodecError;

/// Divisor for 16-bit samples
pub const L16_DIVISOR: f32 = 32768.0;

/// Divisor for 24-bit samples (2^23)
pub const L24_DIVISOR: f32 = 8_388_608.0;

/// Decode 16-bit big-endian PCM into `out`.
///
/// Returns the number of samples written.
pub fn decode_l16(payload: &[u8], out: &mut [f32]) -> Result<usize, CodecError> {
    let count = checked_sample_count(payload, 2, out.len())?;

    for (bytes, sample) in payload.chunks_exact(2).zip(out.iter_mut()) {
        let value = i16::from_be_bytes([bytes[0], bytes[1]]);
        *sample = value as f32 / L16_DIVISOR;
    }

    Ok(count)
}

/// Decode 24-bit big-endian PCM into `out`, sign-extending each sample.
///
/// Returns the number of samples written.
pub fn decode_l24(payload: &[u8], out: &mut [f32]) -> Result<usize, CodecError> {
    let count = checked_sample_count(payload, 3, out.len())?;

    for (bytes, sample) in payload.chunks_exact(3).zip(out.iter_mut()) {
        // Place the 24 bits at the top of an i32, then shift back arithmetically
        let value = i32::from_be_bytes([bytes[0], bytes[1], bytes[2], 0]) >> 8;
        *sample = value as f32 / L24_DIVISOR;
    }

    Ok(count)
}

fn checked_sample_count(
    payload: &[u8],
    sample_size: usize,
    available: usize,
) -> Result<usize, CodecError> {
    if payload.len() % sample_size != 0 {
        return Err(CodecError::UnalignedPayload {
            len: payload.len(),
            sample_size,
        });
    }

    let count = payload.len() / sample_size;
    if count > available {
        return Err(CodecError::BufferTooSmall {
            needed: count,
            available,
        });
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l16_known_values() {
        let mut out = [0.0f32; 3];
        let n = decode_l16(&[0x80, 0x00, 0x40, 0x00, 0xFF, 0xFF], &mut out).unwrap();
        assert_eq!(n, 3);
        assert_eq!(out, [-1.0, 0.5, -1.0 / 32768.0]);
    }

    #[test]
    fn test_l24_sign_extension() {
        let mut out = [0.0f32; 3];
        decode_l24(
            &[0x80, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0x40, 0x00, 0x00],
            &mut out,
        )
        .unwrap();
        assert_eq!(out[0], -1.0);
        assert_eq!(out[1], -1.0 / 8_388_608.0);
        assert_eq!(out[2], 0.5);
    }

    #[test]
    fn test_unaligned_payload() {
        let mut out = [0.0f32; 4];
        assert_eq!(
            decode_l24(&[0, 0, 0, 0], &mut out),
            Err(CodecError::UnalignedPayload {
                len: 4,
                sample_size: 3
            })
        );
        assert!(decode_l16(&[0, 0, 0], &mut out).is_err());
    }

    #[test]
    fn test_output_too_small() {
        let mut out = [0.0f32; 1];
        assert!(matches!(
            decode_l16(&[0, 1, 0, 2], &mut out),
            Err(CodecError::BufferTooSmall { needed: 2, .. })
        ));
    }
}
