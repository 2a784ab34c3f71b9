//! Mono 16-bit PCM WAV container codec.
//!
//! Containers use the classic 44-byte header: RIFF chunk, `fmt ` chunk
//! (PCM, 1 channel, 16 bits), `data` chunk.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Header size in bytes.
pub const HEADER_SIZE: usize = 44;

/// Error type for container operations.
#[derive(Debug, thiserror::Error)]
pub enum WavError {
    /// Insufficient data to decode.
    #[error("Insufficient data")]
    InsufficientData,

    /// Not a RIFF/WAVE container or chunk layout mismatch.
    #[error("Invalid container: {0}")]
    InvalidFormat(String),

    /// The container decodes but is not mono 16-bit PCM.
    #[error("Unsupported format: {0}")]
    Unsupported(String),
}

/// Encode mono 16-bit samples into a WAV container.
#[must_use]
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Bytes {
    let data_len = samples.len() * 2;
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + data_len);

    // RIFF chunk
    buf.put_slice(b"RIFF");
    buf.put_u32_le(36 + data_len as u32);
    buf.put_slice(b"WAVE");

    // fmt chunk: PCM, mono, 16-bit
    buf.put_slice(b"fmt ");
    buf.put_u32_le(16);
    buf.put_u16_le(1);
    buf.put_u16_le(1);
    buf.put_u32_le(sample_rate);
    buf.put_u32_le(sample_rate * 2);
    buf.put_u16_le(2);
    buf.put_u16_le(16);

    // data chunk
    buf.put_slice(b"data");
    buf.put_u32_le(data_len as u32);
    for sample in samples {
        buf.put_i16_le(*sample);
    }

    buf.freeze()
}

/// Decode a WAV container produced by [`encode_wav`].
///
/// # Errors
///
/// Returns an error for truncated data, non-WAV input, or any format
/// other than mono 16-bit PCM.
pub fn decode_wav(data: &mut impl Buf) -> Result<(u32, Vec<i16>), WavError> {
    if data.remaining() < HEADER_SIZE {
        return Err(WavError::InsufficientData);
    }

    let mut tag = [0u8; 4];
    data.copy_to_slice(&mut tag);
    if &tag != b"RIFF" {
        return Err(WavError::InvalidFormat("missing RIFF tag".to_string()));
    }
    let _riff_len = data.get_u32_le();
    data.copy_to_slice(&mut tag);
    if &tag != b"WAVE" {
        return Err(WavError::InvalidFormat("missing WAVE tag".to_string()));
    }

    data.copy_to_slice(&mut tag);
    if &tag != b"fmt " {
        return Err(WavError::InvalidFormat("missing fmt chunk".to_string()));
    }
    let fmt_len = data.get_u32_le();
    if fmt_len != 16 {
        return Err(WavError::InvalidFormat(format!(
            "unexpected fmt chunk length: {fmt_len}"
        )));
    }
    let audio_format = data.get_u16_le();
    if audio_format != 1 {
        return Err(WavError::Unsupported(format!(
            "audio format {audio_format}, expected PCM"
        )));
    }
    let channels = data.get_u16_le();
    if channels != 1 {
        return Err(WavError::Unsupported(format!(
            "{channels} channels, expected mono"
        )));
    }
    let sample_rate = data.get_u32_le();
    let _byte_rate = data.get_u32_le();
    let _block_align = data.get_u16_le();
    let bits_per_sample = data.get_u16_le();
    if bits_per_sample != 16 {
        return Err(WavError::Unsupported(format!(
            "{bits_per_sample} bits per sample, expected 16"
        )));
    }

    data.copy_to_slice(&mut tag);
    if &tag != b"data" {
        return Err(WavError::InvalidFormat("missing data chunk".to_string()));
    }
    let data_len = data.get_u32_le() as usize;
    if data.remaining() < data_len {
        return Err(WavError::InsufficientData);
    }

    let mut samples = Vec::with_capacity(data_len / 2);
    for _ in 0..data_len / 2 {
        samples.push(data.get_i16_le());
    }
    Ok((sample_rate, samples))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let samples: Vec<i16> = vec![0, 100, -100, i16::MAX, i16::MIN, 42];
        let container = encode_wav(&samples, 48_000);
        assert_eq!(container.len(), HEADER_SIZE + samples.len() * 2);

        let (sample_rate, decoded) = decode_wav(&mut container.clone()).unwrap();
        assert_eq!(sample_rate, 48_000);
        assert_eq!(decoded, samples);
    }

    #[test]
    fn test_header_layout() {
        let container = encode_wav(&[0i16; 8], 16_000);
        assert_eq!(&container[0..4], b"RIFF");
        assert_eq!(&container[8..12], b"WAVE");
        assert_eq!(&container[12..16], b"fmt ");
        assert_eq!(&container[36..40], b"data");
        // Mono, 16-bit, PCM
        assert_eq!(container[20], 1);
        assert_eq!(container[22], 1);
        assert_eq!(container[34], 16);
    }

    #[test]
    fn test_empty_sample_buffer() {
        let container = encode_wav(&[], 8_000);
        assert_eq!(container.len(), HEADER_SIZE);
        let (sample_rate, samples) = decode_wav(&mut container.clone()).unwrap();
        assert_eq!(sample_rate, 8_000);
        assert!(samples.is_empty());
    }

    #[test]
    fn test_decode_rejects_junk() {
        let mut junk = Bytes::from_static(b"not a wav container at all, sorry......................");
        assert!(matches!(
            decode_wav(&mut junk),
            Err(WavError::InvalidFormat(_))
        ));

        let mut short = Bytes::from_static(b"RIFF");
        assert!(matches!(
            decode_wav(&mut short),
            Err(WavError::InsufficientData)
        ));
    }

    #[test]
    fn test_decode_rejects_truncated_data_chunk() {
        let container = encode_wav(&[1i16; 100], 48_000);
        let mut truncated = container.slice(0..HEADER_SIZE + 10);
        assert!(matches!(
            decode_wav(&mut truncated),
            Err(WavError::InsufficientData)
        ));
    }
}
