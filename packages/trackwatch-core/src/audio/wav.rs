//! WAV header synthesis and the header-repair validation contract.
//!
//! Ported from the teacher's `create_wav_header` helper and extended with
//! the validate-or-repair contract every [`crate::recognizer::Recognizer`]
//! depends on before submitting audio upstream.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Sample rates the store/recognizer wire format accepts.
const SUPPORTED_SAMPLE_RATES: [u32; 6] = [8000, 16000, 22050, 32000, 44100, 48000];

/// For an effectively infinite/unknown-length stream, RIFF/data sizes are
/// written as the maximum representable value rather than a real byte count.
const WAV_STREAM_SIZE_MAX: u32 = u32::MAX;

/// Describes the PCM layout of a WAV payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl WavFormat {
    pub fn bytes_per_sample(&self) -> u16 {
        self.bits_per_sample / 8
    }

    pub fn block_align(&self) -> u16 {
        self.channels * self.bytes_per_sample()
    }

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * self.channels as u32 * self.bytes_per_sample() as u32
    }
}

/// Reasons a WAV payload was rejected by the header-repair contract.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WavValidationError {
    #[error("payload too short to contain a WAV header or be header-repaired")]
    TooShort,
    #[error("RIFF/WAVE magic bytes missing")]
    BadMagic,
    #[error("unsupported PCM format tag {0}, expected 1")]
    UnsupportedFormatTag(u16),
    #[error("unsupported channel count {0}, expected 1 or 2")]
    UnsupportedChannels(u16),
    #[error("unsupported sample rate {0}")]
    UnsupportedSampleRate(u32),
    #[error("unsupported bit depth {0}, expected 16")]
    UnsupportedBitDepth(u16),
    #[error("payload is not even-byte-aligned, cannot synthesize a header")]
    NotEvenAligned,
}

/// Generates a standard 44-byte WAVE header for an effectively infinite
/// 16-bit PCM stream.
pub fn create_wav_header(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Bytes {
    let bits_per_sample = match bits_per_sample {
        16 | 24 => bits_per_sample,
        other => {
            tracing::warn!(bits_per_sample = other, "invalid bits_per_sample, defaulting to 16");
            16
        }
    };

    let format = WavFormat {
        sample_rate,
        channels,
        bits_per_sample,
    };

    let mut header = BytesMut::with_capacity(44);

    header.put_slice(b"RIFF");
    header.put_u32_le(WAV_STREAM_SIZE_MAX);
    header.put_slice(b"WAVE");

    header.put_slice(b"fmt ");
    header.put_u32_le(16);
    header.put_u16_le(1); // PCM
    header.put_u16_le(format.channels);
    header.put_u32_le(format.sample_rate);
    header.put_u32_le(format.byte_rate());
    header.put_u16_le(format.block_align());
    header.put_u16_le(format.bits_per_sample);

    header.put_slice(b"data");
    header.put_u32_le(WAV_STREAM_SIZE_MAX);

    header.freeze()
}

/// Validates a WAV payload's header, or synthesizes one from `expected`
/// when the payload is bare PCM. Returns the complete, valid WAV bytes
/// ready for submission to a recognizer, or a typed validation error.
///
/// Implements the header-repair contract: a valid RIFF/WAVE header is
/// passed through unchanged (after validating its fields); a payload with
/// no discernible header but a plausible, even-byte-aligned size is assumed
/// to be bare PCM and gets `expected`'s header prepended.
pub fn repair_or_validate(payload: &[u8], expected: WavFormat) -> Result<Bytes, WavValidationError> {
    if payload.len() >= 44 && &payload[0..4] == b"RIFF" && &payload[8..12] == b"WAVE" {
        return validate_existing_header(payload);
    }

    if payload.len() % 2 != 0 {
        return Err(WavValidationError::NotEvenAligned);
    }
    if payload.is_empty() {
        return Err(WavValidationError::TooShort);
    }

    validate_format(&expected)?;

    let mut out = BytesMut::with_capacity(44 + payload.len());
    out.extend_from_slice(&create_wav_header(
        expected.sample_rate,
        expected.channels,
        expected.bits_per_sample,
    ));
    out.extend_from_slice(payload);
    Ok(out.freeze())
}

fn validate_existing_header(payload: &[u8]) -> Result<Bytes, WavValidationError> {
    if payload.len() < 44 {
        return Err(WavValidationError::TooShort);
    }
    if &payload[0..4] != b"RIFF" || &payload[8..12] != b"WAVE" {
        return Err(WavValidationError::BadMagic);
    }

    let format_tag = u16::from_le_bytes([payload[20], payload[21]]);
    if format_tag != 1 {
        return Err(WavValidationError::UnsupportedFormatTag(format_tag));
    }

    let channels = u16::from_le_bytes([payload[22], payload[23]]);
    let sample_rate = u32::from_le_bytes([payload[24], payload[25], payload[26], payload[27]]);
    let bits_per_sample = u16::from_le_bytes([payload[34], payload[35]]);

    validate_format(&WavFormat {
        sample_rate,
        channels,
        bits_per_sample,
    })?;

    Ok(Bytes::copy_from_slice(payload))
}

fn validate_format(format: &WavFormat) -> Result<(), WavValidationError> {
    if !matches!(format.channels, 1 | 2) {
        return Err(WavValidationError::UnsupportedChannels(format.channels));
    }
    if !SUPPORTED_SAMPLE_RATES.contains(&format.sample_rate) {
        return Err(WavValidationError::UnsupportedSampleRate(format.sample_rate));
    }
    if format.bits_per_sample != 16 {
        return Err(WavValidationError::UnsupportedBitDepth(format.bits_per_sample));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format() -> WavFormat {
        WavFormat {
            sample_rate: 44100,
            channels: 2,
            bits_per_sample: 16,
        }
    }

    #[test]
    fn header_has_expected_fmt_fields() {
        let header = create_wav_header(44100, 2, 16);
        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(&header[8..12], b"WAVE");
        assert_eq!(u16::from_le_bytes([header[22], header[23]]), 2);
        assert_eq!(
            u32::from_le_bytes([header[24], header[25], header[26], header[27]]),
            44100
        );
    }

    #[test]
    fn synthesizes_header_for_bare_pcm() {
        let pcm = vec![0u8; 4096];
        let wav = repair_or_validate(&pcm, format()).unwrap();
        assert_eq!(wav.len(), 44 + pcm.len());
        assert_eq!(&wav[0..4], b"RIFF");
    }

    #[test]
    fn rejects_odd_length_bare_pcm() {
        let pcm = vec![0u8; 4095];
        assert_eq!(
            repair_or_validate(&pcm, format()).unwrap_err(),
            WavValidationError::NotEvenAligned
        );
    }

    #[test]
    fn passes_through_valid_existing_header() {
        let mut payload = create_wav_header(44100, 2, 16).to_vec();
        payload.extend_from_slice(&[0u8; 256]);
        let result = repair_or_validate(&payload, format()).unwrap();
        assert_eq!(result.len(), payload.len());
    }

    #[test]
    fn rejects_unsupported_sample_rate_in_existing_header() {
        let payload = create_wav_header(11025, 2, 16);
        assert_eq!(
            repair_or_validate(&payload, format()).unwrap_err(),
            WavValidationError::UnsupportedSampleRate(11025)
        );
    }
}
