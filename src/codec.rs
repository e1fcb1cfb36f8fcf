//! PCM16 <-> float sample conversion and the base64 text wrapping used on the wire.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

use crate::error::LinkError;

/// A decoded mono buffer of normalized samples.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl PcmBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback length in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Scales `[-1, 1]` samples to signed 16-bit and packs them little-endian.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let s = if s.is_nan() { 0.0 } else { s.clamp(-1.0, 1.0) };
        let v = (s * 32768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Reverses [`encode_pcm16`]. An odd byte count means the payload was cut or
/// corrupted and is rejected rather than truncated.
pub fn decode_pcm16(bytes: &[u8], sample_rate: u32) -> Result<PcmBuffer, LinkError> {
    if bytes.len() % 2 != 0 {
        return Err(LinkError::Decode(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }
    let samples = bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / 32768.0)
        .collect();
    Ok(PcmBuffer::new(samples, sample_rate))
}

pub fn to_wire(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

pub fn from_wire(text: &str) -> Result<Vec<u8>, LinkError> {
    Ok(BASE64.decode(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn full_scale_saturates_instead_of_wrapping() {
        let bytes = encode_pcm16(&[1.0, -1.0, 2.0, -3.0]);
        let values: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(values, vec![i16::MAX, i16::MIN, i16::MAX, i16::MIN]);
    }

    #[test]
    fn little_endian_layout() {
        // 0.5 * 32768 = 16384 = 0x4000
        assert_eq!(encode_pcm16(&[0.5]), vec![0x00, 0x40]);
    }

    #[test]
    fn odd_length_is_a_decode_error() {
        let err = decode_pcm16(&[0, 1, 2], 24_000).unwrap_err();
        assert!(matches!(err, LinkError::Decode(_)));
    }

    #[test]
    fn duration_uses_sample_rate() {
        let buf = decode_pcm16(&vec![0u8; 48_000], 24_000).unwrap();
        assert_eq!(buf.len(), 24_000);
        assert!((buf.duration() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn wire_text_rejects_garbage() {
        assert!(from_wire("not base64!!").is_err());
        assert_eq!(from_wire(&to_wire(&[1, 2, 3])).unwrap(), vec![1, 2, 3]);
    }

    proptest! {
        #[test]
        fn round_trip_within_quantization(samples in prop::collection::vec(-1.0f32..=1.0, 0..512)) {
            let decoded = decode_pcm16(&encode_pcm16(&samples), 16_000).unwrap();
            prop_assert_eq!(decoded.len(), samples.len());
            for (a, b) in samples.iter().zip(decoded.samples()) {
                prop_assert!((a - b).abs() <= 1.0 / 32768.0 + 1e-6);
            }
        }
    }
}
