//! Audio codec and resampling utilities (C1).
//!
//! Telephony legs speak 8kHz mono µ-law; the AI service speaks 16-bit PCM,
//! typically at 16kHz or 24kHz. This module converts between the two and
//! resamples PCM between arbitrary rates using linear interpolation
//! (upsampling) or box-filter averaging (downsampling).

use bytes::Bytes;

/// µ-law bias constant per ITU-T G.711.
const MULAW_BIAS: i16 = 0x84;
const MULAW_CLIP: i16 = 32635;

/// Decodes a single µ-law byte into a 16-bit linear PCM sample.
pub fn mulaw_decode_sample(byte: u8) -> i16 {
    let byte = !byte;
    let sign = byte & 0x80;
    let exponent = (byte >> 4) & 0x07;
    let mantissa = byte & 0x0F;
    let mut sample = ((mantissa as i16) << 3) + MULAW_BIAS;
    sample <<= exponent;
    sample -= MULAW_BIAS;
    if sign != 0 {
        -sample
    } else {
        sample
    }
}

/// Encodes a single 16-bit linear PCM sample into µ-law.
pub fn mulaw_encode_sample(sample: i16) -> u8 {
    let sign: u8 = if sample < 0 { 0x00 } else { 0x80 };
    let mut sample = sample.unsigned_abs() as i32;
    if sample > MULAW_CLIP as i32 {
        sample = MULAW_CLIP as i32;
    }
    sample += MULAW_BIAS as i32;

    let mut exponent: i32 = 7;
    let mut mask: i32 = 0x4000;
    while exponent > 0 && (sample & mask) == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (sample >> (exponent + 3)) & 0x0F;
    let encoded = ((exponent as u8) << 4) | (mantissa as u8);
    !(sign | encoded)
}

/// Decodes a buffer of µ-law bytes into 16-bit little-endian PCM.
pub fn mulaw_decode(input: &[u8]) -> Bytes {
    let mut out = Vec::with_capacity(input.len() * 2);
    for &byte in input {
        out.extend_from_slice(&mulaw_decode_sample(byte).to_le_bytes());
    }
    Bytes::from(out)
}

/// Encodes 16-bit little-endian PCM into µ-law bytes.
///
/// Trailing odd byte (a truncated sample) is dropped.
pub fn mulaw_encode(pcm: &[u8]) -> Bytes {
    let mut out = Vec::with_capacity(pcm.len() / 2);
    for chunk in pcm.chunks_exact(2) {
        let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
        out.push(mulaw_encode_sample(sample));
    }
    Bytes::from(out)
}

/// Resamples 16-bit little-endian PCM from `from_rate` to `to_rate`.
///
/// Upsampling uses linear interpolation between adjacent samples;
/// downsampling averages the samples that fall into each output slot
/// (a simple box filter). A no-op when rates match.
pub fn resample(pcm: &[u8], from_rate: u32, to_rate: u32) -> Bytes {
    if from_rate == to_rate || pcm.len() < 2 {
        return Bytes::copy_from_slice(pcm);
    }

    if pcm.len() % 2 != 0 {
        log::warn!("[AudioCodec] resample: odd byte count {}, truncating to even", pcm.len());
    }

    let samples: Vec<i16> = pcm
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect();
    if samples.is_empty() {
        return Bytes::new();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let out_len = ((samples.len() as f64) * ratio).round().max(1.0) as usize;
    let mut out = Vec::with_capacity(out_len * 2);

    if to_rate > from_rate {
        for i in 0..out_len {
            let src_pos = i as f64 / ratio;
            let idx = src_pos.floor() as usize;
            let frac = src_pos - idx as f64;
            let a = samples[idx.min(samples.len() - 1)] as f64;
            let b = samples[(idx + 1).min(samples.len() - 1)] as f64;
            let interpolated = a + (b - a) * frac;
            out.extend_from_slice(&(interpolated.round() as i16).to_le_bytes());
        }
    } else {
        let step = from_rate as f64 / to_rate as f64;
        for i in 0..out_len {
            let start = (i as f64 * step).floor() as usize;
            let end = (((i + 1) as f64 * step).ceil() as usize).min(samples.len());
            let end = end.max(start + 1).min(samples.len());
            if start >= samples.len() {
                break;
            }
            let slice = &samples[start..end];
            let avg = slice.iter().map(|&s| s as i64).sum::<i64>() / slice.len() as i64;
            out.extend_from_slice(&(avg as i16).to_le_bytes());
        }
    }

    Bytes::from(out)
}

/// Pads a PCM buffer with trailing silence up to `min_bytes`, if shorter.
///
/// Used when a final chunk of audio falls under the commit threshold but
/// must still be flushed (e.g. on call teardown).
pub fn pad_to_min(pcm: &[u8], min_bytes: usize) -> Bytes {
    if pcm.len() >= min_bytes {
        return Bytes::copy_from_slice(pcm);
    }
    let mut out = Vec::with_capacity(min_bytes);
    out.extend_from_slice(pcm);
    out.resize(min_bytes, 0);
    Bytes::from(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mulaw_round_trip_is_approximately_lossless() {
        for sample in [-30000i16, -1000, -1, 0, 1, 1000, 30000] {
            let encoded = mulaw_encode_sample(sample);
            let decoded = mulaw_decode_sample(encoded);
            let diff = (sample as i32 - decoded as i32).abs();
            assert!(diff < 256, "sample {sample} decoded to {decoded}, diff {diff}");
        }
    }

    #[test]
    fn mulaw_buffer_decode_doubles_length() {
        let input = vec![0xFFu8, 0x00, 0x7F];
        let decoded = mulaw_decode(&input);
        assert_eq!(decoded.len(), 6);
    }

    #[test]
    fn resample_noop_when_rates_match() {
        let pcm: Vec<u8> = vec![1, 2, 3, 4];
        let out = resample(&pcm, 8000, 8000);
        assert_eq!(out.as_ref(), pcm.as_slice());
    }

    #[test]
    fn resample_upsamples_8k_to_16k_doubles_sample_count() {
        let samples: Vec<i16> = vec![0, 100, 200, 300];
        let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let out = resample(&pcm, 8000, 16000);
        assert_eq!(out.len() / 2, 8);
    }

    #[test]
    fn resample_downsamples_16k_to_8k_halves_sample_count() {
        let samples: Vec<i16> = (0..8).map(|i| i * 10).collect();
        let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let out = resample(&pcm, 16000, 8000);
        assert_eq!(out.len() / 2, 4);
    }

    #[test]
    fn pad_to_min_extends_with_silence() {
        let pcm = vec![1u8, 2, 3];
        let padded = pad_to_min(&pcm, 10);
        assert_eq!(padded.len(), 10);
        assert_eq!(&padded[0..3], &[1, 2, 3]);
        assert!(padded[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn pad_to_min_is_noop_when_already_long_enough() {
        let pcm = vec![1u8, 2, 3, 4];
        let padded = pad_to_min(&pcm, 2);
        assert_eq!(padded.as_ref(), pcm.as_slice());
    }
}
