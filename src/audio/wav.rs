//! WAV encoding for finalized segments.
//!
//! The segment recorder buffers raw PCM; on finalize the chunks are
//! concatenated and encoded here. Decoding exists for segment combining
//! and tests — this crate owns no codec of its own.

use crate::error::{Result, UttercutError};
use std::io::Cursor;

/// Encode 16-bit mono PCM samples into an in-memory WAV file.
pub fn encode(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    let mut writer =
        hound::WavWriter::new(&mut cursor, spec).map_err(|e| UttercutError::AudioEncode {
            message: format!("Failed to create WAV writer: {}", e),
        })?;

    for &sample in samples {
        writer
            .write_sample(sample)
            .map_err(|e| UttercutError::AudioEncode {
                message: format!("Failed to write WAV sample: {}", e),
            })?;
    }

    writer.finalize().map_err(|e| UttercutError::AudioEncode {
        message: format!("Failed to finalize WAV data: {}", e),
    })?;

    Ok(cursor.into_inner())
}

/// Decode an in-memory WAV file into mono samples and its sample rate.
///
/// Stereo input is downmixed by averaging channel pairs.
pub fn decode(bytes: &[u8]) -> Result<(Vec<i16>, u32)> {
    let mut reader =
        hound::WavReader::new(Cursor::new(bytes)).map_err(|e| UttercutError::AudioEncode {
            message: format!("Failed to parse WAV data: {}", e),
        })?;

    let spec = reader.spec();
    let raw: Vec<i16> = reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| UttercutError::AudioEncode {
            message: format!("Failed to read WAV samples: {}", e),
        })?;

    let samples = if spec.channels == 2 {
        raw.chunks_exact(2)
            .map(|pair| {
                let left = pair[0] as i32;
                let right = pair[1] as i32;
                ((left + right) / 2) as i16
            })
            .collect()
    } else {
        raw
    };

    Ok((samples, spec.sample_rate))
}

/// Concatenate several WAV blobs into one.
///
/// All blobs must share a sample rate; the result is re-encoded at that rate.
pub fn combine(blobs: &[&[u8]]) -> Result<Vec<u8>> {
    let mut combined: Vec<i16> = Vec::new();
    let mut rate: Option<u32> = None;

    for bytes in blobs {
        let (samples, sample_rate) = decode(bytes)?;
        match rate {
            None => rate = Some(sample_rate),
            Some(expected) if expected != sample_rate => {
                return Err(UttercutError::AudioEncode {
                    message: format!(
                        "Sample rate mismatch when combining: {} vs {}",
                        expected, sample_rate
                    ),
                });
            }
            Some(_) => {}
        }
        combined.extend_from_slice(&samples);
    }

    let rate = rate.ok_or_else(|| UttercutError::AudioEncode {
        message: "No blobs to combine".to_string(),
    })?;

    encode(&combined, rate)
}

/// Simple linear interpolation resampling.
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = source_pos.floor() as usize;
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as i16
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let samples = vec![100i16, -200, 300, -400, 500];
        let bytes = encode(&samples, 16000).unwrap();

        let (decoded, rate) = decode(&bytes).unwrap();
        assert_eq!(decoded, samples);
        assert_eq!(rate, 16000);
    }

    #[test]
    fn test_encode_empty_samples() {
        let bytes = encode(&[], 16000).unwrap();
        let (decoded, rate) = decode(&bytes).unwrap();
        assert!(decoded.is_empty());
        assert_eq!(rate, 16000);
    }

    #[test]
    fn test_decode_stereo_downmixes_to_mono() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in &[100i16, 200, 300, 400] {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();

        let (samples, _) = decode(&cursor.into_inner()).unwrap();
        assert_eq!(samples, vec![150i16, 350]);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode(b"not a wav file").is_err());
    }

    #[test]
    fn test_combine_concatenates_in_order() {
        let a = encode(&[1i16, 2, 3], 16000).unwrap();
        let b = encode(&[4i16, 5], 16000).unwrap();

        let combined = combine(&[&a, &b]).unwrap();
        let (samples, rate) = decode(&combined).unwrap();

        assert_eq!(samples, vec![1i16, 2, 3, 4, 5]);
        assert_eq!(rate, 16000);
    }

    #[test]
    fn test_combine_rejects_rate_mismatch() {
        let a = encode(&[1i16], 16000).unwrap();
        let b = encode(&[2i16], 44100).unwrap();
        assert!(combine(&[&a, &b]).is_err());
    }

    #[test]
    fn test_combine_empty_input_fails() {
        assert!(combine(&[]).is_err());
    }

    #[test]
    fn test_resample_same_rate_is_identity() {
        let samples = vec![1i16, 2, 3];
        assert_eq!(resample(&samples, 16000, 16000), samples);
    }

    #[test]
    fn test_resample_halves_sample_count() {
        let samples = vec![0i16; 320];
        let resampled = resample(&samples, 32000, 16000);
        assert_eq!(resampled.len(), 160);
    }
}
