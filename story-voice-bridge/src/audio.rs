use base64::Engine;
use serde::Deserialize;
use story_voice::audio::{decode_wav, downmix};
use story_voice::collaborators::DEFAULT_MODEL_SAMPLE_RATE;
use story_voice::AudioClip;

use crate::protocol::{ErrorCode, RpcError};

pub const DEFAULT_SAMPLE_RATE_HZ: u32 = DEFAULT_MODEL_SAMPLE_RATE;
pub const DEFAULT_CHANNELS: u16 = 1;
pub const SUPPORTED_INPUT_FORMATS: &[&str] = &["pcm_s16le", "f32le", "wav"];
const MAX_AUDIO_B64_BYTES: usize = 6 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct AudioPayload {
    pub audio_b64: String,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub sample_rate_hz: Option<u32>,
    #[serde(default)]
    pub channels: Option<u16>,
}

impl AudioPayload {
    pub fn format_or_default(&self) -> &str {
        self.format.as_deref().unwrap_or("pcm_s16le")
    }

    pub fn sample_rate_hz_or_default(&self) -> u32 {
        self.sample_rate_hz.unwrap_or(DEFAULT_SAMPLE_RATE_HZ)
    }

    pub fn channels_or_default(&self) -> u16 {
        self.channels.unwrap_or(DEFAULT_CHANNELS)
    }
}

/// Decode a base64 payload to mono audio. Raw PCM takes its rate and
/// channel count from the payload; WAV takes them from its header.
pub fn decode_audio_payload(payload: &AudioPayload) -> Result<AudioClip, RpcError> {
    if payload.audio_b64.len() > MAX_AUDIO_B64_BYTES {
        return Err(RpcError::new(
            ErrorCode::PayloadTooLarge,
            format!(
                "audio_b64 exceeds max size ({} > {})",
                payload.audio_b64.len(),
                MAX_AUDIO_B64_BYTES
            ),
        ));
    }

    let format = payload.format_or_default().to_ascii_lowercase();
    if !SUPPORTED_INPUT_FORMATS.contains(&format.as_str()) {
        return Err(RpcError::new(
            ErrorCode::UnsupportedAudioFormat,
            format!("Unsupported audio format '{format}'"),
        ));
    }

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.audio_b64.as_bytes())
        .map_err(|e| {
            RpcError::new(
                ErrorCode::AudioDecodeFailed,
                format!("Invalid base64 audio payload: {e}"),
            )
        })?;

    if format == "wav" {
        return decode_wav(&bytes)
            .map_err(|e| RpcError::new(ErrorCode::AudioDecodeFailed, e.to_string()));
    }

    let sample_rate = payload.sample_rate_hz_or_default();
    if sample_rate == 0 {
        return Err(RpcError::new(
            ErrorCode::InvalidParams,
            "sample_rate_hz must be greater than 0",
        ));
    }
    let channels = payload.channels_or_default();
    if channels == 0 {
        return Err(RpcError::new(
            ErrorCode::InvalidParams,
            "channels must be greater than 0",
        ));
    }

    let interleaved = match format.as_str() {
        "f32le" => decode_f32le(&bytes)?,
        _ => decode_pcm_s16le(&bytes)?,
    };
    if interleaved.len() % channels as usize != 0 {
        return Err(RpcError::new(
            ErrorCode::AudioDecodeFailed,
            format!(
                "{} samples do not divide into {} channels",
                interleaved.len(),
                channels
            ),
        ));
    }

    Ok(AudioClip::new(
        downmix(&interleaved, channels as usize),
        sample_rate,
    ))
}

pub fn encode_f32le_to_base64(samples: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * std::mem::size_of::<f32>());
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn decode_pcm_s16le(bytes: &[u8]) -> Result<Vec<f32>, RpcError> {
    if bytes.len() % 2 != 0 {
        return Err(RpcError::new(
            ErrorCode::AudioDecodeFailed,
            format!(
                "pcm_s16le payload must be divisible by 2 bytes, got {}",
                bytes.len()
            ),
        ));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| {
            let value = i16::from_le_bytes([pair[0], pair[1]]);
            (value as f32 / i16::MAX as f32).clamp(-1.0, 1.0)
        })
        .collect())
}

fn decode_f32le(bytes: &[u8]) -> Result<Vec<f32>, RpcError> {
    if bytes.len() % 4 != 0 {
        return Err(RpcError::new(
            ErrorCode::AudioDecodeFailed,
            format!(
                "f32le payload must be divisible by 4 bytes, got {}",
                bytes.len()
            ),
        ));
    }

    let mut samples = Vec::with_capacity(bytes.len() / 4);
    for quad in bytes.chunks_exact(4) {
        let value = f32::from_le_bytes([quad[0], quad[1], quad[2], quad[3]]);
        if !value.is_finite() {
            return Err(RpcError::new(
                ErrorCode::AudioDecodeFailed,
                "f32le payload contains non-finite samples",
            ));
        }
        samples.push(value.clamp(-1.0, 1.0));
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::{decode_audio_payload, encode_f32le_to_base64, AudioPayload};
    use base64::Engine;

    fn b64(bytes: impl AsRef<[u8]>) -> String {
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    #[test]
    fn decodes_pcm_s16le_with_defaults() {
        let mut bytes = Vec::new();
        for s in [-32768i16, 0, 32767] {
            bytes.extend_from_slice(&s.to_le_bytes());
        }

        let payload = AudioPayload {
            audio_b64: b64(bytes),
            format: None,
            sample_rate_hz: None,
            channels: None,
        };

        let clip = decode_audio_payload(&payload).expect("pcm decode failed");
        assert_eq!(clip.sample_rate, 24_000);
        assert_eq!(clip.samples.len(), 3);
        assert!(clip.samples[0] <= -0.99);
        assert!(clip.samples[1].abs() < 0.001);
        assert!(clip.samples[2] >= 0.99);
    }

    #[test]
    fn averages_interleaved_f32le_channels() {
        let mut bytes = Vec::new();
        for s in [0.5f32, -0.5, 0.25, 0.75] {
            bytes.extend_from_slice(&s.to_le_bytes());
        }

        let payload = AudioPayload {
            audio_b64: b64(bytes),
            format: Some("F32LE".to_string()),
            sample_rate_hz: Some(44_100),
            channels: Some(2),
        };

        let clip = decode_audio_payload(&payload).expect("f32 decode failed");
        assert_eq!(clip.sample_rate, 44_100);
        assert_eq!(clip.samples.len(), 2);
        assert!(clip.samples[0].abs() < 1e-6);
        assert!((clip.samples[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn decodes_wav_using_its_header() {
        let wav = story_voice::audio::encode_wav(&[0.5f32; 160], 8_000).expect("encode wav");
        let payload = AudioPayload {
            audio_b64: b64(wav),
            format: Some("wav".to_string()),
            sample_rate_hz: Some(48_000),
            channels: None,
        };

        let clip = decode_audio_payload(&payload).expect("wav decode failed");
        assert_eq!(clip.sample_rate, 8_000);
        assert_eq!(clip.samples.len(), 160);
    }

    #[test]
    fn rejects_invalid_pcm_byte_count() {
        let payload = AudioPayload {
            audio_b64: b64([1u8, 2u8, 3u8]),
            format: Some("pcm_s16le".to_string()),
            sample_rate_hz: Some(16_000),
            channels: Some(1),
        };

        let err = decode_audio_payload(&payload).expect_err("expected decode failure");
        assert_eq!(err.code.as_str(), "AUDIO_DECODE_FAILED");
    }

    #[test]
    fn rejects_unknown_format() {
        let payload = AudioPayload {
            audio_b64: b64([0u8, 0u8]),
            format: Some("mp3".to_string()),
            sample_rate_hz: None,
            channels: None,
        };

        let err = decode_audio_payload(&payload).expect_err("expected format failure");
        assert_eq!(err.code.as_str(), "UNSUPPORTED_AUDIO_FORMAT");
    }

    #[test]
    fn rejects_zero_rate_or_channels() {
        let payload = AudioPayload {
            audio_b64: b64([0u8, 0u8]),
            format: Some("pcm_s16le".to_string()),
            sample_rate_hz: Some(0),
            channels: Some(1),
        };
        let err = decode_audio_payload(&payload).expect_err("expected invalid params");
        assert_eq!(err.code.as_str(), "INVALID_PARAMS");

        let payload = AudioPayload {
            audio_b64: b64([0u8, 0u8]),
            format: None,
            sample_rate_hz: None,
            channels: Some(0),
        };
        let err = decode_audio_payload(&payload).expect_err("expected invalid params");
        assert_eq!(err.code.as_str(), "INVALID_PARAMS");
    }

    #[test]
    fn encodes_f32le_base64() {
        let encoded = encode_f32le_to_base64(&[1.0f32, -1.0f32]);
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .expect("decode output");

        assert_eq!(bytes.len(), 8);
        assert_eq!(f32::from_le_bytes(bytes[0..4].try_into().unwrap()), 1.0);
        assert_eq!(f32::from_le_bytes(bytes[4..8].try_into().unwrap()), -1.0);
    }
}
