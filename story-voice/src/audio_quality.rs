// Story Voice - Audio Quality Gate
// Level checks for reference clips and the invertible loudness normalization
// applied around synthesis

use crate::audio::{amplitude_to_dbfs, rms};

/// Result of audio quality check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioQuality {
    /// Level is usable for conditioning
    Good,
    /// Too quiet to carry a clear voice print
    TooQuiet,
    /// Peaks at full scale
    Clipping,
    /// No samples at all
    Empty,
}

/// Stateless level gate for reference recordings.
#[derive(Debug, Clone)]
pub struct AudioQualityGate {
    min_rms: f32,
    clip_peak: f32,
}

impl Default for AudioQualityGate {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioQualityGate {
    pub fn new() -> Self {
        Self {
            min_rms: 0.01,
            clip_peak: 0.99,
        }
    }

    pub fn calculate_rms(samples: &[f32]) -> f32 {
        rms(samples)
    }

    pub fn calculate_peak(samples: &[f32]) -> f32 {
        samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max)
    }

    pub fn check(&self, samples: &[f32]) -> AudioQuality {
        if samples.is_empty() {
            return AudioQuality::Empty;
        }
        if Self::calculate_peak(samples) > self.clip_peak {
            return AudioQuality::Clipping;
        }
        if Self::calculate_rms(samples) < self.min_rms {
            return AudioQuality::TooQuiet;
        }
        AudioQuality::Good
    }

    /// Level summary for diagnostics and bridge responses.
    pub fn stats(&self, samples: &[f32]) -> serde_json::Value {
        let level = Self::calculate_rms(samples);
        let dbfs = amplitude_to_dbfs(level);
        serde_json::json!({
            "rms": level,
            "peak": Self::calculate_peak(samples),
            "dbfs": if dbfs.is_finite() { Some(dbfs) } else { None },
            "quality": format!("{:?}", self.check(samples)),
        })
    }
}

/// Loudness-normalized audio plus the gain needed to undo it.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedAudio {
    pub samples: Vec<f32>,
    pub gain: f32,
}

/// Raises quiet audio to a target RMS and restores the original level on
/// the model output afterwards. Audio already at or above target is left
/// untouched.
#[derive(Debug, Clone, Copy)]
pub struct LoudnessNormalizer {
    target_rms: f32,
}

impl LoudnessNormalizer {
    /// Below this level the clip is treated as silence and not amplified.
    const SILENCE_RMS: f32 = 0.001;

    pub fn new(target_rms: f32) -> Self {
        Self { target_rms }
    }

    pub fn target_rms(&self) -> f32 {
        self.target_rms
    }

    pub fn normalize(&self, samples: &[f32]) -> NormalizedAudio {
        let level = rms(samples);
        if level >= self.target_rms {
            return NormalizedAudio {
                samples: samples.to_vec(),
                gain: 1.0,
            };
        }
        if level < Self::SILENCE_RMS {
            log::warn!(
                "[Quality] Reference RMS {:.5} is near silence, skipping normalization",
                level
            );
            return NormalizedAudio {
                samples: samples.to_vec(),
                gain: 1.0,
            };
        }

        let gain = self.target_rms / level;
        log::debug!("[Quality] Raising reference RMS {:.4} by {:.2}x", level, gain);
        NormalizedAudio {
            samples: samples.iter().map(|&s| (s * gain).clamp(-1.0, 1.0)).collect(),
            gain,
        }
    }

    /// Undo a gain previously applied by [`normalize`](Self::normalize).
    pub fn restore(&self, samples: &mut [f32], gain: f32) {
        if gain == 1.0 || gain <= 0.0 {
            return;
        }
        let inverse = 1.0 / gain;
        for sample in samples.iter_mut() {
            *sample *= inverse;
        }
    }
}
