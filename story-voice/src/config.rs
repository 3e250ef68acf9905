// Story Voice - Synthesis configuration
// Tunables for conditioning, synthesis and evaluation, persisted as JSON

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::validation::ValidationError;

/// Current config version - bump when defaults change to force a reset
const CONFIG_VERSION: u32 = 1;

/// Environment variable overriding the config file location
pub const CONFIG_PATH_ENV: &str = "STORY_VOICE_CONFIG";

/// All tunable parameters of a synthesis request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub config_version: u32,

    // Stitching
    pub cross_fade_duration: f32, // seconds of overlap between chunks

    // Loudness
    pub target_rms: f32,

    // Acoustic model sampling
    pub nfe_step: u32,           // denoising steps
    pub cfg_strength: f32,       // classifier-free guidance
    pub sway_sampling_coef: f32, // sway sampling coefficient
    pub speed: f32,
    pub fix_duration: Option<f32>, // total seconds per chunk, overrides the estimate

    // Reference audio bounds
    pub ref_audio_min_duration: f32,
    pub ref_audio_max_duration: f32,

    // Speech-to-text
    pub transcription_language: String,
    pub transcription_attempts: u32,

    // Robustness
    pub chunk_timeout_ms: Option<u64>,

    // Post-processing
    pub remove_silence: bool,
    pub evaluate: bool,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            config_version: CONFIG_VERSION,
            cross_fade_duration: 0.15,
            target_rms: 0.1,
            nfe_step: 32,
            cfg_strength: 2.0,
            sway_sampling_coef: -1.0,
            speed: 1.0,
            fix_duration: None,
            ref_audio_min_duration: 3.0,
            ref_audio_max_duration: 15.0,
            transcription_language: "vi".to_string(),
            transcription_attempts: 3,
            chunk_timeout_ms: None,
            remove_silence: false,
            evaluate: false,
        }
    }
}

impl SynthesisConfig {
    const CONFIG_PATH: &'static str = "story-voice/synthesis_config.json";

    /// Higher-quality preset: more denoising steps and stronger guidance.
    pub fn enhanced() -> Self {
        Self {
            nfe_step: 64,
            cfg_strength: 2.5,
            sway_sampling_coef: -1.0,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |msg: String| Err(ValidationError::InvalidConfig(msg));

        if !self.speed.is_finite() || self.speed <= 0.0 {
            return invalid(format!("speed must be positive, got {}", self.speed));
        }
        if !self.cross_fade_duration.is_finite() || self.cross_fade_duration < 0.0 {
            return invalid(format!(
                "cross_fade_duration must be >= 0, got {}",
                self.cross_fade_duration
            ));
        }
        if !self.target_rms.is_finite() || self.target_rms <= 0.0 {
            return invalid(format!("target_rms must be positive, got {}", self.target_rms));
        }
        if self.nfe_step == 0 {
            return invalid("nfe_step must be at least 1".to_string());
        }
        if self.transcription_attempts == 0 {
            return invalid("transcription_attempts must be at least 1".to_string());
        }
        if !(self.ref_audio_min_duration >= 0.0
            && self.ref_audio_min_duration <= self.ref_audio_max_duration)
        {
            return invalid(format!(
                "reference duration bounds [{}, {}] are inconsistent",
                self.ref_audio_min_duration, self.ref_audio_max_duration
            ));
        }
        if let Some(fixed) = self.fix_duration {
            if !fixed.is_finite() || fixed <= 0.0 {
                return invalid(format!("fix_duration must be positive, got {}", fixed));
            }
        }
        Ok(())
    }

    pub fn language(&self) -> Option<&str> {
        let language = self.transcription_language.trim();
        if language.is_empty() {
            None
        } else {
            Some(language)
        }
    }

    pub fn chunk_timeout(&self) -> Option<Duration> {
        self.chunk_timeout_ms.map(Duration::from_millis)
    }

    /// Load from the default location, falling back to defaults when the
    /// file is missing, unreadable, or from an older config version.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path).unwrap_or_default(),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        let data = std::fs::read_to_string(path).ok()?;
        let config: Self = match serde_json::from_str(&data) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("[Config] Ignoring unreadable {}: {}", path.display(), e);
                return None;
            }
        };
        if config.config_version < CONFIG_VERSION {
            log::info!(
                "[Config] Version {} < {} - resetting to defaults",
                config.config_version,
                CONFIG_VERSION
            );
            return None;
        }
        Some(config)
    }

    pub fn save(&self) -> Result<(), std::io::Error> {
        let path = Self::config_path().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "Could not find config path")
        })?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)
    }

    pub fn config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            let path = path.trim();
            if !path.is_empty() {
                return Some(PathBuf::from(path));
            }
        }
        dirs::data_dir().map(|p| p.join(Self::CONFIG_PATH))
    }
}
