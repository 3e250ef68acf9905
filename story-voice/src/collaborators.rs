// Story Voice - External collaborators
// Contracts for the acoustic model, vocoder and speech-to-text engine. The
// host loads and owns the concrete implementations and hands them in as
// shared handles.

/// Default output rate of the acoustic model and vocoder.
pub const DEFAULT_MODEL_SAMPLE_RATE: u32 = 24_000;
/// Waveform samples per acoustic frame.
pub const DEFAULT_HOP_LENGTH: usize = 256;
/// Mel channels per acoustic frame.
pub const DEFAULT_MEL_CHANNELS: usize = 100;

/// Frame-major block of mel-scale acoustic frames.
#[derive(Debug, Clone, PartialEq)]
pub struct AcousticFrames {
    n_mels: usize,
    data: Vec<f32>,
}

impl AcousticFrames {
    /// Build from a flat frame-major buffer. Trailing values that do not
    /// fill a whole frame are dropped.
    pub fn new(n_mels: usize, mut data: Vec<f32>) -> Self {
        let n_mels = n_mels.max(1);
        let whole = data.len() / n_mels * n_mels;
        data.truncate(whole);
        Self { n_mels, data }
    }

    pub fn zeros(num_frames: usize, n_mels: usize) -> Self {
        Self::new(n_mels, vec![0.0; num_frames * n_mels.max(1)])
    }

    pub fn n_mels(&self) -> usize {
        self.n_mels
    }

    pub fn num_frames(&self) -> usize {
        self.data.len() / self.n_mels
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn frame(&self, index: usize) -> Option<&[f32]> {
        let start = index.checked_mul(self.n_mels)?;
        self.data.get(start..start + self.n_mels)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Frames from `start` onward, or `None` when fewer frames exist.
    pub fn split_off_prefix(&self, start: usize) -> Option<Self> {
        if start > self.num_frames() {
            return None;
        }
        Some(Self {
            n_mels: self.n_mels,
            data: self.data[start * self.n_mels..].to_vec(),
        })
    }
}

/// Inputs for one acoustic-model sampling call.
#[derive(Debug, Clone, Copy)]
pub struct SampleRequest<'a> {
    /// Reference waveform at the model rate
    pub conditioning: &'a [f32],
    /// Reference transcript followed by the chunk text
    pub text: &'a str,
    /// Total frames to generate, conditioning frames included
    pub total_frames: usize,
    pub steps: u32,
    pub cfg_strength: f32,
    pub sway_sampling_coef: f32,
}

/// Flow-matching acoustic model.
pub trait AcousticModel: Send + Sync {
    fn sample_rate(&self) -> u32 {
        DEFAULT_MODEL_SAMPLE_RATE
    }

    fn hop_length(&self) -> usize {
        DEFAULT_HOP_LENGTH
    }

    /// Generate `total_frames` frames whose leading portion reconstructs the
    /// conditioning audio.
    fn sample(&self, request: &SampleRequest<'_>) -> Result<AcousticFrames, CollaboratorError>;
}

/// Frames-to-waveform decoder running at the acoustic model's rate.
pub trait Vocoder: Send + Sync {
    fn decode(&self, frames: &AcousticFrames) -> Result<Vec<f32>, CollaboratorError>;
}

/// Speech-to-text engine used for reference transcripts and evaluation.
pub trait Transcriber: Send + Sync {
    /// Rate the engine expects; input is resampled to it first.
    fn sample_rate(&self) -> u32 {
        16_000
    }

    fn transcribe(&self, samples: &[f32], language: Option<&str>) -> Result<String, CollaboratorError>;
}

/// Transcriber for hosts that run without a speech-to-text engine. Every
/// call fails with [`CollaboratorError::Unavailable`].
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTranscriber;

impl Transcriber for NoTranscriber {
    fn transcribe(&self, _samples: &[f32], _language: Option<&str>) -> Result<String, CollaboratorError> {
        Err(CollaboratorError::Unavailable(
            "no speech-to-text engine configured".to_string(),
        ))
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CollaboratorError {
    #[error("Acoustic model error: {0}")]
    Model(String),
    #[error("Vocoder error: {0}")]
    Vocoder(String),
    #[error("Transcription error: {0}")]
    Transcription(String),
    #[error("Unusable collaborator output: {0}")]
    UnusableOutput(String),
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),
}
