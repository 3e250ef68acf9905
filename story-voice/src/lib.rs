//! Story Voice - Long-form voice-cloned speech synthesis
//!
//! Turns a story-length text plus a short reference recording into one
//! continuous waveform in the reference speaker's voice: text segmentation,
//! reference conditioning with a transcript cache, adaptive chunk sizing,
//! batch synthesis with cross-fade stitching and WER/CER evaluation.
//!
//! The acoustic model, vocoder and speech-to-text engine are injected through
//! the traits in [`collaborators`].

// Core modules
pub mod audio;
pub mod audio_quality;
pub mod budget;
pub mod cache;
pub mod collaborators;
pub mod config;
pub mod evaluate;
pub mod pipeline;
pub mod reference;
pub mod scoring;
pub mod segment;
pub mod stitch;
pub mod synthesis;
pub mod validation;
pub mod watchdog;

// Re-export main types for convenience
pub use audio::{AudioClip, AudioError};
pub use audio_quality::{AudioQuality, AudioQualityGate, LoudnessNormalizer};
pub use budget::chunk_budget;
pub use cache::TranscriptCache;
pub use collaborators::{
    AcousticFrames, AcousticModel, CollaboratorError, NoTranscriber, SampleRequest, Transcriber,
    Vocoder,
};
pub use config::SynthesisConfig;
pub use evaluate::{EvaluationResult, QualityEvaluator};
pub use pipeline::{
    synthesize_on_worker, Collaborators, LogEventSink, NoopEventSink, PipelineError,
    ReferenceSource, SynthesisEvent, SynthesisEventSink, SynthesisOutput, SynthesisRequest,
    VoicePipeline,
};
pub use reference::{ReferenceAudio, ReferenceConditioner, ReferenceError, ReferenceTranscript};
pub use scoring::{calculate_cer, calculate_wer, score, ErrorRates};
pub use segment::{chunk_text, segment, TextChunk};
pub use stitch::{stitch, StitchedWaveform};
pub use synthesis::{
    ChunkFailure, ChunkFailureReason, SynthesisDriver, SynthesisError, SynthesisParams,
    SynthesisReport,
};
pub use validation::ValidationError;
pub use watchdog::{ChunkDeadline, TimeoutTracker};
