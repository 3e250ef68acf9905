//! Story Pipeline - long-form voice-cloned synthesis orchestration
//!
//! Conditions the reference clip, sizes and segments the story text, drives
//! the batch synthesis and optionally scores the result. Consumers implement
//! SynthesisEventSink to receive progress events.

use serde::Serialize;
use std::sync::Arc;

use crate::audio::{remove_long_silences, AudioClip, AudioError};
use crate::budget::chunk_budget;
use crate::cache::TranscriptCache;
use crate::collaborators::{AcousticModel, Transcriber, Vocoder};
use crate::config::SynthesisConfig;
use crate::evaluate::{EvaluationResult, QualityEvaluator};
use crate::reference::{
    ConditionerSettings, ReferenceConditioner, ReferenceError, TranscriptOrigin,
};
use crate::segment::{normalize_generation_text, segment, TextChunk};
use crate::stitch::StitchedWaveform;
use crate::synthesis::{SynthesisDriver, SynthesisError, SynthesisParams, SynthesisReport};
use crate::validation::ValidationError;

/// Events emitted while a request is processed
#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisEvent {
    /// Reference clip conditioned and transcript resolved
    ReferenceReady {
        fingerprint: String,
        duration_secs: f32,
        transcript_origin: TranscriptOrigin,
    },
    /// Story text split into chunks
    Segmented { chunk_count: usize, max_chars: usize },
    ChunkStarted {
        index: usize,
        total: usize,
        preview: String,
    },
    ChunkFinished {
        index: usize,
        total: usize,
        samples: usize,
        elapsed_ms: u64,
    },
    /// Chunk skipped; synthesis continues
    ChunkFailed {
        index: usize,
        total: usize,
        reason: String,
    },
    Stitched {
        segments: usize,
        failed: usize,
        duration_secs: f32,
    },
    Evaluated { wer: Option<f32>, cer: Option<f32> },
}

/// Trait for receiving synthesis progress events
pub trait SynthesisEventSink: Send + Sync {
    fn on_event(&self, event: SynthesisEvent);
}

/// No-op event sink (silent operation)
pub struct NoopEventSink;
impl SynthesisEventSink for NoopEventSink {
    fn on_event(&self, _event: SynthesisEvent) {}
}

/// Logging event sink
pub struct LogEventSink;
impl SynthesisEventSink for LogEventSink {
    fn on_event(&self, event: SynthesisEvent) {
        match &event {
            SynthesisEvent::ReferenceReady {
                fingerprint,
                duration_secs,
                transcript_origin,
            } => log::info!(
                "[Pipeline] Reference {} ready ({:.2}s, transcript {:?})",
                &fingerprint[..fingerprint.len().min(12)],
                duration_secs,
                transcript_origin
            ),
            SynthesisEvent::Segmented {
                chunk_count,
                max_chars,
            } => log::info!(
                "[Pipeline] {} chunks (budget {} bytes)",
                chunk_count,
                max_chars
            ),
            SynthesisEvent::ChunkStarted {
                index,
                total,
                preview,
            } => log::debug!("[Pipeline] Chunk {}/{}: '{}'", index + 1, total, preview),
            SynthesisEvent::ChunkFinished {
                index,
                total,
                samples,
                elapsed_ms,
            } => log::debug!(
                "[Pipeline] Chunk {}/{} done: {} samples ({}ms)",
                index + 1,
                total,
                samples,
                elapsed_ms
            ),
            SynthesisEvent::ChunkFailed {
                index,
                total,
                reason,
            } => log::warn!("[Pipeline] Chunk {}/{} failed: {}", index + 1, total, reason),
            SynthesisEvent::Stitched {
                segments,
                failed,
                duration_secs,
            } => log::info!(
                "[Pipeline] Stitched {} segments ({} failed), {:.2}s",
                segments,
                failed,
                duration_secs
            ),
            SynthesisEvent::Evaluated { wer, cer } => {
                log::info!("[Pipeline] Evaluated: WER {:?}, CER {:?}", wer, cer)
            }
        }
    }
}

/// Injected engines
#[derive(Clone)]
pub struct Collaborators {
    pub model: Arc<dyn AcousticModel>,
    pub vocoder: Arc<dyn Vocoder>,
    pub transcriber: Arc<dyn Transcriber>,
}

/// Reference voice as uploaded (encoded WAV) or already decoded.
#[derive(Debug, Clone)]
pub enum ReferenceSource {
    Wav(Vec<u8>),
    Clip(AudioClip),
}

#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub text: String,
    pub reference: ReferenceSource,
    /// May be blank; the reference is then transcribed.
    pub reference_text: String,
}

#[derive(Debug, Clone)]
pub struct SynthesisOutput {
    pub report: SynthesisReport,
    pub chunks: Vec<TextChunk>,
    pub max_chars: usize,
    pub reference_fingerprint: String,
    pub reference_text: String,
    pub evaluation: Option<EvaluationResult>,
}

impl SynthesisOutput {
    pub fn waveform(&self) -> &StitchedWaveform {
        &self.report.waveform
    }

    pub fn summary(&self) -> OutputSummary {
        OutputSummary {
            chunk_count: self.report.chunk_count,
            succeeded: self.report.succeeded(),
            failed: self.report.failures.len(),
            duration_secs: self.report.waveform.duration_secs(),
            sample_rate: self.report.waveform.sample_rate,
            max_chars: self.max_chars,
            elapsed_ms: self.report.elapsed_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputSummary {
    pub chunk_count: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub duration_secs: f32,
    pub sample_rate: u32,
    pub max_chars: usize,
    pub elapsed_ms: u64,
}

/// Pipeline that ties together conditioning, segmentation, synthesis and
/// evaluation. Requests are independent; only the transcript cache is shared.
pub struct VoicePipeline {
    config: SynthesisConfig,
    conditioner: ReferenceConditioner,
    driver: SynthesisDriver,
    evaluator: QualityEvaluator,
    event_sink: Arc<dyn SynthesisEventSink>,
}

impl VoicePipeline {
    pub fn new(
        config: SynthesisConfig,
        collaborators: Collaborators,
        cache: Arc<TranscriptCache>,
        event_sink: Arc<dyn SynthesisEventSink>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;

        let conditioner = ReferenceConditioner::new(
            ConditionerSettings::from(&config),
            cache,
            collaborators.transcriber.clone(),
        );
        let driver = SynthesisDriver::new(
            collaborators.model,
            collaborators.vocoder,
            SynthesisParams::from(&config),
        )
        .with_event_sink(event_sink.clone());
        let evaluator = QualityEvaluator::new(
            collaborators.transcriber,
            config.language().map(str::to_string),
        );

        Ok(Self {
            config,
            conditioner,
            driver,
            evaluator,
            event_sink,
        })
    }

    pub fn config(&self) -> &SynthesisConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<TranscriptCache> {
        self.conditioner.cache()
    }

    /// Run a request end to end on the calling thread.
    pub fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisOutput, PipelineError> {
        let text = normalize_generation_text(&request.text)?;

        let (ref_audio, ref_text) = match &request.reference {
            ReferenceSource::Wav(bytes) => self.conditioner.condition(bytes, &request.reference_text)?,
            ReferenceSource::Clip(clip) => self
                .conditioner
                .condition_clip(clip.clone(), &request.reference_text)?,
        };
        self.emit(SynthesisEvent::ReferenceReady {
            fingerprint: ref_audio.fingerprint().to_string(),
            duration_secs: ref_audio.duration_secs(),
            transcript_origin: ref_text.origin(),
        });

        let max_chars = chunk_budget(ref_audio.duration_secs() as f64, ref_text.byte_len());
        let chunks = segment(&text, max_chars);
        self.emit(SynthesisEvent::Segmented {
            chunk_count: chunks.len(),
            max_chars,
        });

        let mut report = self.driver.synthesize(&ref_audio, ref_text.text(), &chunks)?;

        if self.config.remove_silence {
            let before = report.waveform.samples.len();
            report.waveform.samples =
                remove_long_silences(&report.waveform.samples, report.waveform.sample_rate);
            log::debug!(
                "[Pipeline] Silence removal: {} -> {} samples",
                before,
                report.waveform.samples.len()
            );
        }

        let evaluation = if self.config.evaluate {
            let result = self.evaluator.evaluate(&report.waveform, &text);
            self.emit(SynthesisEvent::Evaluated {
                wer: result.wer,
                cer: result.cer,
            });
            Some(result)
        } else {
            None
        };

        Ok(SynthesisOutput {
            report,
            chunks,
            max_chars,
            reference_fingerprint: ref_audio.fingerprint().to_string(),
            reference_text: ref_text.text().to_string(),
            evaluation,
        })
    }

    /// Score an existing waveform against the text it was generated from.
    pub fn evaluate(&self, waveform: &StitchedWaveform, original_text: &str) -> EvaluationResult {
        self.evaluator.evaluate(waveform, original_text)
    }

    fn emit(&self, event: SynthesisEvent) {
        self.event_sink.on_event(event);
    }
}

/// Run a request on tokio's blocking pool so async hosts are not stalled by
/// model inference.
pub async fn synthesize_on_worker(
    pipeline: Arc<VoicePipeline>,
    request: SynthesisRequest,
) -> Result<SynthesisOutput, PipelineError> {
    tokio::task::spawn_blocking(move || pipeline.synthesize(&request))
        .await
        .map_err(|e| PipelineError::Worker(e.to_string()))?
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Audio(#[from] AudioError),
    #[error(transparent)]
    Reference(#[from] ReferenceError),
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
    #[error("Worker task failed: {0}")]
    Worker(String),
}

impl PipelineError {
    /// True when the request itself was unacceptable, as opposed to an
    /// engine or audio failure.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::Reference(ReferenceError::Validation(_))
                | Self::Synthesis(SynthesisError::Validation(_))
        )
    }
}
