// Story Voice - Batch Synthesis Driver
// Renders each text chunk against the fixed reference voice, one chunk at a
// time, and stitches the successful segments.
//
// A failing chunk is recorded and skipped. The request only fails when no
// chunk produced audio.

use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audio::{resample, AudioError};
use crate::audio_quality::LoudnessNormalizer;
use crate::collaborators::{AcousticModel, CollaboratorError, SampleRequest, Vocoder};
use crate::config::SynthesisConfig;
use crate::pipeline::{NoopEventSink, SynthesisEvent, SynthesisEventSink};
use crate::reference::ReferenceAudio;
use crate::segment::TextChunk;
use crate::stitch::{stitch, StitchedWaveform};
use crate::validation::ValidationError;
use crate::watchdog::ChunkDeadline;

/// Chunks shorter than this many bytes are rendered at [`SLOW_CHUNK_SPEED`].
pub const SLOW_CHUNK_BYTES: usize = 20;
pub const SLOW_CHUNK_SPEED: f32 = 0.5;

/// Per-request synthesis parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisParams {
    pub cross_fade_duration: f32,
    pub target_rms: f32,
    pub nfe_step: u32,
    pub cfg_strength: f32,
    pub sway_sampling_coef: f32,
    pub speed: f32,
    pub fix_duration: Option<f32>,
    pub chunk_timeout: Option<Duration>,
}

impl Default for SynthesisParams {
    fn default() -> Self {
        Self::from(&SynthesisConfig::default())
    }
}

impl From<&SynthesisConfig> for SynthesisParams {
    fn from(config: &SynthesisConfig) -> Self {
        Self {
            cross_fade_duration: config.cross_fade_duration,
            target_rms: config.target_rms,
            nfe_step: config.nfe_step,
            cfg_strength: config.cfg_strength,
            sway_sampling_coef: config.sway_sampling_coef,
            speed: config.speed,
            fix_duration: config.fix_duration,
            chunk_timeout: config.chunk_timeout(),
        }
    }
}

/// Waveform rendered for one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedSegment {
    pub index: usize,
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChunkFailureReason {
    Collaborator { message: String },
    TimedOut { elapsed_ms: u64, limit_ms: u64 },
    Panicked { message: String },
}

impl std::fmt::Display for ChunkFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Collaborator { message } => write!(f, "{}", message),
            Self::TimedOut {
                elapsed_ms,
                limit_ms,
            } => write!(f, "timed out after {}ms (limit {}ms)", elapsed_ms, limit_ms),
            Self::Panicked { message } => write!(f, "collaborator panicked: {}", message),
        }
    }
}

/// A chunk that produced no audio.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkFailure {
    pub index: usize,
    pub text_preview: String,
    pub reason: ChunkFailureReason,
}

pub type ChunkOutcome = Result<SynthesizedSegment, ChunkFailure>;

/// Stitched audio plus what happened to each chunk.
#[derive(Debug, Clone)]
pub struct SynthesisReport {
    pub waveform: StitchedWaveform,
    pub chunk_count: usize,
    pub failures: Vec<ChunkFailure>,
    pub elapsed_ms: u64,
}

impl SynthesisReport {
    pub fn succeeded(&self) -> usize {
        self.chunk_count - self.failures.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct SynthesisDriver {
    model: Arc<dyn AcousticModel>,
    vocoder: Arc<dyn Vocoder>,
    params: SynthesisParams,
    event_sink: Arc<dyn SynthesisEventSink>,
}

impl SynthesisDriver {
    pub fn new(model: Arc<dyn AcousticModel>, vocoder: Arc<dyn Vocoder>, params: SynthesisParams) -> Self {
        Self {
            model,
            vocoder,
            params,
            event_sink: Arc::new(NoopEventSink),
        }
    }

    pub fn with_event_sink(mut self, event_sink: Arc<dyn SynthesisEventSink>) -> Self {
        self.event_sink = event_sink;
        self
    }

    pub fn params(&self) -> &SynthesisParams {
        &self.params
    }

    /// Render every chunk and stitch the successes in chunk order.
    pub fn synthesize(
        &self,
        ref_audio: &ReferenceAudio,
        ref_text: &str,
        chunks: &[TextChunk],
    ) -> Result<SynthesisReport, SynthesisError> {
        if chunks.is_empty() {
            return Err(ValidationError::EmptyGenerationText.into());
        }
        if ref_text.trim().is_empty() {
            return Err(ValidationError::EmptyTranscript.into());
        }

        let started = Instant::now();
        let outcomes = self.render_all(ref_audio, ref_text, chunks)?;

        let mut segments = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(segment) => segments.push(segment),
                Err(failure) => failures.push(failure),
            }
        }

        if segments.is_empty() {
            log::error!("[Synthesis] All {} chunks failed", chunks.len());
            return Err(SynthesisError::AllChunksFailed {
                attempted: chunks.len(),
                failures,
            });
        }

        let sample_rate = self.model.sample_rate();
        let waves: Vec<Vec<f32>> = segments.into_iter().map(|s| s.samples).collect();
        let samples = stitch(&waves, self.params.cross_fade_duration, sample_rate);
        let waveform = StitchedWaveform {
            samples,
            sample_rate,
        };

        self.event_sink.on_event(SynthesisEvent::Stitched {
            segments: waves.len(),
            failed: failures.len(),
            duration_secs: waveform.duration_secs(),
        });

        Ok(SynthesisReport {
            waveform,
            chunk_count: chunks.len(),
            failures,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Render each chunk in order, returning one outcome per chunk.
    pub fn render_all(
        &self,
        ref_audio: &ReferenceAudio,
        ref_text: &str,
        chunks: &[TextChunk],
    ) -> Result<Vec<ChunkOutcome>, SynthesisError> {
        let normalizer = LoudnessNormalizer::new(self.params.target_rms);
        let normalized = normalizer.normalize(ref_audio.samples());

        let model_rate = self.model.sample_rate();
        let conditioning = resample(&normalized.samples, ref_audio.sample_rate(), model_rate)?;

        let mut ref_text = ref_text.to_string();
        if ref_text.chars().last().is_some_and(|c| c.len_utf8() == 1 && !c.is_whitespace()) {
            ref_text.push(' ');
        }

        let hop = self.model.hop_length().max(1);
        let context = ChunkContext {
            conditioning: &conditioning,
            ref_text: &ref_text,
            ref_frames: conditioning.len() / hop,
            gain: normalized.gain,
            normalizer,
        };

        let total = chunks.len();
        let mut deadline = ChunkDeadline::new(self.params.chunk_timeout);
        let mut outcomes = Vec::with_capacity(total);

        for chunk in chunks {
            let preview = preview(&chunk.text);
            self.event_sink.on_event(SynthesisEvent::ChunkStarted {
                index: chunk.index,
                total,
                preview: preview.clone(),
            });

            let chunk_started = Instant::now();
            deadline.begin();
            let rendered = panic::catch_unwind(AssertUnwindSafe(|| self.render_chunk(&context, chunk)));
            let overrun = deadline.finish();

            let result = match (rendered, overrun) {
                (_, Some(event)) => Err(ChunkFailureReason::TimedOut {
                    elapsed_ms: event.elapsed.as_millis() as u64,
                    limit_ms: event.limit.as_millis() as u64,
                }),
                (Ok(Ok(samples)), None) => Ok(samples),
                (Ok(Err(e)), None) => Err(ChunkFailureReason::Collaborator {
                    message: e.to_string(),
                }),
                (Err(payload), None) => Err(ChunkFailureReason::Panicked {
                    message: panic_message(payload.as_ref()),
                }),
            };

            match result {
                Ok(samples) => {
                    self.event_sink.on_event(SynthesisEvent::ChunkFinished {
                        index: chunk.index,
                        total,
                        samples: samples.len(),
                        elapsed_ms: chunk_started.elapsed().as_millis() as u64,
                    });
                    outcomes.push(Ok(SynthesizedSegment {
                        index: chunk.index,
                        samples,
                        sample_rate: model_rate,
                    }));
                }
                Err(reason) => {
                    log::warn!(
                        "[Synthesis] Chunk {}/{} failed, skipping: {}",
                        chunk.index + 1,
                        total,
                        reason
                    );
                    self.event_sink.on_event(SynthesisEvent::ChunkFailed {
                        index: chunk.index,
                        total,
                        reason: reason.to_string(),
                    });
                    outcomes.push(Err(ChunkFailure {
                        index: chunk.index,
                        text_preview: preview,
                        reason,
                    }));
                }
            }
        }

        Ok(outcomes)
    }

    /// Frames to request for a chunk: the conditioning frames plus the
    /// chunk's share at the reference speech rate.
    pub fn estimate_total_frames(&self, ref_frames: usize, ref_text_bytes: usize, chunk_bytes: usize) -> usize {
        if let Some(fixed) = self.params.fix_duration {
            let hop = self.model.hop_length().max(1);
            return (fixed as f64 * self.model.sample_rate() as f64 / hop as f64) as usize;
        }

        let speed = chunk_speed(chunk_bytes, self.params.speed) as f64;
        let per_byte = ref_frames as f64 / ref_text_bytes.max(1) as f64;
        ref_frames + (per_byte * chunk_bytes as f64 / speed) as usize
    }

    fn render_chunk(&self, context: &ChunkContext<'_>, chunk: &TextChunk) -> Result<Vec<f32>, CollaboratorError> {
        let total_frames =
            self.estimate_total_frames(context.ref_frames, context.ref_text.len(), chunk.text.len());
        let text = format!("{}{}", context.ref_text, chunk.text);

        log::debug!(
            "[Synthesis] Chunk {}: '{}' ({} bytes, {} frames)",
            chunk.index + 1,
            preview(&chunk.text),
            chunk.text.len(),
            total_frames
        );

        let frames = self.model.sample(&SampleRequest {
            conditioning: context.conditioning,
            text: &text,
            total_frames,
            steps: self.params.nfe_step,
            cfg_strength: self.params.cfg_strength,
            sway_sampling_coef: self.params.sway_sampling_coef,
        })?;

        let generated = frames.split_off_prefix(context.ref_frames).ok_or_else(|| {
            CollaboratorError::UnusableOutput(format!(
                "model returned {} frames, fewer than the {} conditioning frames",
                frames.num_frames(),
                context.ref_frames
            ))
        })?;
        if generated.is_empty() {
            return Err(CollaboratorError::UnusableOutput(
                "model generated no frames past the conditioning prefix".to_string(),
            ));
        }

        let mut wave = self.vocoder.decode(&generated)?;
        if wave.is_empty() {
            return Err(CollaboratorError::UnusableOutput(
                "vocoder returned an empty waveform".to_string(),
            ));
        }
        if wave.iter().any(|s| !s.is_finite()) {
            return Err(CollaboratorError::UnusableOutput(
                "vocoder returned non-finite samples".to_string(),
            ));
        }

        context.normalizer.restore(&mut wave, context.gain);
        Ok(wave)
    }
}

struct ChunkContext<'a> {
    conditioning: &'a [f32],
    ref_text: &'a str,
    ref_frames: usize,
    gain: f32,
    normalizer: LoudnessNormalizer,
}

/// Speed for a chunk: short chunks are slowed down.
pub fn chunk_speed(chunk_bytes: usize, speed: f32) -> f32 {
    if chunk_bytes < SLOW_CHUNK_BYTES {
        SLOW_CHUNK_SPEED
    } else {
        speed
    }
}

fn preview(text: &str) -> String {
    text.chars().take(30).collect()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Audio(#[from] AudioError),
    #[error("All {attempted} chunks failed")]
    AllChunksFailed {
        attempted: usize,
        failures: Vec<ChunkFailure>,
    },
}
