// Story Voice - Reference Audio Conditioner
// Turns an uploaded voice sample into conditioning audio plus transcript.
//
// The clip is bounded to [min, max] seconds. Over-long clips are cut at
// natural pauses where possible. Quiet edges are trimmed and a short pad is
// appended. A missing transcript is produced by the speech-to-text engine
// and cached by the clip's content fingerprint.

use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::audio::{
    self, decode_wav, ms_to_samples, resample, split_on_silence, trim_silence_edges, AudioClip,
    AudioError, SilenceParams,
};
use crate::audio_quality::{AudioQuality, AudioQualityGate};
use crate::cache::TranscriptCache;
use crate::collaborators::{CollaboratorError, Transcriber};
use crate::config::SynthesisConfig;
use crate::segment::whitespace_run;
use crate::validation::{ensure_min_duration, ValidationError};

/// Edge silence threshold in dBFS
const EDGE_SILENCE_DB: f32 = -42.0;
/// Silence appended after trimming
const TAIL_PAD_MS: u32 = 50;
/// Audio kept before the accumulator may stop at a segment boundary
const MIN_KEPT_BEFORE_CUT_SECS: f32 = 6.0;

/// Silence splitting passes tried in order when a clip is too long.
const TRIM_PASSES: [SilenceParams; 2] = [
    SilenceParams {
        min_silence_ms: 1000,
        threshold_db: -50.0,
        keep_silence_ms: 1000,
        seek_step_ms: 10,
    },
    SilenceParams {
        min_silence_ms: 100,
        threshold_db: -40.0,
        keep_silence_ms: 1000,
        seek_step_ms: 10,
    },
];

/// Conditioning audio ready for the acoustic model.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceAudio {
    samples: Vec<f32>,
    sample_rate: u32,
    source_duration_secs: f32,
    rms: f32,
    fingerprint: String,
}

impl ReferenceAudio {
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Duration of the clip as uploaded.
    pub fn source_duration_secs(&self) -> f32 {
        self.source_duration_secs
    }

    /// Duration after trimming and padding.
    pub fn duration_secs(&self) -> f32 {
        audio::samples_to_secs(self.samples.len(), self.sample_rate)
    }

    pub fn rms(&self) -> f32 {
        self.rms
    }

    /// Hex SHA-256 over the conditioned samples and their rate.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

/// Where a reference transcript came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptOrigin {
    Supplied,
    Cached,
    Transcribed,
}

/// Transcript paired with the fingerprint of its reference audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceTranscript {
    text: String,
    fingerprint: String,
    origin: TranscriptOrigin,
}

impl ReferenceTranscript {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn origin(&self) -> TranscriptOrigin {
        self.origin
    }

    pub fn byte_len(&self) -> usize {
        self.text.len()
    }
}

/// Conditioner settings, usually taken from [`SynthesisConfig`].
#[derive(Debug, Clone)]
pub struct ConditionerSettings {
    pub min_duration_secs: f32,
    pub max_duration_secs: f32,
    pub language: Option<String>,
    pub transcription_attempts: u32,
}

impl Default for ConditionerSettings {
    fn default() -> Self {
        Self::from(&SynthesisConfig::default())
    }
}

impl From<&SynthesisConfig> for ConditionerSettings {
    fn from(config: &SynthesisConfig) -> Self {
        Self {
            min_duration_secs: config.ref_audio_min_duration,
            max_duration_secs: config.ref_audio_max_duration,
            language: config.language().map(str::to_string),
            transcription_attempts: config.transcription_attempts.max(1),
        }
    }
}

pub struct ReferenceConditioner {
    settings: ConditionerSettings,
    cache: Arc<TranscriptCache>,
    transcriber: Arc<dyn Transcriber>,
    quality_gate: AudioQualityGate,
}

impl ReferenceConditioner {
    pub fn new(
        settings: ConditionerSettings,
        cache: Arc<TranscriptCache>,
        transcriber: Arc<dyn Transcriber>,
    ) -> Self {
        Self {
            settings,
            cache,
            transcriber,
            quality_gate: AudioQualityGate::new(),
        }
    }

    pub fn settings(&self) -> &ConditionerSettings {
        &self.settings
    }

    pub fn cache(&self) -> &Arc<TranscriptCache> {
        &self.cache
    }

    /// Condition an encoded WAV upload.
    pub fn condition(
        &self,
        raw_audio: &[u8],
        raw_transcript: &str,
    ) -> Result<(ReferenceAudio, ReferenceTranscript), ReferenceError> {
        let clip = decode_wav(raw_audio)?;
        self.condition_clip(clip, raw_transcript)
    }

    /// Condition already-decoded mono audio.
    pub fn condition_clip(
        &self,
        clip: AudioClip,
        raw_transcript: &str,
    ) -> Result<(ReferenceAudio, ReferenceTranscript), ReferenceError> {
        let audio = self.prepare_audio(clip)?;
        let transcript = self.resolve_transcript(&audio, raw_transcript)?;
        Ok((audio, transcript))
    }

    /// Validate, shorten, edge-trim, pad and fingerprint a reference clip.
    pub fn prepare_audio(&self, clip: AudioClip) -> Result<ReferenceAudio, ReferenceError> {
        if clip.sample_rate == 0 {
            return Err(AudioError::Decode("Invalid sample rate: 0".to_string()).into());
        }

        let sample_rate = clip.sample_rate;
        let source_duration_secs = clip.duration_secs();
        ensure_min_duration(source_duration_secs, self.settings.min_duration_secs)?;

        match self.quality_gate.check(&clip.samples) {
            AudioQuality::TooQuiet => log::warn!(
                "[Reference] Low volume reference (rms {:.4}), cloning quality may suffer",
                AudioQualityGate::calculate_rms(&clip.samples)
            ),
            AudioQuality::Clipping => log::warn!("[Reference] Reference audio is clipping"),
            AudioQuality::Good | AudioQuality::Empty => {}
        }

        let max_samples = secs_to_samples(self.settings.max_duration_secs, sample_rate);
        let samples = if clip.samples.len() > max_samples {
            shorten_to_max(&clip.samples, sample_rate, max_samples)
        } else {
            clip.samples
        };

        let pad = ms_to_samples(TAIL_PAD_MS, sample_rate);
        let kept = trim_silence_edges(&samples, sample_rate, EDGE_SILENCE_DB);
        let mut conditioned = samples[kept].to_vec();
        conditioned.truncate(max_samples.saturating_sub(pad));
        conditioned.extend(std::iter::repeat(0.0).take(pad));

        let duration_secs = audio::samples_to_secs(conditioned.len(), sample_rate);
        ensure_min_duration(duration_secs, self.settings.min_duration_secs)?;

        let fingerprint = fingerprint(&conditioned, sample_rate);
        log::info!(
            "[Reference] {:.2}s -> {:.2}s at {}Hz ({})",
            source_duration_secs,
            duration_secs,
            sample_rate,
            &fingerprint[..12]
        );

        Ok(ReferenceAudio {
            rms: audio::rms(&conditioned),
            samples: conditioned,
            sample_rate,
            source_duration_secs,
            fingerprint,
        })
    }

    /// Normalize a supplied transcript, or fetch/produce one for the clip.
    pub fn resolve_transcript(
        &self,
        audio: &ReferenceAudio,
        raw_transcript: &str,
    ) -> Result<ReferenceTranscript, ReferenceError> {
        if !raw_transcript.trim().is_empty() {
            let text = normalize_transcript(raw_transcript).ok_or(ValidationError::EmptyTranscript)?;
            return Ok(ReferenceTranscript {
                text,
                fingerprint: audio.fingerprint.clone(),
                origin: TranscriptOrigin::Supplied,
            });
        }

        let lookup = self
            .cache
            .get_or_try_insert_with(&audio.fingerprint, || self.transcribe_with_retry(audio))?;
        let origin = if lookup.is_hit() {
            TranscriptOrigin::Cached
        } else {
            TranscriptOrigin::Transcribed
        };

        let text =
            normalize_transcript(&lookup.into_inner()).ok_or(ValidationError::EmptyTranscript)?;
        log::info!("[Reference] Transcript ({:?}): '{}'", origin, text);

        Ok(ReferenceTranscript {
            text,
            fingerprint: audio.fingerprint.clone(),
            origin,
        })
    }

    fn transcribe_with_retry(&self, audio: &ReferenceAudio) -> Result<String, ReferenceError> {
        let target_rate = self.transcriber.sample_rate();
        let samples = resample(&audio.samples, audio.sample_rate, target_rate)?;
        let language = self.settings.language.as_deref();
        let attempts = self.settings.transcription_attempts.max(1);

        let mut last_error = ReferenceError::from(ValidationError::EmptyTranscript);
        for attempt in 1..=attempts {
            match self.transcriber.transcribe(&samples, language) {
                Ok(text) if !text.trim().is_empty() => return Ok(text.trim().to_string()),
                Ok(_) => {
                    log::warn!(
                        "[Reference] Transcription attempt {}/{} returned empty text",
                        attempt,
                        attempts
                    );
                    last_error = ValidationError::EmptyTranscript.into();
                }
                Err(e) => {
                    log::warn!(
                        "[Reference] Transcription attempt {}/{} failed: {}",
                        attempt,
                        attempts,
                        e
                    );
                    last_error = e.into();
                }
            }
        }

        Err(last_error)
    }
}

/// Collapse whitespace and end the transcript with terminal punctuation
/// plus a separator. Returns `None` for blank input.
pub fn normalize_transcript(text: &str) -> Option<String> {
    let collapsed = match whitespace_run() {
        Some(re) => re.replace_all(text, " ").trim().to_string(),
        None => text.split_whitespace().collect::<Vec<_>>().join(" "),
    };

    let last = collapsed.chars().last()?;
    let mut normalized = collapsed;
    match last {
        '。' | '！' | '？' => {}
        '.' | '!' | '?' => normalized.push(' '),
        _ => normalized.push_str(". "),
    }
    Some(normalized)
}

fn secs_to_samples(secs: f32, sample_rate: u32) -> usize {
    (secs.max(0.0) as f64 * sample_rate as f64).round() as usize
}

/// Keep voiced segments in order until adding the next one would pass the
/// limit. A lenient second pass runs when the strict one keeps too much,
/// and whatever is still too long is truncated.
fn shorten_to_max(samples: &[f32], sample_rate: u32, max_samples: usize) -> Vec<f32> {
    let min_keep = secs_to_samples(MIN_KEPT_BEFORE_CUT_SECS, sample_rate).min(max_samples);
    let mut kept = Vec::new();

    for (pass, params) in TRIM_PASSES.iter().enumerate() {
        kept.clear();
        for range in split_on_silence(samples, sample_rate, params) {
            if kept.len() > min_keep && kept.len() + range.len() > max_samples {
                break;
            }
            kept.extend_from_slice(&samples[range]);
        }

        if kept.len() <= max_samples {
            log::info!(
                "[Reference] Trimmed at silence (pass {}) to {:.2}s",
                pass + 1,
                audio::samples_to_secs(kept.len(), sample_rate)
            );
            return kept;
        }
    }

    log::info!("[Reference] No usable pause, truncating to max duration");
    kept.truncate(max_samples);
    kept
}

fn fingerprint(samples: &[f32], sample_rate: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sample_rate.to_le_bytes());
    for sample in samples {
        hasher.update(sample.to_le_bytes());
    }
    hex::encode(hasher.finalize())
}

#[derive(Debug, thiserror::Error)]
pub enum ReferenceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Audio(#[from] AudioError),
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SR: u32 = 16_000;

    fn tone(secs: f32) -> Vec<f32> {
        let n = (secs * SR as f32) as usize;
        (0..n)
            .map(|i| 0.3 * (2.0 * std::f32::consts::PI * 180.0 * i as f32 / SR as f32).sin())
            .collect()
    }

    fn silence(secs: f32) -> Vec<f32> {
        vec![0.0; (secs * SR as f32) as usize]
    }

    struct ScriptedTranscriber {
        calls: AtomicUsize,
        script: Mutex<VecDeque<Result<String, CollaboratorError>>>,
        fallback: String,
    }

    impl ScriptedTranscriber {
        fn always(text: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                script: Mutex::new(VecDeque::new()),
                fallback: text.to_string(),
            }
        }

        fn scripted(script: Vec<Result<String, CollaboratorError>>, fallback: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                script: Mutex::new(script.into()),
                fallback: fallback.to_string(),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Transcriber for ScriptedTranscriber {
        fn transcribe(&self, _samples: &[f32], language: Option<&str>) -> Result<String, CollaboratorError> {
            assert_eq!(language, Some("vi"));
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(self.fallback.clone()))
        }
    }

    fn conditioner(transcriber: Arc<ScriptedTranscriber>) -> ReferenceConditioner {
        ReferenceConditioner::new(
            ConditionerSettings::default(),
            Arc::new(TranscriptCache::new()),
            transcriber,
        )
    }

    #[test]
    fn too_short_reference_fails_before_transcription() {
        let stt = Arc::new(ScriptedTranscriber::always("không được gọi"));
        let conditioner = conditioner(stt.clone());

        let err = conditioner
            .condition_clip(AudioClip::new(tone(2.0), SR), "")
            .expect_err("2s clip must be rejected");
        assert!(matches!(
            err,
            ReferenceError::Validation(ValidationError::ReferenceTooShort { .. })
        ));
        assert_eq!(stt.calls(), 0);
    }

    #[test]
    fn trims_edges_and_appends_pad() {
        let stt = Arc::new(ScriptedTranscriber::always("x"));
        let conditioner = conditioner(stt);

        let mut samples = silence(0.5);
        samples.extend(tone(4.0));
        samples.extend(silence(0.5));

        let audio = conditioner
            .prepare_audio(AudioClip::new(samples, SR))
            .expect("conditioning should succeed");
        assert!((audio.source_duration_secs() - 5.0).abs() < 1e-3);
        assert!((audio.duration_secs() - 4.05).abs() < 0.01, "{}", audio.duration_secs());
        assert!(audio.samples().iter().rev().take(800).all(|&s| s == 0.0));
        assert!(audio.rms() > 0.1);
    }

    #[test]
    fn long_continuous_clip_is_truncated_to_max() {
        let conditioner = conditioner(Arc::new(ScriptedTranscriber::always("x")));
        let audio = conditioner
            .prepare_audio(AudioClip::new(tone(20.0), SR))
            .expect("conditioning should succeed");
        assert!(audio.duration_secs() <= 15.0 + 1e-6);
        assert!(audio.duration_secs() > 14.9);
        assert!((audio.source_duration_secs() - 20.0).abs() < 1e-3);
    }

    #[test]
    fn long_clip_is_cut_at_a_pause() {
        let mut samples = Vec::new();
        for _ in 0..4 {
            samples.extend(tone(4.0));
            samples.extend(silence(1.5));
        }

        let conditioner = conditioner(Arc::new(ScriptedTranscriber::always("x")));
        let audio = conditioner
            .prepare_audio(AudioClip::new(samples, SR))
            .expect("conditioning should succeed");
        // two voiced segments fit, the third would pass 15s
        assert!(audio.duration_secs() <= 15.0);
        assert!(audio.duration_secs() > 6.0, "{}", audio.duration_secs());
    }

    #[test]
    fn supplied_transcript_is_normalized_and_not_transcribed() {
        let stt = Arc::new(ScriptedTranscriber::always("unused"));
        let conditioner = conditioner(stt.clone());

        let (audio, transcript) = conditioner
            .condition_clip(AudioClip::new(tone(4.0), SR), "  Xin   chào\nthế giới ")
            .unwrap();
        assert_eq!(transcript.text(), "Xin chào thế giới. ");
        assert_eq!(transcript.origin(), TranscriptOrigin::Supplied);
        assert_eq!(transcript.fingerprint(), audio.fingerprint());
        assert_eq!(stt.calls(), 0);
    }

    #[test]
    fn blank_transcript_is_transcribed_once_then_cached() {
        let stt = Arc::new(ScriptedTranscriber::always("ngày xưa có một cô bé"));
        let conditioner = conditioner(stt.clone());

        let (_, first) = conditioner
            .condition_clip(AudioClip::new(tone(4.0), SR), "   ")
            .unwrap();
        let (_, second) = conditioner
            .condition_clip(AudioClip::new(tone(4.0), SR), "")
            .unwrap();

        assert_eq!(first.origin(), TranscriptOrigin::Transcribed);
        assert_eq!(second.origin(), TranscriptOrigin::Cached);
        assert_eq!(first.text(), "ngày xưa có một cô bé. ");
        assert_eq!(second.text(), first.text());
        assert_eq!(stt.calls(), 1);
    }

    #[test]
    fn empty_transcription_is_fatal_after_retries() {
        let stt = Arc::new(ScriptedTranscriber::always("   "));
        let conditioner = conditioner(stt.clone());

        let err = conditioner
            .condition_clip(AudioClip::new(tone(4.0), SR), "")
            .expect_err("blank transcription must fail");
        assert!(matches!(
            err,
            ReferenceError::Validation(ValidationError::EmptyTranscript)
        ));
        assert_eq!(stt.calls(), 3);
        assert!(conditioner.cache().is_empty());
    }

    #[test]
    fn transcription_errors_are_retried() {
        let stt = Arc::new(ScriptedTranscriber::scripted(
            vec![
                Err(CollaboratorError::Transcription("busy".to_string())),
                Err(CollaboratorError::Transcription("busy".to_string())),
            ],
            "cuối cùng cũng được",
        ));
        let conditioner = conditioner(stt.clone());

        let (_, transcript) = conditioner
            .condition_clip(AudioClip::new(tone(4.0), SR), "")
            .unwrap();
        assert_eq!(transcript.text(), "cuối cùng cũng được. ");
        assert_eq!(stt.calls(), 3);
    }

    #[test]
    fn persistent_transcription_error_is_reported() {
        let stt = Arc::new(ScriptedTranscriber::scripted(
            vec![
                Err(CollaboratorError::Transcription("down".to_string())),
                Err(CollaboratorError::Transcription("down".to_string())),
                Err(CollaboratorError::Transcription("down".to_string())),
            ],
            "never reached",
        ));
        let err = conditioner(stt)
            .condition_clip(AudioClip::new(tone(4.0), SR), "")
            .expect_err("should fail");
        assert!(matches!(err, ReferenceError::Collaborator(_)));
    }

    #[test]
    fn wav_upload_is_decoded() {
        let bytes = audio::encode_wav(&tone(3.5), SR).unwrap();
        let conditioner = conditioner(Arc::new(ScriptedTranscriber::always("x")));
        let (audio, transcript) = conditioner.condition(&bytes, "Hello.").unwrap();
        assert_eq!(audio.sample_rate(), SR);
        assert_eq!(transcript.text(), "Hello. ");

        let err = conditioner.condition(b"not audio", "Hello.").unwrap_err();
        assert!(matches!(err, ReferenceError::Audio(_)));
    }

    #[test]
    fn fingerprint_tracks_content() {
        let conditioner = conditioner(Arc::new(ScriptedTranscriber::always("x")));
        let a = conditioner.prepare_audio(AudioClip::new(tone(4.0), SR)).unwrap();
        let b = conditioner.prepare_audio(AudioClip::new(tone(4.0), SR)).unwrap();
        let c = conditioner.prepare_audio(AudioClip::new(tone(4.5), SR)).unwrap();

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn transcript_normalization_rules() {
        assert_eq!(normalize_transcript("xin chào.").as_deref(), Some("xin chào. "));
        assert_eq!(normalize_transcript("thật sao?").as_deref(), Some("thật sao? "));
        assert_eq!(normalize_transcript("你好。").as_deref(), Some("你好。"));
        assert_eq!(normalize_transcript("a  b").as_deref(), Some("a b. "));
        assert_eq!(normalize_transcript(" \n "), None);
    }
}
