// Story Voice - Quality evaluation
// Transcribes synthesized audio and scores it against the text it was
// generated from. Evaluation never fails a request: a missing transcript
// just yields rates that are not computable.

use serde::Serialize;
use std::sync::Arc;

use crate::audio::resample;
use crate::collaborators::Transcriber;
use crate::scoring::{score, ErrorRates};
use crate::segment::whitespace_run;
use crate::stitch::StitchedWaveform;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationResult {
    pub transcript: String,
    pub wer: Option<f32>,
    pub cer: Option<f32>,
    /// RFC 3339 timestamp of when the score was taken
    pub evaluated_at: String,
}

impl EvaluationResult {
    pub fn rates(&self) -> ErrorRates {
        ErrorRates {
            wer: self.wer,
            cer: self.cer,
        }
    }
}

pub struct QualityEvaluator {
    transcriber: Arc<dyn Transcriber>,
    language: Option<String>,
}

impl QualityEvaluator {
    pub fn new(transcriber: Arc<dyn Transcriber>, language: Option<String>) -> Self {
        Self {
            transcriber,
            language,
        }
    }

    pub fn evaluate(&self, waveform: &StitchedWaveform, original_text: &str) -> EvaluationResult {
        let transcript = self.transcribe(waveform).unwrap_or_default();
        let rates = score(original_text, &transcript);

        match (rates.wer, rates.cer) {
            (Some(wer), Some(cer)) => {
                log::info!("[Evaluate] WER {:.3}, CER {:.3}", wer, cer)
            }
            _ => log::info!("[Evaluate] Rates not computable"),
        }

        EvaluationResult {
            transcript,
            wer: rates.wer,
            cer: rates.cer,
            evaluated_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    fn transcribe(&self, waveform: &StitchedWaveform) -> Option<String> {
        if waveform.samples.is_empty() {
            return None;
        }

        let target_rate = self.transcriber.sample_rate();
        let samples = match resample(&waveform.samples, waveform.sample_rate, target_rate) {
            Ok(samples) => samples,
            Err(e) => {
                log::warn!("[Evaluate] Resample to {}Hz failed: {}", target_rate, e);
                return None;
            }
        };

        match self.transcriber.transcribe(&samples, self.language.as_deref()) {
            Ok(text) => {
                let collapsed = match whitespace_run() {
                    Some(re) => re.replace_all(text.trim(), " ").into_owned(),
                    None => text.trim().to_string(),
                };
                Some(collapsed)
            }
            Err(e) => {
                log::warn!("[Evaluate] Transcription failed: {}", e);
                None
            }
        }
    }
}
