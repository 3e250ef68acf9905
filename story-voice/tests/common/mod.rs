#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use story_voice::audio::rms;
use story_voice::{
    AcousticFrames, AcousticModel, CollaboratorError, Collaborators, SampleRequest,
    SynthesisEvent, SynthesisEventSink, Transcriber, Vocoder,
};

pub const MODEL_RATE: u32 = 24_000;
pub const HOP: usize = 256;

/// 220 Hz sine, loud enough to survive edge trimming.
pub fn tone(secs: f32, sample_rate: u32, amplitude: f32) -> Vec<f32> {
    let n = (secs * sample_rate as f32) as usize;
    (0..n)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            amplitude * (2.0 * std::f32::consts::PI * 220.0 * t).sin()
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct ModelCall {
    pub text: String,
    pub conditioning_len: usize,
    pub conditioning_rms: f32,
    pub total_frames: usize,
    pub steps: u32,
}

/// Acoustic model whose behaviour is keyed on markers in the request text.
#[derive(Default)]
pub struct ScriptedModel {
    pub fail_on: Option<&'static str>,
    pub panic_on: Option<&'static str>,
    pub truncate_on: Option<&'static str>,
    pub slow_on: Option<(&'static str, Duration)>,
    /// Frame value per marker; unmatched chunks get 0.05.
    pub levels: Vec<(&'static str, f32)>,
    pub calls: Mutex<Vec<ModelCall>>,
}

impl ScriptedModel {
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl AcousticModel for ScriptedModel {
    fn sample(&self, request: &SampleRequest<'_>) -> Result<AcousticFrames, CollaboratorError> {
        self.calls.lock().push(ModelCall {
            text: request.text.to_string(),
            conditioning_len: request.conditioning.len(),
            conditioning_rms: rms(request.conditioning),
            total_frames: request.total_frames,
            steps: request.steps,
        });

        let text = request.text;
        if let Some(marker) = self.fail_on.filter(|m| text.contains(m)) {
            return Err(CollaboratorError::Model(format!("cannot render '{}'", marker)));
        }
        if let Some(marker) = self.panic_on.filter(|m| text.contains(m)) {
            panic!("model exploded on {}", marker);
        }
        if let Some((marker, delay)) = self.slow_on {
            if text.contains(marker) {
                std::thread::sleep(delay);
            }
        }

        let frames = if self.truncate_on.is_some_and(|m| text.contains(m)) {
            1
        } else {
            request.total_frames
        };
        let level = self
            .levels
            .iter()
            .find(|(marker, _)| text.contains(marker))
            .map(|(_, level)| *level)
            .unwrap_or(0.05);

        Ok(AcousticFrames::new(4, vec![level; frames * 4]))
    }
}

/// Vocoder that holds each frame's first value for one hop.
#[derive(Default)]
pub struct HoldVocoder {
    pub lengths: Mutex<Vec<usize>>,
}

impl Vocoder for HoldVocoder {
    fn decode(&self, frames: &AcousticFrames) -> Result<Vec<f32>, CollaboratorError> {
        let mut wave = Vec::with_capacity(frames.num_frames() * HOP);
        for index in 0..frames.num_frames() {
            let value = frames.frame(index).map(|f| f[0]).unwrap_or(0.0);
            wave.extend(std::iter::repeat(value).take(HOP));
        }
        self.lengths.lock().push(wave.len());
        Ok(wave)
    }
}

/// Transcriber returning a fixed reply and counting calls.
pub struct CountingTranscriber {
    reply: String,
    calls: AtomicUsize,
    pub languages: Mutex<Vec<Option<String>>>,
}

impl CountingTranscriber {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
            languages: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transcriber for CountingTranscriber {
    fn transcribe(&self, _samples: &[f32], language: Option<&str>) -> Result<String, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.languages.lock().push(language.map(str::to_string));
        Ok(self.reply.clone())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<SynthesisEvent>>,
}

impl RecordingSink {
    pub fn count(&self, pred: impl Fn(&SynthesisEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }
}

impl SynthesisEventSink for RecordingSink {
    fn on_event(&self, event: SynthesisEvent) {
        self.events.lock().push(event);
    }
}

pub fn collaborators(
    model: Arc<ScriptedModel>,
    vocoder: Arc<HoldVocoder>,
    transcriber: Arc<CountingTranscriber>,
) -> Collaborators {
    Collaborators {
        model,
        vocoder,
        transcriber,
    }
}
