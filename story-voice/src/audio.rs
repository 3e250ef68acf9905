// Story Voice - Audio helpers
// WAV decode/encode, channel downmix, resampling and silence detection

use std::io::Cursor;
use std::ops::Range;
use std::path::Path;

/// Mono sample buffer with its sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioClip {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn duration_secs(&self) -> f32 {
        samples_to_secs(self.samples.len(), self.sample_rate)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

pub fn samples_to_secs(sample_count: usize, sample_rate: u32) -> f32 {
    if sample_rate == 0 {
        0.0
    } else {
        sample_count as f32 / sample_rate as f32
    }
}

pub fn ms_to_samples(ms: u32, sample_rate: u32) -> usize {
    (ms as u64 * sample_rate as u64 / 1000) as usize
}

// ============================================
// WAV I/O
// ============================================

/// Decode an in-memory WAV file to mono f32 samples.
///
/// Integer formats are scaled by their bit depth; multi-channel audio is
/// averaged down to one channel.
pub fn decode_wav(bytes: &[u8]) -> Result<AudioClip, AudioError> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| AudioError::Decode(format!("Failed to read WAV: {}", e)))?;

    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Err(AudioError::Decode("Invalid sample rate: 0".to_string()));
    }
    if spec.channels == 0 {
        return Err(AudioError::Decode("Invalid channel count: 0".to_string()));
    }

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<_, _>>()
                .map_err(|e| AudioError::Decode(format!("Corrupt WAV samples: {}", e)))?
        }
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| AudioError::Decode(format!("Corrupt WAV samples: {}", e)))?,
    };

    let samples = downmix(&interleaved, spec.channels as usize);
    if samples.is_empty() {
        return Err(AudioError::Decode("WAV contains no samples".to_string()));
    }

    Ok(AudioClip::new(samples, spec.sample_rate))
}

pub fn read_wav(path: impl AsRef<Path>) -> Result<AudioClip, AudioError> {
    let bytes = std::fs::read(path.as_ref())?;
    decode_wav(&bytes)
}

/// Encode mono samples as a 16-bit PCM WAV file in memory.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, AudioError> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, pcm16_spec(sample_rate))
            .map_err(|e| AudioError::Encode(e.to_string()))?;
        for &sample in samples {
            writer
                .write_sample(to_pcm16(sample))
                .map_err(|e| AudioError::Encode(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| AudioError::Encode(e.to_string()))?;
    }
    Ok(cursor.into_inner())
}

/// Write mono samples to disk as a 16-bit PCM WAV file.
pub fn write_wav(path: impl AsRef<Path>, samples: &[f32], sample_rate: u32) -> Result<(), AudioError> {
    let mut writer = hound::WavWriter::create(path.as_ref(), pcm16_spec(sample_rate))
        .map_err(|e| AudioError::Encode(e.to_string()))?;
    for &sample in samples {
        writer
            .write_sample(to_pcm16(sample))
            .map_err(|e| AudioError::Encode(e.to_string()))?;
    }
    writer
        .finalize()
        .map_err(|e| AudioError::Encode(e.to_string()))
}

fn pcm16_spec(sample_rate: u32) -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

fn to_pcm16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Average interleaved frames down to one channel.
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

// ============================================
// Resampling
// ============================================

/// Resample mono audio with a windowed-sinc interpolator.
pub fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Result<Vec<f32>, AudioError> {
    if source_rate == target_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    if source_rate == 0 || target_rate == 0 {
        return Err(AudioError::Resample(format!(
            "Invalid sample rates {} -> {}",
            source_rate, target_rate
        )));
    }

    use rubato::{
        Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
    };

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(
        target_rate as f64 / source_rate as f64,
        2.0,
        params,
        samples.len(),
        1,
    )
    .map_err(|e| AudioError::Resample(format!("Resampler init failed: {:?}", e)))?;

    let input = vec![samples.to_vec()];
    let output = resampler
        .process(&input, None)
        .map_err(|e| AudioError::Resample(format!("Resampling failed: {:?}", e)))?;

    log::debug!(
        "[Audio] Resampled {} samples {}Hz -> {}Hz",
        samples.len(),
        source_rate,
        target_rate
    );

    Ok(output.into_iter().next().unwrap_or_default())
}

// ============================================
// Loudness and silence
// ============================================

pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

/// Full-scale-relative level of an RMS amplitude.
pub fn amplitude_to_dbfs(amplitude: f32) -> f32 {
    if amplitude <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * amplitude.log10()
    }
}

pub fn dbfs_to_amplitude(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// Parameters for silence-based splitting, in milliseconds and dBFS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SilenceParams {
    /// Shortest quiet stretch that counts as a gap
    pub min_silence_ms: u32,
    /// Windows at or below this level are silent
    pub threshold_db: f32,
    /// Silence retained on each side of a kept region
    pub keep_silence_ms: u32,
    /// Hop between analysis windows
    pub seek_step_ms: u32,
}

impl Default for SilenceParams {
    fn default() -> Self {
        Self {
            min_silence_ms: 1000,
            threshold_db: -50.0,
            keep_silence_ms: 1000,
            seek_step_ms: 10,
        }
    }
}

/// Running sum of squares so any window's RMS is O(1).
struct EnergyIndex {
    prefix: Vec<f64>,
}

impl EnergyIndex {
    fn new(samples: &[f32]) -> Self {
        let mut prefix = Vec::with_capacity(samples.len() + 1);
        let mut acc = 0.0f64;
        prefix.push(acc);
        for &s in samples {
            acc += (s as f64) * (s as f64);
            prefix.push(acc);
        }
        Self { prefix }
    }

    fn rms(&self, range: Range<usize>) -> f32 {
        let len = range.end.saturating_sub(range.start);
        if len == 0 {
            return 0.0;
        }
        let energy = (self.prefix[range.end] - self.prefix[range.start]).max(0.0);
        (energy / len as f64).sqrt() as f32
    }
}

/// Sample ranges quieter than the threshold for at least `min_silence_ms`.
pub fn detect_silence(samples: &[f32], sample_rate: u32, params: &SilenceParams) -> Vec<Range<usize>> {
    let window = ms_to_samples(params.min_silence_ms, sample_rate).max(1);
    if samples.len() < window {
        return Vec::new();
    }
    let step = ms_to_samples(params.seek_step_ms, sample_rate).max(1);
    let threshold = dbfs_to_amplitude(params.threshold_db);
    let energy = EnergyIndex::new(samples);

    let last_start = samples.len() - window;
    let mut starts: Vec<usize> = (0..=last_start).step_by(step).collect();
    if starts.last() != Some(&last_start) {
        starts.push(last_start);
    }

    let mut ranges: Vec<Range<usize>> = Vec::new();
    let mut prev_start: Option<usize> = None;

    for start in starts {
        if energy.rms(start..start + window) > threshold {
            continue;
        }
        match (prev_start, ranges.last_mut()) {
            (Some(prev), Some(current)) if start <= prev + step => {
                current.end = start + window;
            }
            _ => ranges.push(start..start + window),
        }
        prev_start = Some(start);
    }

    ranges
}

/// Complement of [`detect_silence`] over the whole buffer.
pub fn detect_nonsilent(samples: &[f32], sample_rate: u32, params: &SilenceParams) -> Vec<Range<usize>> {
    let silent = detect_silence(samples, sample_rate, params);
    if silent.is_empty() {
        return if samples.is_empty() {
            Vec::new()
        } else {
            vec![0..samples.len()]
        };
    }

    let mut ranges = Vec::new();
    let mut cursor = 0;
    for gap in silent {
        if gap.start > cursor {
            ranges.push(cursor..gap.start);
        }
        cursor = cursor.max(gap.end);
    }
    if cursor < samples.len() {
        ranges.push(cursor..samples.len());
    }
    ranges
}

/// Non-silent regions padded with `keep_silence_ms` on each side. Where two
/// padded regions would overlap they meet at the midpoint instead.
pub fn split_on_silence(samples: &[f32], sample_rate: u32, params: &SilenceParams) -> Vec<Range<usize>> {
    let keep = ms_to_samples(params.keep_silence_ms, sample_rate);
    let mut ranges: Vec<Range<usize>> = detect_nonsilent(samples, sample_rate, params)
        .into_iter()
        .map(|r| r.start.saturating_sub(keep)..(r.end + keep).min(samples.len()))
        .collect();

    for i in 1..ranges.len() {
        let last_end = ranges[i - 1].end;
        let next_start = ranges[i].start;
        if next_start < last_end {
            let mid = (last_end + next_start) / 2;
            ranges[i - 1].end = mid;
            ranges[i].start = mid;
        }
    }

    ranges
}

/// Range left after stripping leading and trailing audio below
/// `threshold_db`, analysed in 1 ms windows.
pub fn trim_silence_edges(samples: &[f32], sample_rate: u32, threshold_db: f32) -> Range<usize> {
    let window = ms_to_samples(1, sample_rate).max(1);
    let threshold = dbfs_to_amplitude(threshold_db);
    let energy = EnergyIndex::new(samples);

    let mut start = 0;
    while start + window <= samples.len() && energy.rms(start..start + window) < threshold {
        start += window;
    }

    let mut end = samples.len();
    while end >= start + window && energy.rms(end - window..end) < threshold {
        end -= window;
    }

    start..end.max(start)
}

/// Shorten silences of a second or more down to half a second on each side
/// of speech. Audio with no detectable speech is returned unchanged.
pub fn remove_long_silences(samples: &[f32], sample_rate: u32) -> Vec<f32> {
    let params = SilenceParams {
        min_silence_ms: 1000,
        threshold_db: -50.0,
        keep_silence_ms: 500,
        seek_step_ms: 10,
    };
    let ranges = split_on_silence(samples, sample_rate, &params);
    if ranges.is_empty() {
        return samples.to_vec();
    }

    let mut out = Vec::with_capacity(samples.len());
    for range in ranges {
        out.extend_from_slice(&samples[range]);
    }
    out
}

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("Audio decode error: {0}")]
    Decode(String),
    #[error("Audio encode error: {0}")]
    Encode(String),
    #[error("Resampling error: {0}")]
    Resample(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
