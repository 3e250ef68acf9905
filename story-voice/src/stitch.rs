// Story Voice - Cross-fade stitcher
// Joins per-chunk waveforms with linear cross-fades at every boundary

use serde::Serialize;

/// Final waveform for a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StitchedWaveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl StitchedWaveform {
    pub fn duration_secs(&self) -> f32 {
        crate::audio::samples_to_secs(self.samples.len(), self.sample_rate)
    }
}

/// Cross-fade length in samples for a duration in seconds.
pub fn crossfade_samples(cross_fade_secs: f32, sample_rate: u32) -> usize {
    if !cross_fade_secs.is_finite() || cross_fade_secs <= 0.0 {
        return 0;
    }
    (cross_fade_secs as f64 * sample_rate as f64).round() as usize
}

/// Concatenate `segments` in order, blending each boundary over
/// `min(cross-fade, half of either side)` samples.
pub fn stitch(segments: &[Vec<f32>], cross_fade_secs: f32, sample_rate: u32) -> Vec<f32> {
    let Some((first, rest)) = segments.split_first() else {
        return Vec::new();
    };

    let fade = crossfade_samples(cross_fade_secs, sample_rate);
    if fade == 0 || rest.is_empty() {
        return segments.concat();
    }

    let total: usize = segments.iter().map(Vec::len).sum();
    let mut stitched = Vec::with_capacity(total);
    stitched.extend_from_slice(first);

    for next in rest {
        let overlap = fade.min(stitched.len() / 2).min(next.len() / 2);
        if overlap == 0 {
            stitched.extend_from_slice(next);
            continue;
        }

        let tail_start = stitched.len() - overlap;
        for i in 0..overlap {
            let (fade_out, fade_in) = ramp(i, overlap);
            stitched[tail_start + i] = stitched[tail_start + i] * fade_out + next[i] * fade_in;
        }
        stitched.extend_from_slice(&next[overlap..]);
    }

    stitched
}

/// Gains at position `i` of an inclusive linear ramp of `n` points: the
/// outgoing side falls 1 -> 0 and the incoming side rises 0 -> 1.
fn ramp(i: usize, n: usize) -> (f32, f32) {
    if n <= 1 {
        return (1.0, 0.0);
    }
    let t = i as f32 / (n - 1) as f32;
    (1.0 - t, t)
}
