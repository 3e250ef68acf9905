// Story Voice - Adaptive chunk budget
// Sizes text chunks so each one renders to roughly ten seconds of speech

/// Smallest chunk budget in bytes.
pub const MIN_CHUNK_BUDGET: usize = 150;
/// Largest chunk budget in bytes.
pub const MAX_CHUNK_BUDGET: usize = 250;
/// Speech rate assumed when the reference duration is unusable.
pub const FALLBACK_CHARS_PER_SEC: f64 = 50.0;
/// Seconds of generated audio each chunk should cover.
pub const TARGET_CHUNK_SECS: f64 = 10.0;

/// Character budget for one request, derived from the reference speech rate.
pub fn chunk_budget(ref_audio_duration_secs: f64, ref_transcript_byte_len: usize) -> usize {
    let chars_per_sec = if ref_audio_duration_secs.is_finite() && ref_audio_duration_secs > 0.0 {
        ref_transcript_byte_len as f64 / ref_audio_duration_secs
    } else {
        FALLBACK_CHARS_PER_SEC
    };

    let raw = (chars_per_sec * TARGET_CHUNK_SECS).round();
    let budget = if raw.is_finite() && raw > 0.0 {
        (raw as usize).clamp(MIN_CHUNK_BUDGET, MAX_CHUNK_BUDGET)
    } else {
        MIN_CHUNK_BUDGET
    };

    log::debug!(
        "[Budget] {:.2} chars/s over {:.2}s -> max_chars={}",
        chars_per_sec,
        ref_audio_duration_secs,
        budget
    );

    budget
}
