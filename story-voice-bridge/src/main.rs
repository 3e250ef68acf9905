mod audio;
mod protocol;

use std::io::{self, BufRead, Write};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use audio::{
    decode_audio_payload, encode_f32le_to_base64, AudioPayload, DEFAULT_CHANNELS,
    DEFAULT_SAMPLE_RATE_HZ, SUPPORTED_INPUT_FORMATS,
};
use protocol::{
    ErrorCode, RequestEnvelope, ResponseEnvelope, RpcError, RpcMethod, MAX_REQUEST_BYTES,
    PROTOCOL_VERSION,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use story_voice::budget::MAX_CHUNK_BUDGET;
use story_voice::config::CONFIG_PATH_ENV;
use story_voice::reference::{normalize_transcript, ConditionerSettings, TranscriptOrigin};
use story_voice::segment::normalize_generation_text;
use story_voice::{
    chunk_budget, score, segment, stitch, CollaboratorError, NoTranscriber, ReferenceConditioner,
    ReferenceError, SynthesisConfig, TranscriptCache, ValidationError,
};

const UNKNOWN_REQUEST_ID: &str = "_unknown";
const MAX_TIMEOUT_MS: u64 = 5 * 60 * 1000;

struct BridgeState {
    config: SynthesisConfig,
    conditioner: ReferenceConditioner,
}

impl BridgeState {
    fn new(config: SynthesisConfig) -> Self {
        // The bridge has no speech-to-text engine of its own; blank
        // reference transcripts are reported as MODEL_MISSING.
        let conditioner = ReferenceConditioner::new(
            ConditionerSettings::from(&config),
            Arc::new(TranscriptCache::new()),
            Arc::new(NoTranscriber),
        );
        Self {
            config,
            conditioner,
        }
    }
}

struct MethodOutcome {
    result: Value,
    should_shutdown: bool,
}

impl MethodOutcome {
    fn reply(result: Value) -> Self {
        Self {
            result,
            should_shutdown: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TextSegmentParams {
    text: String,
    #[serde(default)]
    max_chars: Option<usize>,
    #[serde(default)]
    reference_duration_s: Option<f64>,
    #[serde(default)]
    reference_text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TextBudgetParams {
    reference_duration_s: f64,
    reference_text: String,
}

#[derive(Debug, Deserialize)]
struct ReferenceConditionParams {
    #[serde(flatten)]
    audio: AudioPayload,
    #[serde(default)]
    reference_text: String,
}

#[derive(Debug, Deserialize)]
struct AudioStitchParams {
    segments: Vec<AudioPayload>,
    #[serde(default)]
    crossfade_s: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct QualityScoreParams {
    reference: String,
    hypothesis: String,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("[bridge] fatal error: {err}");
        std::process::exit(1);
    }
}

fn run() -> io::Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout().lock();
    let state = BridgeState::new(load_config());

    for line_result in stdin.lock().lines() {
        let line = match line_result {
            Ok(line) => line,
            Err(err) => {
                eprintln!("[bridge] stdin read error: {err}");
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let fallback_id =
            extract_request_id(&line).unwrap_or_else(|| UNKNOWN_REQUEST_ID.to_string());
        let started = Instant::now();

        let (response, should_shutdown) = if line.len() > MAX_REQUEST_BYTES {
            (
                ResponseEnvelope::err(
                    fallback_id,
                    RpcError::new(
                        ErrorCode::PayloadTooLarge,
                        format!(
                            "Request exceeds max size ({} > {})",
                            line.len(),
                            MAX_REQUEST_BYTES
                        ),
                    ),
                ),
                false,
            )
        } else {
            handle_line(&line, &state)
        };

        write_response(&mut stdout, &response)?;

        let latency_ms = started.elapsed().as_millis();
        eprintln!(
            "[bridge] id={} ok={} latency_ms={latency_ms}",
            response.id, response.ok
        );

        if should_shutdown {
            break;
        }
    }

    Ok(())
}

fn load_config() -> SynthesisConfig {
    let config = SynthesisConfig::load();
    match config.validate() {
        Ok(()) => {
            if let Some(path) = SynthesisConfig::config_path() {
                eprintln!(
                    "[bridge] config from {} (override with {CONFIG_PATH_ENV})",
                    path.display()
                );
            }
            config
        }
        Err(err) => {
            eprintln!("[bridge] invalid config ({err}), using defaults");
            SynthesisConfig::default()
        }
    }
}

fn handle_line(line: &str, state: &BridgeState) -> (ResponseEnvelope, bool) {
    let json_value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(err) => {
            let id = extract_request_id(line).unwrap_or_else(|| UNKNOWN_REQUEST_ID.to_string());
            return (
                ResponseEnvelope::err(
                    id,
                    RpcError::new(
                        ErrorCode::ParseError,
                        format!("Invalid JSON request: {err}"),
                    ),
                ),
                false,
            );
        }
    };

    let request_id = json_value
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.trim().is_empty())
        .unwrap_or(UNKNOWN_REQUEST_ID)
        .to_string();

    let request: RequestEnvelope = match serde_json::from_value(json_value) {
        Ok(request) => request,
        Err(err) => {
            return (
                ResponseEnvelope::err(
                    request_id,
                    RpcError::new(
                        ErrorCode::InvalidRequest,
                        format!("Invalid request envelope: {err}"),
                    ),
                ),
                false,
            );
        }
    };

    if request.message_type != "request" {
        return (
            ResponseEnvelope::err(
                request.id,
                RpcError::new(
                    ErrorCode::InvalidRequest,
                    format!(
                        "Unsupported message type '{}' (expected 'request')",
                        request.message_type
                    ),
                ),
            ),
            false,
        );
    }

    if request.id.trim().is_empty() {
        return (
            ResponseEnvelope::err(
                request.id,
                RpcError::new(ErrorCode::InvalidRequest, "Request id must not be empty"),
            ),
            false,
        );
    }

    let method = match RpcMethod::from_str(&request.method) {
        Ok(method) => method,
        Err(err) => return (ResponseEnvelope::err(request.id, err), false),
    };

    if request.timeout_ms == Some(0) {
        return (
            ResponseEnvelope::err(
                request.id,
                RpcError::new(
                    ErrorCode::InvalidParams,
                    "timeout_ms must be greater than 0",
                ),
            ),
            false,
        );
    }

    let started = Instant::now();
    let outcome = dispatch_request(state, method, request.params);

    if let Some(timeout_ms) = request.timeout_ms {
        let bounded_ms = timeout_ms.min(MAX_TIMEOUT_MS);
        if started.elapsed().as_millis() > bounded_ms as u128 {
            return (
                ResponseEnvelope::err(
                    request.id,
                    RpcError::new(
                        ErrorCode::OperationTimeout,
                        format!("{} timed out after {}ms", method.as_str(), bounded_ms),
                    ),
                ),
                false,
            );
        }
    }

    match outcome {
        Ok(outcome) => (
            ResponseEnvelope::ok(request.id, outcome.result),
            outcome.should_shutdown,
        ),
        Err(err) => (ResponseEnvelope::err(request.id, err), false),
    }
}

fn dispatch_request(
    state: &BridgeState,
    method: RpcMethod,
    params: Value,
) -> Result<MethodOutcome, RpcError> {
    match method {
        RpcMethod::RuntimeHello => handle_runtime_hello(state).map(MethodOutcome::reply),
        RpcMethod::TextSegment => {
            let params: TextSegmentParams = parse_params(params)?;
            handle_text_segment(params).map(MethodOutcome::reply)
        }
        RpcMethod::TextBudget => {
            let params: TextBudgetParams = parse_params(params)?;
            handle_text_budget(params).map(MethodOutcome::reply)
        }
        RpcMethod::ReferenceCondition => {
            let params: ReferenceConditionParams = parse_params(params)?;
            handle_reference_condition(state, params).map(MethodOutcome::reply)
        }
        RpcMethod::AudioStitch => {
            let params: AudioStitchParams = parse_params(params)?;
            handle_audio_stitch(state, params).map(MethodOutcome::reply)
        }
        RpcMethod::QualityScore => {
            let params: QualityScoreParams = parse_params(params)?;
            handle_quality_score(params).map(MethodOutcome::reply)
        }
        RpcMethod::RuntimeShutdown => Ok(MethodOutcome {
            result: json!({"shutting_down": true}),
            should_shutdown: true,
        }),
    }
}

fn handle_runtime_hello(state: &BridgeState) -> Result<Value, RpcError> {
    let config = serde_json::to_value(&state.config)
        .map_err(|e| RpcError::new(ErrorCode::InternalError, e.to_string()))?;

    Ok(json!({
        "protocol_version": PROTOCOL_VERSION,
        "bridge": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION")
        },
        "methods": RpcMethod::supported(),
        "audio": {
            "default_input_format": "pcm_s16le",
            "supported_input_formats": SUPPORTED_INPUT_FORMATS,
            "default_sample_rate_hz": DEFAULT_SAMPLE_RATE_HZ,
            "default_channels": DEFAULT_CHANNELS,
            "output_format": "f32le"
        },
        "transcription_available": false,
        "config": config
    }))
}

fn handle_text_segment(params: TextSegmentParams) -> Result<Value, RpcError> {
    let text = normalize_generation_text(&params.text).map_err(map_validation_error)?;

    let (max_chars, budget_source) = match (params.max_chars, params.reference_duration_s) {
        (Some(0), _) => {
            return Err(RpcError::new(
                ErrorCode::InvalidParams,
                "max_chars must be greater than 0",
            ))
        }
        (Some(max_chars), _) => (max_chars, "explicit"),
        (None, Some(duration)) => (
            reference_budget(duration, params.reference_text.as_deref().unwrap_or(""))?,
            "reference",
        ),
        (None, None) => (MAX_CHUNK_BUDGET, "default"),
    };

    let chunks: Vec<Value> = segment(&text, max_chars)
        .into_iter()
        .map(|chunk| {
            json!({
                "index": chunk.index,
                "bytes": chunk.byte_len(),
                "text": chunk.text
            })
        })
        .collect();

    Ok(json!({
        "max_chars": max_chars,
        "budget_source": budget_source,
        "normalized_text": text,
        "chunk_count": chunks.len(),
        "chunks": chunks
    }))
}

fn handle_text_budget(params: TextBudgetParams) -> Result<Value, RpcError> {
    let max_chars = reference_budget(params.reference_duration_s, &params.reference_text)?;
    Ok(json!({ "max_chars": max_chars }))
}

/// Budget from the reference, measured on the transcript as the
/// conditioner would normalize it.
fn reference_budget(duration_s: f64, reference_text: &str) -> Result<usize, RpcError> {
    if !duration_s.is_finite() || duration_s < 0.0 {
        return Err(RpcError::new(
            ErrorCode::InvalidParams,
            format!("reference_duration_s must be a non-negative number, got {duration_s}"),
        ));
    }
    let bytes = normalize_transcript(reference_text).map_or(0, |t| t.len());
    Ok(chunk_budget(duration_s, bytes))
}

fn handle_reference_condition(
    state: &BridgeState,
    params: ReferenceConditionParams,
) -> Result<Value, RpcError> {
    let clip = decode_audio_payload(&params.audio)?;
    let (reference, transcript) = state
        .conditioner
        .condition_clip(clip, &params.reference_text)
        .map_err(map_reference_error)?;

    let max_chars = chunk_budget(reference.duration_secs() as f64, transcript.byte_len());

    Ok(json!({
        "fingerprint": reference.fingerprint(),
        "sample_rate_hz": reference.sample_rate(),
        "source_duration_s": reference.source_duration_secs(),
        "duration_s": reference.duration_secs(),
        "sample_count": reference.samples().len(),
        "rms": reference.rms(),
        "transcript": transcript.text(),
        "transcript_origin": origin_name(transcript.origin()),
        "max_chars": max_chars
    }))
}

fn handle_audio_stitch(state: &BridgeState, params: AudioStitchParams) -> Result<Value, RpcError> {
    if params.segments.is_empty() {
        return Err(RpcError::new(
            ErrorCode::InvalidParams,
            "segments must not be empty",
        ));
    }

    let crossfade_s = params
        .crossfade_s
        .unwrap_or(state.config.cross_fade_duration);
    if !crossfade_s.is_finite() || crossfade_s < 0.0 {
        return Err(RpcError::new(
            ErrorCode::InvalidParams,
            format!("crossfade_s must be >= 0, got {crossfade_s}"),
        ));
    }

    let mut sample_rate = None;
    let mut waves = Vec::with_capacity(params.segments.len());
    for (index, payload) in params.segments.iter().enumerate() {
        let clip = decode_audio_payload(payload)?;
        match sample_rate {
            None => sample_rate = Some(clip.sample_rate),
            Some(rate) if rate != clip.sample_rate => {
                return Err(RpcError::new(
                    ErrorCode::InvalidParams,
                    format!(
                        "segment {index} is {}Hz, expected {rate}Hz like segment 0",
                        clip.sample_rate
                    ),
                ));
            }
            Some(_) => {}
        }
        waves.push(clip.samples);
    }
    let sample_rate = sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE_HZ);

    let segment_sample_counts: Vec<usize> = waves.iter().map(Vec::len).collect();
    let stitched = stitch(&waves, crossfade_s, sample_rate);

    Ok(json!({
        "audio_b64": encode_f32le_to_base64(&stitched),
        "format": "f32le",
        "sample_rate_hz": sample_rate,
        "channels": DEFAULT_CHANNELS,
        "sample_count": stitched.len(),
        "segment_sample_counts": segment_sample_counts,
        "duration_ms": duration_ms_for_samples(stitched.len(), sample_rate)
    }))
}

fn handle_quality_score(params: QualityScoreParams) -> Result<Value, RpcError> {
    let rates = score(&params.reference, &params.hypothesis);
    Ok(json!({
        "wer": rates.wer,
        "cer": rates.cer,
        "computable": rates.is_computable()
    }))
}

fn origin_name(origin: TranscriptOrigin) -> &'static str {
    match origin {
        TranscriptOrigin::Supplied => "supplied",
        TranscriptOrigin::Cached => "cached",
        TranscriptOrigin::Transcribed => "transcribed",
    }
}

fn duration_ms_for_samples(sample_count: usize, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    (sample_count as u64 * 1000) / sample_rate as u64
}

fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, RpcError> {
    let params = if params.is_null() { json!({}) } else { params };

    serde_json::from_value(params)
        .map_err(|err| RpcError::new(ErrorCode::InvalidParams, format!("Invalid params: {err}")))
}

fn map_validation_error(err: ValidationError) -> RpcError {
    RpcError::new(ErrorCode::ValidationFailed, err.to_string())
}

fn map_reference_error(err: ReferenceError) -> RpcError {
    match err {
        ReferenceError::Validation(err) => map_validation_error(err),
        ReferenceError::Audio(err) => RpcError::new(ErrorCode::AudioDecodeFailed, err.to_string()),
        ReferenceError::Collaborator(CollaboratorError::Unavailable(msg)) => RpcError::new(
            ErrorCode::ModelMissing,
            format!("Reference transcript required: {msg}"),
        ),
        ReferenceError::Collaborator(other) => {
            RpcError::new(ErrorCode::InternalError, other.to_string())
        }
    }
}

fn extract_request_id(line: &str) -> Option<String> {
    let value: Value = serde_json::from_str(line).ok()?;
    value.get("id")?.as_str().map(ToString::to_string)
}

fn write_response(stdout: &mut dyn Write, response: &ResponseEnvelope) -> io::Result<()> {
    let encoded = serde_json::to_string(response)
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))?;
    writeln!(stdout, "{encoded}")?;
    stdout.flush()
}
