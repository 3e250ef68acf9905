use base64::Engine;
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

struct BridgeHarness {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    _config_dir: tempfile::TempDir,
}

impl BridgeHarness {
    fn spawn() -> Self {
        let bridge_path = resolve_bridge_path();
        // Point at a missing config file so the bridge runs on defaults.
        let config_dir = tempfile::tempdir().expect("failed to create temp dir");

        let mut child = Command::new(bridge_path)
            .env(
                "STORY_VOICE_CONFIG",
                config_dir.path().join("synthesis_config.json"),
            )
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("failed to spawn bridge process");

        let stdin = child.stdin.take().expect("missing child stdin");
        let stdout = child.stdout.take().expect("missing child stdout");

        Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            _config_dir: config_dir,
        }
    }

    fn send_line(&mut self, line: &str) -> Value {
        writeln!(self.stdin, "{line}").expect("failed to write request");
        self.stdin.flush().expect("failed to flush request");

        let mut response = String::new();
        let bytes_read = self
            .stdout
            .read_line(&mut response)
            .expect("failed to read response");
        assert!(bytes_read > 0, "bridge closed stdout unexpectedly");

        serde_json::from_str(response.trim()).expect("response should be valid json")
    }

    fn request(&mut self, id: &str, method: &str, params: Value) -> Value {
        let encoded = serde_json::to_string(&json!({
            "type": "request",
            "id": id,
            "method": method,
            "params": params
        }))
        .expect("request should serialize");
        let response = self.send_line(&encoded);

        assert_eq!(
            response.get("type").and_then(Value::as_str),
            Some("response"),
            "unexpected response type: {response}"
        );
        assert_eq!(
            response.get("id").and_then(Value::as_str),
            Some(id),
            "unexpected response id: {response}"
        );
        response
    }

    fn rpc_ok(&mut self, id: &str, method: &str, params: Value) -> Value {
        let response = self.request(id, method, params);
        assert_eq!(
            response.get("ok").and_then(Value::as_bool),
            Some(true),
            "expected successful response: {response}"
        );
        response["result"].clone()
    }

    fn rpc_err_code(&mut self, id: &str, method: &str, params: Value) -> String {
        let response = self.request(id, method, params);
        assert_eq!(
            response.get("ok").and_then(Value::as_bool),
            Some(false),
            "expected error response: {response}"
        );
        response["error"]["code"]
            .as_str()
            .expect("error response should carry a code")
            .to_string()
    }

    fn shutdown(mut self) {
        let _ = self.request("shutdown", "runtime.shutdown", json!({}));

        let status = self.child.wait().expect("failed to wait for bridge");
        assert!(status.success(), "bridge exited with status: {status}");
    }
}

fn resolve_bridge_path() -> String {
    if let Some(path) = option_env!("CARGO_BIN_EXE_story-voice-bridge") {
        return path.to_string();
    }

    let test_bin = std::env::current_exe().expect("failed to resolve current test executable");
    let target_dir = test_bin
        .parent()
        .and_then(|p| p.parent())
        .expect("failed to resolve target directory");

    for name in ["story-voice-bridge", "story-voice-bridge.exe"] {
        let candidate = target_dir.join(name);
        if candidate.exists() {
            return candidate.to_string_lossy().to_string();
        }
    }

    panic!(
        "could not locate bridge binary under {}",
        target_dir.display()
    );
}

fn b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn pcm_tone(secs: f32, sample_rate: u32) -> String {
    let n = (secs * sample_rate as f32) as usize;
    let mut bytes = Vec::with_capacity(n * 2);
    for i in 0..n {
        let t = i as f32 / sample_rate as f32;
        let value = 0.3 * (2.0 * std::f32::consts::PI * 220.0 * t).sin();
        bytes.extend_from_slice(&((value * i16::MAX as f32) as i16).to_le_bytes());
    }
    b64(&bytes)
}

fn f32le_constant(value: f32, count: usize) -> String {
    let mut bytes = Vec::with_capacity(count * 4);
    for _ in 0..count {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    b64(&bytes)
}

#[test]
fn runtime_hello_advertises_methods_and_defaults() {
    let mut bridge = BridgeHarness::spawn();

    let result = bridge.rpc_ok("1", "runtime.hello", json!({}));
    let methods = result["methods"]
        .as_array()
        .expect("runtime.hello should include methods array");
    for method in ["text.segment", "reference.condition", "audio.stitch", "quality.score"] {
        assert!(
            methods.iter().any(|v| v.as_str() == Some(method)),
            "runtime.hello should advertise {method}: {methods:?}"
        );
    }
    assert_eq!(result["config"]["nfe_step"], json!(32));
    assert_eq!(result["config"]["transcription_language"], json!("vi"));
    assert_eq!(result["audio"]["default_sample_rate_hz"], json!(24_000));

    bridge.shutdown();
}

#[test]
fn malformed_lines_get_protocol_errors() {
    let mut bridge = BridgeHarness::spawn();

    let response = bridge.send_line("{not json");
    assert_eq!(response["ok"], json!(false));
    assert_eq!(response["error"]["code"], json!("PARSE_ERROR"));

    let code = bridge.rpc_err_code("2", "tts.synthesize", json!({}));
    assert_eq!(code, "METHOD_NOT_FOUND");

    let code = bridge.rpc_err_code("3", "quality.score", json!({"reference": "x"}));
    assert_eq!(code, "INVALID_PARAMS");

    bridge.shutdown();
}

#[test]
fn text_segment_respects_budget() {
    let mut bridge = BridgeHarness::spawn();
    let text = "Once upon a time there was a girl. She lived near the river with her family. \
                Every morning she walked to the market to sell flowers.";

    let result = bridge.rpc_ok("1", "text.segment", json!({"text": text, "max_chars": 60}));
    assert_eq!(result["budget_source"], json!("explicit"));
    let chunks = result["chunks"].as_array().expect("chunks array");
    assert!(chunks.len() >= 3, "{result}");
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk["index"], json!(i));
        assert!(chunk["bytes"].as_u64().unwrap() <= 60, "{chunk}");
    }

    let result = bridge.rpc_ok("2", "text.segment", json!({"text": text}));
    assert_eq!(result["budget_source"], json!("default"));
    assert_eq!(result["max_chars"], json!(250));
    assert_eq!(result["chunk_count"], json!(1));

    let code = bridge.rpc_err_code("3", "text.segment", json!({"text": "   "}));
    assert_eq!(code, "VALIDATION_FAILED");

    bridge.shutdown();
}

#[test]
fn text_budget_is_clamped() {
    let mut bridge = BridgeHarness::spawn();

    let fast = bridge.rpc_ok(
        "1",
        "text.budget",
        json!({"reference_duration_s": 1.0, "reference_text": "a".repeat(100)}),
    );
    assert_eq!(fast["max_chars"], json!(250));

    let slow = bridge.rpc_ok(
        "2",
        "text.budget",
        json!({"reference_duration_s": 10.0, "reference_text": "short"}),
    );
    assert_eq!(slow["max_chars"], json!(150));

    bridge.shutdown();
}

#[test]
fn reference_condition_reports_fingerprint_and_transcript() {
    let mut bridge = BridgeHarness::spawn();
    let audio = pcm_tone(4.0, 24_000);

    let result = bridge.rpc_ok(
        "1",
        "reference.condition",
        json!({
            "audio_b64": audio,
            "format": "pcm_s16le",
            "sample_rate_hz": 24_000,
            "reference_text": "  xin   chào các bạn "
        }),
    );
    assert_eq!(result["transcript"], json!("xin chào các bạn. "));
    assert_eq!(result["transcript_origin"], json!("supplied"));
    assert_eq!(result["fingerprint"].as_str().unwrap().len(), 64);
    let duration = result["duration_s"].as_f64().unwrap();
    assert!((duration - 4.05).abs() < 0.01, "{result}");

    // same audio, same fingerprint
    let again = bridge.rpc_ok(
        "2",
        "reference.condition",
        json!({
            "audio_b64": audio,
            "reference_text": "xin chào"
        }),
    );
    assert_eq!(again["fingerprint"], result["fingerprint"]);

    bridge.shutdown();
}

#[test]
fn reference_condition_error_codes() {
    let mut bridge = BridgeHarness::spawn();

    let code = bridge.rpc_err_code(
        "1",
        "reference.condition",
        json!({"audio_b64": pcm_tone(2.0, 24_000), "reference_text": "xin chào"}),
    );
    assert_eq!(code, "VALIDATION_FAILED");

    let code = bridge.rpc_err_code(
        "2",
        "reference.condition",
        json!({"audio_b64": pcm_tone(4.0, 16_000), "sample_rate_hz": 16_000}),
    );
    assert_eq!(code, "MODEL_MISSING");

    let code = bridge.rpc_err_code(
        "3",
        "reference.condition",
        json!({"audio_b64": b64(b"RIFFjunk"), "format": "wav", "reference_text": "x"}),
    );
    assert_eq!(code, "AUDIO_DECODE_FAILED");

    bridge.shutdown();
}

#[test]
fn audio_stitch_overlaps_segments() {
    let mut bridge = BridgeHarness::spawn();

    let result = bridge.rpc_ok(
        "1",
        "audio.stitch",
        json!({
            "segments": [
                {"audio_b64": f32le_constant(0.2, 24_000), "format": "f32le"},
                {"audio_b64": f32le_constant(-0.2, 24_000), "format": "f32le"}
            ]
        }),
    );
    assert_eq!(result["sample_count"], json!(48_000 - 3_600));
    assert_eq!(result["segment_sample_counts"], json!([24_000, 24_000]));

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(result["audio_b64"].as_str().unwrap())
        .unwrap();
    assert_eq!(decoded.len(), (48_000 - 3_600) * 4);

    let code = bridge.rpc_err_code(
        "2",
        "audio.stitch",
        json!({
            "segments": [
                {"audio_b64": f32le_constant(0.2, 100), "format": "f32le", "sample_rate_hz": 24_000},
                {"audio_b64": f32le_constant(0.2, 100), "format": "f32le", "sample_rate_hz": 16_000}
            ]
        }),
    );
    assert_eq!(code, "INVALID_PARAMS");

    bridge.shutdown();
}

#[test]
fn quality_score_returns_rates_or_nulls() {
    let mut bridge = BridgeHarness::spawn();

    let result = bridge.rpc_ok(
        "1",
        "quality.score",
        json!({"reference": "con mèo đen", "hypothesis": "con mèo trắng"}),
    );
    let wer = result["wer"].as_f64().unwrap();
    assert!((wer - 1.0 / 3.0).abs() < 1e-4);
    assert_eq!(result["computable"], json!(true));

    let result = bridge.rpc_ok(
        "2",
        "quality.score",
        json!({"reference": "con mèo đen", "hypothesis": "   "}),
    );
    assert!(result["wer"].is_null());
    assert!(result["cer"].is_null());

    bridge.shutdown();
}
