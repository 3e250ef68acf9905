// Story Voice Bridge - wire protocol
// One JSON request per stdin line, one JSON response per stdout line. Error
// codes are stable strings; `retryable` marks the transient ones.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

pub const PROTOCOL_VERSION: &str = "1.0.0";
pub const MAX_REQUEST_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct RequestEnvelope {
    #[serde(rename = "type")]
    pub message_type: String,
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ResponseEnvelope {
    #[serde(rename = "type")]
    pub message_type: &'static str,
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl ResponseEnvelope {
    pub fn ok(id: impl Into<String>, result: Value) -> Self {
        Self {
            message_type: "response",
            id: id.into(),
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, err: RpcError) -> Self {
        Self {
            message_type: "response",
            id: id.into(),
            ok: false,
            result: None,
            error: Some(ErrorBody {
                code: err.code.as_str(),
                message: err.message,
                retryable: err.retryable,
            }),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
}

#[derive(Debug, Clone)]
pub struct RpcError {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
}

impl RpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: code.retryable(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    InvalidParams,
    MethodNotFound,
    PayloadTooLarge,
    UnsupportedAudioFormat,
    AudioDecodeFailed,
    ValidationFailed,
    ModelMissing,
    OperationTimeout,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ParseError => "PARSE_ERROR",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::InvalidParams => "INVALID_PARAMS",
            Self::MethodNotFound => "METHOD_NOT_FOUND",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::UnsupportedAudioFormat => "UNSUPPORTED_AUDIO_FORMAT",
            Self::AudioDecodeFailed => "AUDIO_DECODE_FAILED",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::ModelMissing => "MODEL_MISSING",
            Self::OperationTimeout => "OPERATION_TIMEOUT",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    pub fn retryable(self) -> bool {
        matches!(self, Self::OperationTimeout | Self::InternalError)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcMethod {
    RuntimeHello,
    TextSegment,
    TextBudget,
    ReferenceCondition,
    AudioStitch,
    QualityScore,
    RuntimeShutdown,
}

/// Wire name of every method, in the order `runtime.hello` advertises them.
const METHOD_TABLE: &[(&str, RpcMethod)] = &[
    ("runtime.hello", RpcMethod::RuntimeHello),
    ("text.segment", RpcMethod::TextSegment),
    ("text.budget", RpcMethod::TextBudget),
    ("reference.condition", RpcMethod::ReferenceCondition),
    ("audio.stitch", RpcMethod::AudioStitch),
    ("quality.score", RpcMethod::QualityScore),
    ("runtime.shutdown", RpcMethod::RuntimeShutdown),
];

impl RpcMethod {
    pub fn supported() -> Vec<&'static str> {
        METHOD_TABLE.iter().map(|(name, _)| *name).collect()
    }

    pub fn as_str(self) -> &'static str {
        METHOD_TABLE
            .iter()
            .find(|(_, method)| *method == self)
            .map(|(name, _)| *name)
            .unwrap_or("unknown")
    }
}

impl FromStr for RpcMethod {
    type Err = RpcError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        METHOD_TABLE
            .iter()
            .find(|(name, _)| *name == value)
            .map(|(_, method)| *method)
            .ok_or_else(|| {
                RpcError::new(
                    ErrorCode::MethodNotFound,
                    format!("Unknown method '{value}'"),
                )
            })
    }
}
