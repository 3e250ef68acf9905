// Story Voice - Request validation
// Caller-side errors that are surfaced immediately and never retried

/// Errors caused by the request itself rather than by a collaborator.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Reference audio too short: {duration_secs:.2}s (minimum {min_secs:.2}s)")]
    ReferenceTooShort { duration_secs: f32, min_secs: f32 },
    #[error("Generation text is empty")]
    EmptyGenerationText,
    #[error("Reference transcript is empty")]
    EmptyTranscript,
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Fail when a reference clip is shorter than the configured minimum.
pub fn ensure_min_duration(duration_secs: f32, min_secs: f32) -> Result<(), ValidationError> {
    if duration_secs < min_secs {
        return Err(ValidationError::ReferenceTooShort {
            duration_secs,
            min_secs,
        });
    }
    Ok(())
}
