use thiserror::Error;

/// The error taxonomy a caller needs to match on to decide retry vs. fatal
/// policy. Everything else flows as `anyhow::Error` with `.context(...)`
/// chains attached at each boundary.
#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("transient fetch error: {0}")]
    TransientFetchError(String),

    #[error("checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch { file: String, expected: String, actual: String },

    #[error("XML parse error at line {line}, column {column}: {message}")]
    XmlParseError { line: usize, column: usize, message: String },

    #[error("normalization error: {0}")]
    NormalizationError(String),

    #[error("broker protocol error: {0}")]
    BrokerProtocolError(String),

    #[error("state marker corrupted at {path}: {reason}")]
    #[allow(dead_code)]
    StateMarkerCorruption { path: String, reason: String },

    #[error("catalog page shape error: {0}")]
    CatalogShapeError(String),

    #[error("configuration error: {0}")]
    #[allow(dead_code)]
    ConfigurationError(String),

    /// Raised once the extraction loop has already persisted the state
    /// marker describing a failed run. Distinguishes "we know what broke
    /// and it's on disk" from a fatal startup error, so the caller can exit
    /// with a different code and an operator knows a restart can resume
    /// from the marker instead of from scratch.
    #[error("processing failed after state was saved: {0}")]
    ProcessingFailed(String),
}

impl ExtractorError {
    /// Whether the orchestrator's retry loop should retry the operation that
    /// raised this error rather than escalate it.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExtractorError::TransientFetchError(_) | ExtractorError::BrokerProtocolError(_))
    }
}
