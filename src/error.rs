use thiserror::Error;

/// Failures while decoding a persisted backlog blob
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Blob truncated: needed {needed} bytes, had {available}")]
    Truncated { needed: usize, available: usize },

    #[error("Bad magic bytes: {0:#06x}")]
    BadMagic(u16),

    #[error("Unsupported blob version: {0}")]
    UnsupportedVersion(u8),

    #[error("{0} unexpected trailing bytes")]
    TrailingBytes(usize),
}

/// Tracker error types
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Position source error: {0}")]
    Source(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for TrackerError {
    fn from(e: serde_json::Error) -> Self {
        TrackerError::Storage(format!("JSON: {}", e))
    }
}

impl From<reqwest::Error> for TrackerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return TrackerError::Transport("request timed out".to_string());
        }
        TrackerError::Transport(e.to_string())
    }
}

/// Result type for tracker operations
pub type Result<T> = std::result::Result<T, TrackerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let errors = vec![
            TrackerError::Storage("disk full".to_string()),
            TrackerError::Codec(CodecError::BadMagic(0x1234)),
            TrackerError::Transport("refused".to_string()),
            TrackerError::Source("no runtime".to_string()),
        ];

        for err in errors {
            assert!(!err.to_string().is_empty());
        }
    }

    #[test]
    fn test_codec_error_converts() {
        let err: TrackerError = CodecError::UnsupportedVersion(9).into();
        assert!(matches!(err, TrackerError::Codec(CodecError::UnsupportedVersion(9))));
        assert!(err.to_string().contains('9'));
    }
}
