//! Error types for loopstation-ap
//!
//! Defines module-specific error types using thiserror for clear error propagation.

use thiserror::Error;

/// Main error type for loopstation-ap
#[derive(Error, Debug)]
pub enum Error {
    /// Track bytes could not be fetched (network, HTTP status, or file I/O)
    #[error("Failed to load asset for track '{track_id}': {reason}")]
    AssetLoad { track_id: String, reason: String },

    /// Track bytes are malformed or in an unsupported format
    #[error("Failed to decode track '{track_id}': {reason}")]
    Decode { track_id: String, reason: String },

    /// The audio clock / output destination could not be created
    #[error("Audio clock unavailable: {0}")]
    ClockUnavailable(String),

    /// No track with this id is configured
    #[error("Unknown track: {0}")]
    UnknownTrack(String),

    /// Attempted to stop a voice that already ended
    #[error("Voice {0} already finished")]
    VoiceFinished(u64),

    /// Loop or fade lengths violate `0 < fade < loop / 2`
    #[error("Invalid timing: {0}")]
    InvalidTiming(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors from the common crate
    #[error(transparent)]
    Common(#[from] loopstation_common::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error is an expected race that callers swallow locally
    pub fn is_benign_race(&self) -> bool {
        matches!(self, Error::VoiceFinished(_))
    }
}

/// Convenience Result type using loopstation-ap Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_track() {
        let err = Error::AssetLoad {
            track_id: "piano".to_string(),
            reason: "HTTP 404".to_string(),
        };
        assert_eq!(err.to_string(), "Failed to load asset for track 'piano': HTTP 404");
    }

    #[test]
    fn test_common_error_is_transparent() {
        let err: Error = loopstation_common::Error::Config("bad".to_string()).into();
        assert_eq!(err.to_string(), "Configuration error: bad");
    }

    #[test]
    fn test_benign_race() {
        assert!(Error::VoiceFinished(3).is_benign_race());
        assert!(!Error::ClockUnavailable("x".into()).is_benign_race());
    }
}
