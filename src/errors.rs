// SPDX-License-Identifier: MPL-2.0

//! Error types for the frame pipeline
//!
//! Only session-fatal conditions are represented here. Transient encoder
//! signals (dequeue timeouts, "try again later") and per-frame drops are
//! counted by the pipeline stages and never surface as errors.

use std::fmt;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Top-level error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Recording session errors
    Recording(RecordingError),
    /// Streaming errors
    Stream(StreamError),
    /// Per-frame geometry errors (strict mode only)
    Frame(FrameError),
    /// Configuration errors
    Config(String),
    /// Storage/filesystem errors
    Storage(String),
    /// Generic error with message
    Other(String),
}

/// Recording-session errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingError {
    /// Neither the preferred nor the fallback codec could be opened
    EncoderNotAvailable(String),
    /// Session could not be configured
    StartFailed(String),
    /// Session ended without a single sample reaching the container
    NoSamples,
    /// A session is already running on this driver
    AlreadyRecording,
    /// `stop` was called with no session running
    NotRecording,
    /// Encoder backend failure
    PipelineError(String),
}

/// Streaming errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Transport could not deliver the message
    Transport(String),
    /// Malformed control or wire message
    Protocol(String),
    /// Transport has been closed
    Closed,
}

/// Frame geometry errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Plane strides or sizes do not cover the declared frame dimensions
    InvalidGeometry(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Recording(e) => write!(f, "Recording error: {}", e),
            AppError::Stream(e) => write!(f, "Stream error: {}", e),
            AppError::Frame(e) => write!(f, "Frame error: {}", e),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Storage(msg) => write!(f, "Storage error: {}", msg),
            AppError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for RecordingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordingError::EncoderNotAvailable(msg) => write!(f, "Encoder not available: {}", msg),
            RecordingError::StartFailed(msg) => write!(f, "Failed to start recording: {}", msg),
            RecordingError::NoSamples => write!(f, "No samples were written"),
            RecordingError::AlreadyRecording => write!(f, "Recording already in progress"),
            RecordingError::NotRecording => write!(f, "No recording in progress"),
            RecordingError::PipelineError(msg) => write!(f, "Pipeline error: {}", msg),
        }
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Transport(msg) => write!(f, "Transport error: {}", msg),
            StreamError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            StreamError::Closed => write!(f, "Transport closed"),
        }
    }
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::InvalidGeometry(msg) => write!(f, "Invalid frame geometry: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}
impl std::error::Error for RecordingError {}
impl std::error::Error for StreamError {}
impl std::error::Error for FrameError {}

impl From<RecordingError> for AppError {
    fn from(err: RecordingError) -> Self {
        AppError::Recording(err)
    }
}

impl From<StreamError> for AppError {
    fn from(err: StreamError) -> Self {
        AppError::Stream(err)
    }
}

impl From<FrameError> for AppError {
    fn from(err: FrameError) -> Self {
        AppError::Frame(err)
    }
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Other(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Other(msg.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_nests_sub_errors() {
        let err: AppError = RecordingError::NoSamples.into();
        assert_eq!(err.to_string(), "Recording error: No samples were written");

        let err: AppError = StreamError::Closed.into();
        assert_eq!(err.to_string(), "Stream error: Transport closed");
    }

    #[test]
    fn test_io_error_maps_to_storage() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert!(matches!(AppError::from(io), AppError::Storage(_)));
    }
}
