// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for recording, replay and export

use std::fmt;
use std::time::Duration;

/// Result type alias for recorder operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while recording, replaying or exporting a session
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Storage unavailable: {message}")]
    StorageUnavailable { message: String },

    #[error("Failed to connect to {endpoint}: {message}")]
    ConnectFailed { endpoint: String, message: String },

    #[error("Connecting to {endpoint} timed out after {timeout:?}")]
    ConnectTimeout { endpoint: String, timeout: Duration },

    #[error("Recording truncated at byte {offset}: {needed} more bytes required")]
    TruncatedRecording { offset: u64, needed: usize },

    #[error("Decoder did not settle after frame {frame_index}: {message}")]
    DecodeSettleFailure { frame_index: u32, message: String },

    #[error("Snapshot failed after frame {frame_index}: {message}")]
    SnapshotFailure { frame_index: u32, message: String },

    #[error("Encoding output frame {output_index} failed: {message}")]
    EncodeFrameFailure { output_index: u32, message: String },

    #[error("Video encoder failed: {message}")]
    EncoderFailed { message: String },

    #[error("No usable frames to build a video from")]
    NoValidFrames,

    #[error("Upload to {endpoint} did not complete within {timeout:?}")]
    UploadTimeout { endpoint: String, timeout: Duration },

    #[error("Upload connection error: {message}")]
    UploadConnectionError { message: String },

    #[error("Write to recording target failed: {message}")]
    WriteFailed { message: String },

    #[error("Invalid container package: {message}")]
    InvalidContainer { message: String },

    #[error("Invalid transcript at element {element}: {message}")]
    InvalidTranscript { element: usize, message: String },

    #[error("Invalid state: expected {expected}, found {found}")]
    InvalidState { expected: String, found: String },

    #[error("Replay aborted after {processed} of {total} server frames")]
    Aborted { processed: usize, total: usize },

    #[error("Export format {format} requires a render target and video encoder")]
    MissingBackend { format: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn storage(err: impl fmt::Display) -> Self {
        Self::StorageUnavailable {
            message: err.to_string(),
        }
    }

    pub(crate) fn invalid_state(expected: impl fmt::Display, found: impl fmt::Display) -> Self {
        Self::InvalidState {
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}

/// Export phase, used to name the failing step in terminal errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Parsing,
    Replaying,
    Encoding,
    Packaging,
    Uploading,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Parsing => write!(f, "parsing"),
            Phase::Replaying => write!(f, "replaying"),
            Phase::Encoding => write!(f, "encoding"),
            Phase::Packaging => write!(f, "packaging"),
            Phase::Uploading => write!(f, "uploading"),
        }
    }
}

/// Terminal failure of an export attempt
#[derive(Debug, thiserror::Error)]
#[error("{phase} failed: {source}")]
pub struct PipelineError {
    pub phase: Phase,
    #[source]
    pub source: Error,
}

impl PipelineError {
    pub fn new(phase: Phase, source: Error) -> Self {
        Self { phase, source }
    }
}

/// Attach a phase to a recorder error
pub(crate) trait PhaseExt<T> {
    fn in_phase(self, phase: Phase) -> std::result::Result<T, PipelineError>;
}

impl<T> PhaseExt<T> for Result<T> {
    fn in_phase(self, phase: Phase) -> std::result::Result<T, PipelineError> {
        self.map_err(|source| PipelineError::new(phase, source))
    }
}
