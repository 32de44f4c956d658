//! Error types for the compression core and the worker around it.

use std::path::PathBuf;
use thiserror::Error;

/// Failure reported by an encoding engine for one invocation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Encoder failed: {message}")]
    Failed {
        message: String,
        exit_code: Option<i32>,
    },

    #[error("Encoder binary not found: {0}")]
    NotFound(String),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn failed(message: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self::Failed {
            message: message.into(),
            exit_code,
        }
    }

    /// Only failures carrying engine-reported text can be audio incompatibilities.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Failed { message, .. } => classify_failure(message),
            _ => FailureKind::EngineFailure,
        }
    }
}

/// How the controller treats an engine failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Audio stream cannot be copied into the output container. Recovered as a warning.
    AudioIncompatible,
    /// Anything else. Propagated.
    EngineFailure,
}

const AUDIO_MARKER: &str = "audio";
// Either of these next to "audio" marks a passthrough the container refused.
const AUDIO_INCOMPATIBLE_MARKERS: [&str; 2] = ["incompatible", "codec"];

/// Classifies engine error text.
///
/// This is a substring check against the messages encoders emit when a copied
/// audio stream does not fit the container: the lower-cased text must mention
/// `audio` and one of `incompatible` or `codec`. Text that does not match is an
/// ordinary engine failure.
pub fn classify_failure(message: &str) -> FailureKind {
    let lower = message.to_lowercase();
    if lower.contains(AUDIO_MARKER) && AUDIO_INCOMPATIBLE_MARKERS.iter().any(|m| lower.contains(m)) {
        FailureKind::AudioIncompatible
    } else {
        FailureKind::EngineFailure
    }
}

/// Hard failures of a compression run. Size misses are warnings, not errors.
#[derive(Debug, Error)]
pub enum CompressError {
    #[error("A compression run is already in progress")]
    Busy,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

pub type CompressResult<T> = Result<T, CompressError>;

/// Failures while processing one queued job.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Invalid job payload: {0}")]
    Parse(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Compression failed: {0}")]
    Compress(#[from] CompressError),

    #[error("Queue error: {0}")]
    Queue(#[from] redis::RedisError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
