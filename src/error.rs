//! Pipeline error kinds.
//!
//! Functions in this crate return `anyhow::Result`; the root cause of a
//! pipeline failure is always a `PipelineError`, so callers classify with
//! `err.downcast_ref::<PipelineError>()`.

use std::fmt;

/// Failure kinds surfaced by sources, the processor and the publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// The decoding library could not be initialized. Nothing is published.
    LibraryInit(String),
    /// The resource is unreadable or malformed. Frames already published stay valid.
    Decode(String),
    /// Non-positive or mismatched frame dimensions. The operation is a no-op.
    InvalidFrame(String),
    /// A camera frame arrived while the camera session was stopped.
    CameraStopped,
    /// A writer tried to publish with a token that is no longer current.
    StaleSession { session: u64 },
    /// Camera device or controller failure.
    Device(String),
}

impl PipelineError {
    pub fn decode(message: impl Into<String>) -> anyhow::Error {
        anyhow::Error::new(PipelineError::Decode(message.into()))
    }

    pub fn invalid_frame(message: impl Into<String>) -> anyhow::Error {
        anyhow::Error::new(PipelineError::InvalidFrame(message.into()))
    }

    /// Classify an `anyhow::Error` by its pipeline root cause, if any.
    pub fn kind_of(err: &anyhow::Error) -> Option<&PipelineError> {
        err.downcast_ref::<PipelineError>()
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::LibraryInit(msg) => write!(f, "library init error: {msg}"),
            PipelineError::Decode(msg) => write!(f, "decode error: {msg}"),
            PipelineError::InvalidFrame(msg) => write!(f, "invalid frame: {msg}"),
            PipelineError::CameraStopped => write!(f, "camera session is stopped"),
            PipelineError::StaleSession { session } => {
                write!(f, "session {session} is no longer the active writer")
            }
            PipelineError::Device(msg) => write!(f, "device error: {msg}"),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<image::ImageError> for PipelineError {
    fn from(err: image::ImageError) -> Self {
        PipelineError::Decode(err.to_string())
    }
}
