use thiserror::Error;

/// Failure taxonomy for a stream session.
///
/// The supervisor cares about exactly one distinction: `Cancelled` ends a
/// session without consuming retry budget, everything else is retryable.
/// Per-frame faults are caught inside the ingestion loop and never surface
/// as one of these.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("failed to open source: {0}")]
    SourceOpen(String),

    #[error("source has no video stream")]
    NoVideoStream,

    #[error("source read error: {0}")]
    SourceRead(String),

    #[error("timed out waiting for source packet")]
    ReadTimeout,

    #[error("codec engine error: {0}")]
    Engine(String),

    #[error("clip output error: {0}")]
    Clip(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session cancelled")]
    Cancelled,
}

impl StreamError {
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;
