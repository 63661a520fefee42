use crate::assets::{ArtifactKind, DanceId};

/// Result alias that carries the custom [`DanceError`] type.
pub type Result<T> = std::result::Result<T, DanceError>;

/// Why a single artifact download did not produce bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DownloadFailure {
    #[error("timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum DanceError {
    /// A pose table row that could not be turned into a frame.
    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },
    /// Frame or joint arguments outside the loaded data.
    #[error("out of range: {0}")]
    Range(String),
    /// An artifact download failed or timed out.
    #[error("download of {artifact} for `{dance}` failed: {failure}")]
    Download {
        dance: DanceId,
        artifact: ArtifactKind,
        failure: DownloadFailure,
    },
    /// Unknown joint name or missing local artifact.
    #[error("not found: {0}")]
    NotFound(String),
    /// A resolve for this dance is already running.
    #[error("dance `{0}` is already being resolved")]
    InFlight(DanceId),
    #[error("audio: {0}")]
    Audio(String),
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl DanceError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn range<T: Into<String>>(msg: T) -> Self {
        Self::Range(msg.into())
    }

    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        Self::NotFound(msg.into())
    }

    /// True for download failures caused by the per-artifact timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Download {
                failure: DownloadFailure::Timeout,
                ..
            }
        )
    }
}

impl From<&str> for DanceError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for DanceError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
