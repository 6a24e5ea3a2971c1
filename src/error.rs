//! Error types for the graph storage engine.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GraphError>;

/// Error kinds reported to clients in response frames (see `code()`), never
/// by closing the socket silently.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("semantic id already exists across commits: {0}")]
    ConflictingSemanticId(String),

    #[error("no batch is open for this session")]
    BatchNotOpen,

    #[error("io failure: {0}")]
    IoFailure(#[from] std::io::Error),

    #[error("recovery failure: {0}")]
    RecoveryFailure(String),

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("invalid on-disk format: {0}")]
    InvalidFormat(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GraphError {
    /// Short machine-readable code carried in the wire response.
    pub fn code(&self) -> &'static str {
        match self {
            GraphError::InvalidRequest(_) => "INVALID_REQUEST",
            GraphError::ConflictingSemanticId(_) => "CONFLICTING_SEMANTIC_ID",
            GraphError::BatchNotOpen => "BATCH_NOT_OPEN",
            GraphError::IoFailure(_) => "IO_FAILURE",
            GraphError::RecoveryFailure(_) => "RECOVERY_FAILURE",
            GraphError::Fatal(_) => "FATAL",
            GraphError::InvalidFormat(_) => "INVALID_FORMAT",
            GraphError::Serialization(_) => "INTERNAL_ERROR",
            GraphError::Json(_) => "INTERNAL_ERROR",
        }
    }

    /// True for the class of errors that §7 says should cause the server
    /// to give up and exit rather than keep serving against a possibly
    /// diverged store, once they repeat.
    pub fn is_io_class(&self) -> bool {
        matches!(self, GraphError::IoFailure(_))
    }
}
