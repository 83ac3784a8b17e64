//! Error types for the organizational network analysis engine.

/// Top-level error enum for the engine.
///
/// The variants line up with how a failure is treated by the orchestrator:
/// store I/O (`Database`, `Sqlite`, `Io`) is left for the outer job queue to
/// retry, `Analysis` is a stage-internal failure that degrades a single stage,
/// and `Config` rejects the request before any stage runs.
#[derive(Debug, thiserror::Error)]
pub enum OrgNetError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Analysis error: {0}")]
    Analysis(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Analysis already running for organization {0}")]
    RunInProgress(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OrgNetError {
    /// True for errors raised by a store adapter rather than by analysis code.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            OrgNetError::Database(_) | OrgNetError::Sqlite(_) | OrgNetError::Io(_)
        )
    }
}

#[cfg(feature = "python")]
impl From<OrgNetError> for pyo3::PyErr {
    fn from(err: OrgNetError) -> pyo3::PyErr {
        use pyo3::exceptions::{PyIOError, PyRuntimeError, PyValueError};
        match &err {
            OrgNetError::Database(_) | OrgNetError::Sqlite(_) => {
                PyRuntimeError::new_err(err.to_string())
            }
            OrgNetError::Analysis(_) | OrgNetError::RunInProgress(_) => {
                PyRuntimeError::new_err(err.to_string())
            }
            OrgNetError::Config(_) => PyValueError::new_err(err.to_string()),
            OrgNetError::Io(_) => PyIOError::new_err(err.to_string()),
            OrgNetError::Json(_) => PyValueError::new_err(err.to_string()),
        }
    }
}

pub type OrgNetResult<T> = Result<T, OrgNetError>;
