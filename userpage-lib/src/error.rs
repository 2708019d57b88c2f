use crate::page::PageMode;

/// Failure reported by a document store, object store or auth service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("storage failure: {0}")]
    Storage(String),
}

impl BackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound(_))
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        BackendError::Transport(err.to_string())
    }
}

/// Errors returned by [`crate::ProfilePage`] operations.
///
/// Remote failures are already logged by the page when they are returned;
/// callers only need them for diagnostics.
#[derive(Debug, thiserror::Error)]
pub enum PageError {
    #[error("failed to load profile '{id}'")]
    Load {
        id: String,
        #[source]
        source: BackendError,
    },
    #[error("failed to write profile '{id}'")]
    Write {
        id: String,
        #[source]
        source: BackendError,
    },
    #[error("failed to upload picture for '{id}'")]
    Upload {
        id: String,
        #[source]
        source: BackendError,
    },
    #[error("failed to delete profile '{id}'")]
    Delete {
        id: String,
        #[source]
        source: BackendError,
    },
    #[error("auth operation '{operation}' failed")]
    Auth {
        operation: &'static str,
        #[source]
        source: BackendError,
    },
    #[error("operation '{operation}' is not allowed while {mode:?}")]
    InvalidState {
        operation: &'static str,
        mode: PageMode,
    },
    #[error("no profile is loaded for '{0}'")]
    NothingLoaded(String),
    #[error("unknown profile field '{0}'")]
    UnknownField(String),
}
