use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Language not supported: {0}")]
    UnsupportedLanguage(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Service busy: no execution slot became free within {0} ms")]
    Busy(u64),

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Surfaced to the client as a generic message plus the correlation id;
    /// the underlying cause is only logged server-side.
    #[error("Internal execution error (correlation id {correlation_id})")]
    Internal { correlation_id: Uuid },
}

impl Error {
    /// Whether the caller may retry the identical request. Deterministic
    /// failures (bad language, compile/runtime outcomes) must not be.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Busy(_) | Error::Internal { .. })
    }
}
