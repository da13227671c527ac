//! Errors raised while collecting from a single source
//!
//! None of these ever reach the HTTP boundary: a failed source leaves its
//! field empty in the snapshot.

/// Failure of one collection step
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    /// Error returned by the container runtime API.
    #[error("container runtime error: {0}")]
    Runtime(#[from] bollard::errors::Error),

    /// Transport error while fetching a metrics endpoint.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-200 response from a metrics endpoint.
    #[error("endpoint returned HTTP {0}")]
    HttpStatus(u16),

    /// Filesystem error reading a kernel or state file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The step did not finish within its time bound.
    #[error("{0} timed out")]
    Timeout(&'static str),

    /// The collection pipeline was cancelled.
    #[error("collection cancelled")]
    Cancelled,

    /// The source answered but lacked a required value.
    #[error("missing data: {0}")]
    Missing(String),
}

impl CollectError {
    /// Short label used for the degradation counter
    pub fn kind(&self) -> &'static str {
        match self {
            CollectError::Runtime(_) => "runtime",
            CollectError::Http(_) | CollectError::HttpStatus(_) => "http",
            CollectError::Io(_) => "io",
            CollectError::Timeout(_) => "timeout",
            CollectError::Cancelled => "cancelled",
            CollectError::Missing(_) => "missing",
        }
    }
}

/// Convenience type alias for collection results.
pub type Result<T> = std::result::Result<T, CollectError>;
