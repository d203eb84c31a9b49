use std::time::Duration;

/// Errors shared across the greenhouse crates.
///
/// Every variant is local to a single request or startup step; none of them
/// should bring the process down once the server is running.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    /// The reading store could not be queried.
    #[error("failed to fetch sensor readings: {0}")]
    Source(String),

    /// The upstream completion stream could not be established.
    #[error("failed to open upstream stream: {0}")]
    UpstreamOpen(String),

    /// The upstream stream broke after it was opened.
    #[error("upstream stream failed: {0}")]
    UpstreamStream(String),

    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    /// The consuming side of a relay went away.
    #[error("client disconnected")]
    ClientDisconnected,

    #[error("validation error: {0}")]
    Validation(String),

    /// Missing, malformed or expired credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A task ended without reporting how it finished.
    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error came from the reader hanging up rather than from a
    /// server-side failure.
    pub fn is_client_disconnect(&self) -> bool {
        matches!(self, Error::ClientDisconnected)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
