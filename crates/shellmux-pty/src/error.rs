use thiserror::Error;

/// Errors from PTY sessions.
#[derive(Debug, Error)]
pub enum SessionError {
    /// PTY allocation or exec failed. Fatal to that session only.
    #[error("failed to start process: {0}")]
    ProcessSpawnFailed(String),

    /// Write attempted on a session that is no longer running.
    #[error("session is closed")]
    SessionClosed,

    #[error("PTY resize failed: {0}")]
    Resize(String),

    #[error("PTY I/O error: {0}")]
    Io(#[from] std::io::Error),
}
