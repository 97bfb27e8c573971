//! Error types for the session engine.
//!
//! Fatal conditions inside a session never escape as process-level faults;
//! they are contained by the close sequence and reported through logging.
//! Only server start/stop errors and the session-closing condition reach
//! callers.

/// Errors surfaced by `Session::send` / `Session::recv`.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    /// The session's cancellation signal has fired; the caller should stop
    /// using the session. Not an application fault.
    #[error("session is closing")]
    Closing,
}

/// Errors surfaced by the server lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding the listener failed at construction time; reported when the
    /// server is started.
    #[error("failed to bind listener: {0}")]
    Bind(std::io::Error),
    /// The serve loop failed unexpectedly. Graceful shutdown never produces
    /// this.
    #[error("serve error: {0}")]
    Serve(std::io::Error),
}

/// Rejection returned by a pre-upgrade hook; the upgrade is aborted before
/// any session exists.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[error("upgrade rejected: {reason}")]
pub struct UpgradeRejected {
    /// Human-readable rejection reason (also logged).
    pub reason: String,
}

impl UpgradeRejected {
    /// Build a rejection with the given reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}
