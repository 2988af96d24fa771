use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackfeedError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Source deauthorized us")]
    Deauthorized,

    #[error("Comment is currently leased by another worker")]
    LeaseContention,

    #[error("Comment record vanished: {0}")]
    RecordVanished(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl BackfeedError {
    /// Lease contention is expected under duplicate task delivery; it aborts
    /// the invocation without mutation and is never escalated as a data bug.
    pub fn is_contention(&self) -> bool {
        matches!(self, BackfeedError::LeaseContention)
    }
}
