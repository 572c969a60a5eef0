use thiserror::Error;

/// Session-level failure taxonomy.
///
/// None of these are fatal: every variant resolves back into one of the
/// five session phases. `Validation` and `Conflict` are surfaced inline and
/// keep (or return to) the submitting phase; `NotFound` forces a navigation
/// reset; `Store` covers transient service failures, which are logged and
/// shown as a generic message with no automatic retry.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0}")]
    Validation(String),

    #[error("room '{0}' was not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl SessionError {
    /// Message shown to the user. Store failures are deliberately generic —
    /// details go to the log, not the error slot.
    pub fn user_message(&self) -> String {
        match self {
            Self::Store(_) => "Something went wrong. Please try again.".to_string(),
            other => other.to_string(),
        }
    }
}
