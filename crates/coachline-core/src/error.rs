use thiserror::Error;

/// Top-level error type for Coachline.
#[derive(Debug, Error)]
pub enum CoachlineError {
    /// Error from an LLM provider.
    #[error("provider error: {0}")]
    Provider(String),

    /// Error from a messaging channel.
    #[error("channel error: {0}")]
    Channel(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Storage error.
    #[error("store error: {0}")]
    Store(String),

    /// Bad field input. Recovered by re-prompting the same step.
    #[error("{0}")]
    Validation(String),

    /// Unknown id or missing record.
    #[error("not found: {0}")]
    NotFound(String),

    /// A state invariant would be violated (second running task, double accept).
    #[error("conflict: {0}")]
    Conflict(String),

    /// An external call did not answer in time.
    #[error("timed out: {0}")]
    Timeout(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoachlineError {
    /// Whether the error is the caller's fault and safe to show verbatim.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::NotFound(_) | Self::Conflict(_)
        )
    }

    /// The bare message of a user-facing error, without the variant prefix.
    pub fn user_message(&self) -> Option<&str> {
        match self {
            Self::Validation(m) | Self::NotFound(m) | Self::Conflict(m) => Some(m),
            _ => None,
        }
    }
}
