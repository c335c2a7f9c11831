#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// No personal, pool, or explicit credential was available. Nothing was
    /// sent over the network; the user has to obtain a credential first.
    #[error("no credentials available")]
    NoCredentials,

    /// The backend rejected the request content itself. Retrying with a
    /// different credential or server cannot change this outcome.
    #[error("content rejected: {message}")]
    Rejected { message: String },

    /// Every attempt in the plan failed with a transient error.
    #[error("all attempts failed: {last_error}")]
    Exhausted { attempts: usize, last_error: String },

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },
}

impl DispatchError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    pub fn exhausted(attempts: usize, last_error: impl Into<String>) -> Self {
        Self::Exhausted {
            attempts,
            last_error: last_error.into(),
        }
    }

    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// True for failures that further attempts could not have fixed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::NoCredentials | Self::Rejected { .. })
    }
}
