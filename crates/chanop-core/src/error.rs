use thiserror::Error;

/// Errors raised while validating channel resources.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid channel name '{name}': {reason}")]
    InvalidChannelName { name: String, reason: String },

    #[error("Invalid user email '{0}'")]
    InvalidEmail(String),

    #[error("Invalid resource key: {0}")]
    InvalidKey(String),
}

impl CoreError {
    /// Create a new InvalidChannelName error
    pub fn invalid_channel_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidChannelName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a new InvalidEmail error
    pub fn invalid_email(email: impl Into<String>) -> Self {
        Self::InvalidEmail(email.into())
    }

    /// Create a new InvalidKey error
    pub fn invalid_key(key: impl Into<String>) -> Self {
        Self::InvalidKey(key.into())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
