//! Store error types.

use std::fmt;

use chanop_core::ResourceKey;

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested object was not found.
    #[error("Channel not found: {key}")]
    NotFound {
        /// Key of the missing object.
        key: ResourceKey,
    },

    /// The stored version changed since it was read.
    #[error("Version conflict on {key}: expected {expected}, found {actual}")]
    VersionConflict {
        /// Key of the conflicting object.
        key: ResourceKey,
        /// The version the caller read.
        expected: String,
        /// The version currently stored.
        actual: String,
    },

    /// Attempted to create an object that already exists.
    #[error("Channel already exists: {key}")]
    AlreadyExists {
        /// Key of the existing object.
        key: ResourceKey,
    },

    /// The object data is invalid.
    #[error("Invalid channel: {message}")]
    Invalid {
        /// Description of why the object is invalid.
        message: String,
    },

    /// An internal store error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl StoreError {
    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(key: &ResourceKey) -> Self {
        Self::NotFound { key: key.clone() }
    }

    /// Creates a new `VersionConflict` error.
    #[must_use]
    pub fn version_conflict(
        key: &ResourceKey,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::VersionConflict {
            key: key.clone(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates a new `AlreadyExists` error.
    #[must_use]
    pub fn already_exists(key: &ResourceKey) -> Self {
        Self::AlreadyExists { key: key.clone() }
    }

    /// Creates a new `Invalid` error.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a not found error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if this is a version conflict error.
    #[must_use]
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }

    /// Returns `true` if this is an already exists error.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Returns the error category for logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::VersionConflict { .. } | Self::AlreadyExists { .. } => ErrorCategory::Conflict,
            Self::Invalid { .. } => ErrorCategory::Validation,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

/// Categories of store errors for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    NotFound,
    Conflict,
    Validation,
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::Conflict => write!(f, "conflict"),
            Self::Validation => write!(f, "validation"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let key = ResourceKey::new("default", "bat-channel");
        let err = StoreError::not_found(&key);
        assert_eq!(err.to_string(), "Channel not found: default/bat-channel");

        let err = StoreError::version_conflict(&key, "1", "2");
        assert_eq!(
            err.to_string(),
            "Version conflict on default/bat-channel: expected 1, found 2"
        );
    }

    #[test]
    fn test_error_predicates_and_category() {
        let key = ResourceKey::new("default", "bat-channel");
        let err = StoreError::version_conflict(&key, "1", "2");
        assert!(err.is_version_conflict());
        assert!(!err.is_not_found());
        assert_eq!(err.category(), ErrorCategory::Conflict);

        let err = StoreError::already_exists(&key);
        assert!(err.is_already_exists());
        assert_eq!(err.category(), ErrorCategory::Conflict);
        assert_eq!(err.category().to_string(), "conflict");
    }
}
