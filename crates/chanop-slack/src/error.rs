use thiserror::Error;

/// Failures raised by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request cancelled")]
    Cancelled,

    #[error("giving up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },

    #[error("request body cannot be replayed")]
    NotReplayable,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl TransportError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

/// Failures returned by a [`ChatApi`](crate::api::ChatApi) call.
///
/// Callers discriminate on the variant (or [`ApiError::code`]), never on the
/// rendered message.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{method}: not found ({code})")]
    NotFound { method: String, code: String },

    #[error("channel name '{name}' is already taken")]
    NameTaken { name: String },

    #[error("{method}: authentication failed ({code})")]
    Auth { method: String, code: String },

    #[error("{method}: invalid request ({code})")]
    InvalidRequest { method: String, code: String },

    #[error("{method} failed: {code}")]
    Remote { method: String, code: String },

    #[error("{method}: unexpected HTTP status {status}")]
    Status { method: String, status: u16 },

    #[error("{method}: {source}")]
    Transport {
        method: String,
        #[source]
        source: TransportError,
    },

    #[error("{method}: failed to decode response: {message}")]
    Decode { method: String, message: String },
}

impl ApiError {
    /// Classifies a remote `error` code returned with `ok: false`.
    pub fn from_code(method: &str, code: &str) -> Self {
        let method = method.to_string();
        let code_owned = code.to_string();
        match code {
            "channel_not_found" | "user_not_found" | "users_not_found" => Self::NotFound {
                method,
                code: code_owned,
            },
            "not_authed" | "invalid_auth" | "account_inactive" | "token_revoked"
            | "token_expired" | "missing_scope" | "not_allowed_token_type" => Self::Auth {
                method,
                code: code_owned,
            },
            "invalid_arguments" | "invalid_name" | "invalid_name_specials"
            | "invalid_name_punctuation" | "invalid_name_required" | "invalid_name_maxlength"
            | "too_long" | "no_user" | "invalid_cursor" => Self::InvalidRequest {
                method,
                code: code_owned,
            },
            _ => Self::Remote {
                method,
                code: code_owned,
            },
        }
    }

    pub fn not_found(method: &str, code: &str) -> Self {
        Self::NotFound {
            method: method.to_string(),
            code: code.to_string(),
        }
    }

    pub fn name_taken(name: impl Into<String>) -> Self {
        Self::NameTaken { name: name.into() }
    }

    pub fn transport(method: &str, source: TransportError) -> Self {
        Self::Transport {
            method: method.to_string(),
            source,
        }
    }

    pub fn decode(method: &str, message: impl Into<String>) -> Self {
        Self::Decode {
            method: method.to_string(),
            message: message.into(),
        }
    }

    /// The remote error code, when the failure carried one.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::NotFound { code, .. }
            | Self::Auth { code, .. }
            | Self::InvalidRequest { code, .. }
            | Self::Remote { code, .. } => Some(code),
            Self::NameTaken { .. } => Some("name_taken"),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_name_taken(&self) -> bool {
        matches!(self, Self::NameTaken { .. })
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Transport {
                source: TransportError::Cancelled,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_code_classification() {
        assert!(ApiError::from_code("conversations.info", "channel_not_found").is_not_found());
        assert!(ApiError::from_code("conversations.create", "invalid_auth").is_auth());
        assert!(matches!(
            ApiError::from_code("conversations.create", "invalid_name_specials"),
            ApiError::InvalidRequest { .. }
        ));

        let err = ApiError::from_code("conversations.invite", "already_in_channel");
        assert_eq!(err.code(), Some("already_in_channel"));
        assert_eq!(
            err.to_string(),
            "conversations.invite failed: already_in_channel"
        );
    }

    #[test]
    fn test_cancelled_transport_error() {
        let err = ApiError::transport("conversations.info", TransportError::Cancelled);
        assert!(err.is_cancelled());
        assert_eq!(err.code(), None);
    }
}
