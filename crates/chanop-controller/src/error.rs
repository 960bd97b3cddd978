use chanop_core::CoreError;
use chanop_slack::ApiError;
use chanop_store::StoreError;
use thiserror::Error;

/// A failed reconcile pass.
///
/// The rendered message becomes the `ReconcileError` condition message, so
/// every variant reads as a sentence a user can act on.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid channel spec: {0}")]
    InvalidSpec(#[from] CoreError),

    #[error(
        "channel visibility cannot be changed: remote channel is {}, spec asks for {}",
        visibility(.remote),
        visibility(.desired)
    )]
    PrivacyMismatch { desired: bool, remote: bool },

    #[error("remote channel {remote_id} is archived")]
    Archived { remote_id: String },

    #[error("remote channel {remote_id} no longer exists")]
    RemoteGone { remote_id: String },

    #[error("channel name '{name}' is held by a channel that cannot be adopted, likely archived")]
    NameReserved { name: String },

    #[error("no workspace user has the email address {email}")]
    UnknownUser { email: String },

    #[error("{}", join_messages(.0))]
    Multiple(Vec<ReconcileError>),
}

fn visibility(private: &bool) -> &'static str {
    if *private { "private" } else { "public" }
}

fn join_messages(errors: &[ReconcileError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

impl ReconcileError {
    pub fn unknown_user(email: impl Into<String>) -> Self {
        Self::UnknownUser {
            email: email.into(),
        }
    }

    /// Folds collected failures into one error, `None` if there were none.
    pub fn aggregate(mut errors: Vec<ReconcileError>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Multiple(errors)),
        }
    }

    /// The pass was interrupted by shutdown rather than failing.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Api(e) => e.is_cancelled(),
            Self::Multiple(errors) => errors.iter().any(Self::is_cancelled),
            _ => false,
        }
    }

    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_version_conflict())
    }
}

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config build error: {0}")]
    Build(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}
