use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ApiError;
use crate::types::RemoteChannel;

/// Capability interface over the remote chat workspace.
///
/// Every write is safe to repeat with identical arguments: responses meaning
/// "already in the requested state" are reported as success.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Creates a channel.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::NameTaken` if a channel with this name exists.
    async fn create_channel(&self, name: &str, private: bool) -> Result<RemoteChannel, ApiError>;

    /// Fetches a channel with its member list.
    async fn get_channel(&self, id: &str) -> Result<RemoteChannel, ApiError>;

    /// Finds a non-archived channel by name. Members are not populated.
    async fn get_channel_by_name(&self, name: &str) -> Result<Option<RemoteChannel>, ApiError>;

    async fn rename_channel(&self, id: &str, name: &str) -> Result<(), ApiError>;

    async fn set_topic(&self, id: &str, topic: &str) -> Result<(), ApiError>;

    async fn set_purpose(&self, id: &str, purpose: &str) -> Result<(), ApiError>;

    async fn invite_users(&self, id: &str, user_ids: &[String]) -> Result<(), ApiError>;

    async fn kick_users(&self, id: &str, user_ids: &[String]) -> Result<(), ApiError>;

    async fn archive_channel(&self, id: &str) -> Result<(), ApiError>;

    /// Resolves a user ID from an email address, `None` if no user has it.
    async fn lookup_user_id_by_email(&self, email: &str) -> Result<Option<String>, ApiError>;
}

/// Shared chat API trait object.
pub type DynChatApi = Arc<dyn ChatApi>;
