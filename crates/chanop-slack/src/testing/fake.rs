//! In-memory chat workspace.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::api::ChatApi;
use crate::error::ApiError;
use crate::types::RemoteChannel;

/// User ID of the bot the fake workspace acts as.
pub const BOT_USER_ID: &str = "U023BECGF";

/// One recorded call against the fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    CreateChannel { name: String, private: bool },
    GetChannel { id: String },
    GetChannelByName { name: String },
    RenameChannel { id: String, name: String },
    SetTopic { id: String, topic: String },
    SetPurpose { id: String, purpose: String },
    InviteUsers { id: String, user_ids: Vec<String> },
    KickUsers { id: String, user_ids: Vec<String> },
    ArchiveChannel { id: String },
    LookupUserIdByEmail { email: String },
}

impl ApiCall {
    pub fn operation(&self) -> Operation {
        match self {
            Self::CreateChannel { .. } => Operation::CreateChannel,
            Self::GetChannel { .. } => Operation::GetChannel,
            Self::GetChannelByName { .. } => Operation::GetChannelByName,
            Self::RenameChannel { .. } => Operation::RenameChannel,
            Self::SetTopic { .. } => Operation::SetTopic,
            Self::SetPurpose { .. } => Operation::SetPurpose,
            Self::InviteUsers { .. } => Operation::InviteUsers,
            Self::KickUsers { .. } => Operation::KickUsers,
            Self::ArchiveChannel { .. } => Operation::ArchiveChannel,
            Self::LookupUserIdByEmail { .. } => Operation::LookupUserIdByEmail,
        }
    }

    /// Whether the call changes remote state.
    pub fn is_write(&self) -> bool {
        !matches!(
            self.operation(),
            Operation::GetChannel | Operation::GetChannelByName | Operation::LookupUserIdByEmail
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateChannel,
    GetChannel,
    GetChannelByName,
    RenameChannel,
    SetTopic,
    SetPurpose,
    InviteUsers,
    KickUsers,
    ArchiveChannel,
    LookupUserIdByEmail,
}

impl Operation {
    /// Remote method name, used in error values.
    pub fn method(self) -> &'static str {
        match self {
            Self::CreateChannel => "conversations.create",
            Self::GetChannel => "conversations.info",
            Self::GetChannelByName => "conversations.list",
            Self::RenameChannel => "conversations.rename",
            Self::SetTopic => "conversations.setTopic",
            Self::SetPurpose => "conversations.setPurpose",
            Self::InviteUsers => "conversations.invite",
            Self::KickUsers => "conversations.kick",
            Self::ArchiveChannel => "conversations.archive",
            Self::LookupUserIdByEmail => "users.lookupByEmail",
        }
    }
}

#[derive(Debug)]
struct Fault {
    operation: Operation,
    remaining: u32,
    code: String,
}

#[derive(Debug, Default)]
struct WorkspaceState {
    channels: BTreeMap<String, RemoteChannel>,
    users: BTreeMap<String, String>,
    next_channel: u64,
    next_user: u64,
    calls: Vec<ApiCall>,
    faults: Vec<Fault>,
}

impl WorkspaceState {
    fn record(&mut self, call: ApiCall) -> Result<(), ApiError> {
        let operation = call.operation();
        self.calls.push(call);

        if let Some(fault) = self
            .faults
            .iter_mut()
            .find(|f| f.operation == operation && f.remaining > 0)
        {
            fault.remaining -= 1;
            return Err(ApiError::from_code(operation.method(), &fault.code));
        }
        Ok(())
    }

    fn live_channel_named(&self, name: &str) -> Option<&RemoteChannel> {
        self.channels
            .values()
            .find(|c| c.name == name && !c.is_archived)
    }

    /// Archived channels keep their name reserved.
    fn name_in_use(&self, name: &str) -> Option<&RemoteChannel> {
        self.channels.values().find(|c| c.name == name)
    }

    fn channel_mut(
        &mut self,
        operation: Operation,
        id: &str,
    ) -> Result<&mut RemoteChannel, ApiError> {
        self.channels
            .get_mut(id)
            .ok_or_else(|| ApiError::not_found(operation.method(), "channel_not_found"))
    }

    fn writable_channel(
        &mut self,
        operation: Operation,
        id: &str,
    ) -> Result<&mut RemoteChannel, ApiError> {
        let channel = self.channel_mut(operation, id)?;
        if channel.is_archived {
            return Err(ApiError::from_code(operation.method(), "is_archived"));
        }
        Ok(channel)
    }

    fn insert_channel(&mut self, name: &str, private: bool) -> RemoteChannel {
        self.next_channel += 1;
        let id = format!("C{:08X}", self.next_channel);
        let channel = RemoteChannel {
            id: id.clone(),
            name: name.to_string(),
            is_private: private,
            is_archived: false,
            topic: String::new(),
            purpose: String::new(),
            creator: Some(BOT_USER_ID.to_string()),
            member_ids: vec![BOT_USER_ID.to_string()],
            num_members: 1,
        };
        self.channels.insert(id, channel.clone());
        channel
    }
}

/// Deterministic in-memory implementation of [`ChatApi`].
///
/// Every call is recorded, in order, before it is applied, so tests can
/// assert exact call counts and ordering. Failures can be injected per
/// operation with [`FakeWorkspace::fail_next`].
#[derive(Debug, Default)]
pub struct FakeWorkspace {
    state: Mutex<WorkspaceState>,
}

impl FakeWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, WorkspaceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a user and returns its ID.
    pub fn add_user(&self, email: &str) -> String {
        let mut state = self.state();
        if let Some(id) = state.users.get(email) {
            return id.clone();
        }
        state.next_user += 1;
        let id = format!("W{:08X}", state.next_user);
        state.users.insert(email.to_string(), id.clone());
        id
    }

    /// Seeds a channel without recording a call.
    pub fn add_channel(&self, name: &str, private: bool) -> RemoteChannel {
        self.state().insert_channel(name, private)
    }

    /// Mutates a channel directly, as someone using the chat client would.
    pub fn edit_channel(&self, id: &str, edit: impl FnOnce(&mut RemoteChannel)) -> bool {
        let mut state = self.state();
        match state.channels.get_mut(id) {
            Some(channel) => {
                edit(channel);
                channel.num_members = channel.member_ids.len() as u32;
                true
            }
            None => false,
        }
    }

    /// Makes the next `times` calls of `operation` fail with remote `code`.
    pub fn fail_next(&self, operation: Operation, times: u32, code: &str) {
        self.state().faults.push(Fault {
            operation,
            remaining: times,
            code: code.to_string(),
        });
    }

    pub fn clear_faults(&self) {
        self.state().faults.clear();
    }

    pub fn channel(&self, id: &str) -> Option<RemoteChannel> {
        self.state().channels.get(id).cloned()
    }

    pub fn channel_named(&self, name: &str) -> Option<RemoteChannel> {
        self.state().live_channel_named(name).cloned()
    }

    /// Snapshot of every channel, archived ones included, ordered by ID.
    pub fn channels(&self) -> Vec<RemoteChannel> {
        self.state().channels.values().cloned().collect()
    }

    pub fn user_id(&self, email: &str) -> Option<String> {
        self.state().users.get(email).cloned()
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.state().calls.clone()
    }

    pub fn writes(&self) -> Vec<ApiCall> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.is_write())
            .cloned()
            .collect()
    }

    pub fn count(&self, operation: Operation) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.operation() == operation)
            .count()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }
}

#[async_trait]
impl ChatApi for FakeWorkspace {
    async fn create_channel(&self, name: &str, private: bool) -> Result<RemoteChannel, ApiError> {
        let mut state = self.state();
        state.record(ApiCall::CreateChannel {
            name: name.to_string(),
            private,
        })?;
        if state.name_in_use(name).is_some() {
            return Err(ApiError::name_taken(name));
        }
        Ok(state.insert_channel(name, private))
    }

    async fn get_channel(&self, id: &str) -> Result<RemoteChannel, ApiError> {
        let mut state = self.state();
        state.record(ApiCall::GetChannel { id: id.to_string() })?;
        state
            .channel_mut(Operation::GetChannel, id)
            .map(|c| c.clone())
    }

    async fn get_channel_by_name(&self, name: &str) -> Result<Option<RemoteChannel>, ApiError> {
        let mut state = self.state();
        state.record(ApiCall::GetChannelByName {
            name: name.to_string(),
        })?;
        Ok(state.live_channel_named(name).map(|c| RemoteChannel {
            member_ids: Vec::new(),
            ..c.clone()
        }))
    }

    async fn rename_channel(&self, id: &str, name: &str) -> Result<(), ApiError> {
        let mut state = self.state();
        state.record(ApiCall::RenameChannel {
            id: id.to_string(),
            name: name.to_string(),
        })?;
        if state
            .name_in_use(name)
            .is_some_and(|other| other.id != id)
        {
            return Err(ApiError::from_code(
                Operation::RenameChannel.method(),
                "name_taken",
            ));
        }
        state
            .writable_channel(Operation::RenameChannel, id)?
            .name = name.to_string();
        Ok(())
    }

    async fn set_topic(&self, id: &str, topic: &str) -> Result<(), ApiError> {
        let mut state = self.state();
        state.record(ApiCall::SetTopic {
            id: id.to_string(),
            topic: topic.to_string(),
        })?;
        state.writable_channel(Operation::SetTopic, id)?.topic = topic.to_string();
        Ok(())
    }

    async fn set_purpose(&self, id: &str, purpose: &str) -> Result<(), ApiError> {
        let mut state = self.state();
        state.record(ApiCall::SetPurpose {
            id: id.to_string(),
            purpose: purpose.to_string(),
        })?;
        state.writable_channel(Operation::SetPurpose, id)?.purpose = purpose.to_string();
        Ok(())
    }

    async fn invite_users(&self, id: &str, user_ids: &[String]) -> Result<(), ApiError> {
        let mut state = self.state();
        state.record(ApiCall::InviteUsers {
            id: id.to_string(),
            user_ids: user_ids.to_vec(),
        })?;
        let known = user_ids
            .iter()
            .all(|u| u == BOT_USER_ID || state.users.values().any(|v| v == u));
        if !known {
            return Err(ApiError::not_found(
                Operation::InviteUsers.method(),
                "user_not_found",
            ));
        }
        let channel = state.writable_channel(Operation::InviteUsers, id)?;
        for user in user_ids {
            if !channel.member_ids.contains(user) {
                channel.member_ids.push(user.clone());
            }
        }
        channel.num_members = channel.member_ids.len() as u32;
        Ok(())
    }

    async fn kick_users(&self, id: &str, user_ids: &[String]) -> Result<(), ApiError> {
        let mut state = self.state();
        state.record(ApiCall::KickUsers {
            id: id.to_string(),
            user_ids: user_ids.to_vec(),
        })?;
        let channel = state.writable_channel(Operation::KickUsers, id)?;
        channel
            .member_ids
            .retain(|m| m == BOT_USER_ID || !user_ids.contains(m));
        channel.num_members = channel.member_ids.len() as u32;
        Ok(())
    }

    async fn archive_channel(&self, id: &str) -> Result<(), ApiError> {
        let mut state = self.state();
        state.record(ApiCall::ArchiveChannel { id: id.to_string() })?;
        state.channel_mut(Operation::ArchiveChannel, id)?.is_archived = true;
        Ok(())
    }

    async fn lookup_user_id_by_email(&self, email: &str) -> Result<Option<String>, ApiError> {
        let mut state = self.state();
        state.record(ApiCall::LookupUserIdByEmail {
            email: email.to_string(),
        })?;
        Ok(state.users.get(email).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_is_recorded_and_assigns_id() {
        let fake = FakeWorkspace::new();
        let channel = fake.create_channel("bat-channel", false).await.unwrap();

        assert!(channel.id.starts_with('C'));
        assert_eq!(channel.member_ids, vec![BOT_USER_ID.to_string()]);
        assert_eq!(fake.count(Operation::CreateChannel), 1);
        assert!(
            fake.create_channel("bat-channel", true)
                .await
                .unwrap_err()
                .is_name_taken()
        );
    }

    #[tokio::test]
    async fn test_archived_channel_keeps_its_name() {
        let fake = FakeWorkspace::new();
        let channel = fake.create_channel("bat-channel", false).await.unwrap();
        fake.archive_channel(&channel.id).await.unwrap();

        assert!(fake.get_channel_by_name("bat-channel").await.unwrap().is_none());
        assert!(
            fake.create_channel("bat-channel", false)
                .await
                .unwrap_err()
                .is_name_taken()
        );
        let other = fake.add_channel("cat-channel", false);
        let err = fake.rename_channel(&other.id, "bat-channel").await.unwrap_err();
        assert_eq!(err.code(), Some("name_taken"));
    }

    #[tokio::test]
    async fn test_writes_are_idempotent() {
        let fake = FakeWorkspace::new();
        let user = fake.add_user("spengler@ghostbusters.example.com");
        let channel = fake.add_channel("bat-channel", false);

        fake.invite_users(&channel.id, &[user.clone()]).await.unwrap();
        fake.invite_users(&channel.id, &[user.clone()]).await.unwrap();
        assert_eq!(fake.channel(&channel.id).unwrap().num_members, 2);

        fake.kick_users(&channel.id, &[user.clone()]).await.unwrap();
        fake.kick_users(&channel.id, &[user]).await.unwrap();
        assert_eq!(fake.channel(&channel.id).unwrap().num_members, 1);

        fake.archive_channel(&channel.id).await.unwrap();
        fake.archive_channel(&channel.id).await.unwrap();
        assert!(fake.channel(&channel.id).unwrap().is_archived);
    }

    #[tokio::test]
    async fn test_bot_is_never_kicked() {
        let fake = FakeWorkspace::new();
        let channel = fake.add_channel("bat-channel", false);
        fake.kick_users(&channel.id, &[BOT_USER_ID.to_string()])
            .await
            .unwrap();
        assert_eq!(fake.channel(&channel.id).unwrap().member_ids, vec![BOT_USER_ID]);
    }

    #[tokio::test]
    async fn test_fault_injection_is_bounded() {
        let fake = FakeWorkspace::new();
        let channel = fake.add_channel("bat-channel", false);
        fake.fail_next(Operation::SetTopic, 1, "ratelimited");

        let err = fake.set_topic(&channel.id, "t").await.unwrap_err();
        assert_eq!(err.code(), Some("ratelimited"));
        fake.set_topic(&channel.id, "t").await.unwrap();

        assert_eq!(fake.count(Operation::SetTopic), 2);
        assert_eq!(fake.channel(&channel.id).unwrap().topic, "t");
    }

    #[tokio::test]
    async fn test_unknown_channel_is_not_found() {
        let fake = FakeWorkspace::new();
        assert!(fake.get_channel("C404").await.unwrap_err().is_not_found());
        assert_eq!(fake.lookup_user_id_by_email("nobody@example.com").await.unwrap(), None);
    }
}
