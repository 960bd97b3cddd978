use serde::{Deserialize, Serialize};

/// A channel as the remote workspace reports it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteChannel {
    pub id: String,
    pub name: String,
    pub is_private: bool,
    pub is_archived: bool,
    pub topic: String,
    pub purpose: String,
    /// User that created the channel, normally the operator's own bot user.
    pub creator: Option<String>,
    /// Current members. Only populated by `ChatApi::get_channel`.
    pub member_ids: Vec<String>,
    pub num_members: u32,
}

/// Channel object in the remote wire format.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WireChannel {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub creator: Option<String>,
    #[serde(default)]
    pub topic: Option<WireTextValue>,
    #[serde(default)]
    pub purpose: Option<WireTextValue>,
    #[serde(default)]
    pub num_members: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WireTextValue {
    #[serde(default)]
    pub value: String,
}

impl From<WireChannel> for RemoteChannel {
    fn from(wire: WireChannel) -> Self {
        Self {
            id: wire.id,
            name: wire.name,
            is_private: wire.is_private,
            is_archived: wire.is_archived,
            topic: wire.topic.map(|t| t.value).unwrap_or_default(),
            purpose: wire.purpose.map(|p| p.value).unwrap_or_default(),
            creator: wire.creator.filter(|c| !c.is_empty()),
            member_ids: Vec::new(),
            num_members: wire.num_members.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChannelEnvelope {
    pub channel: WireChannel,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChannelListEnvelope {
    #[serde(default)]
    pub channels: Vec<WireChannel>,
    #[serde(default)]
    pub response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MembersEnvelope {
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UserEnvelope {
    pub user: WireUser,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireUser {
    pub id: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ResponseMetadata {
    #[serde(default)]
    pub next_cursor: Option<String>,
}

impl ResponseMetadata {
    /// The cursor for the next page, if there is one.
    pub fn next(metadata: Option<Self>) -> Option<String> {
        metadata
            .and_then(|m| m.next_cursor)
            .filter(|c| !c.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_channel_conversion() {
        let json = serde_json::json!({
            "id": "C0EAQDV4Z",
            "name": "bat-channel",
            "is_channel": true,
            "is_private": false,
            "is_archived": false,
            "creator": "U023BECGF",
            "topic": { "value": "random topic", "creator": "U023BECGF", "last_set": 0 },
            "purpose": { "value": "My channel Description", "creator": "", "last_set": 0 },
            "num_members": 3
        });
        let wire: WireChannel = serde_json::from_value(json).unwrap();
        let channel = RemoteChannel::from(wire);

        assert_eq!(channel.id, "C0EAQDV4Z");
        assert_eq!(channel.topic, "random topic");
        assert_eq!(channel.purpose, "My channel Description");
        assert_eq!(channel.creator.as_deref(), Some("U023BECGF"));
        assert_eq!(channel.num_members, 3);
        assert!(channel.member_ids.is_empty());
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let wire: WireChannel =
            serde_json::from_value(serde_json::json!({ "id": "C1", "name": "x" })).unwrap();
        let channel = RemoteChannel::from(wire);
        assert_eq!(channel.topic, "");
        assert!(!channel.is_private);
        assert_eq!(channel.creator, None);
    }

    #[test]
    fn test_empty_cursor_means_last_page() {
        let meta = ResponseMetadata {
            next_cursor: Some(String::new()),
        };
        assert_eq!(ResponseMetadata::next(Some(meta)), None);
        assert_eq!(ResponseMetadata::next(None), None);
    }
}
