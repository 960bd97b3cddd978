//! HTTP implementation of [`ChatApi`] against the Slack Web API.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Request, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::api::ChatApi;
use crate::error::ApiError;
use crate::transport::{RetryingTransport, Transport};
use crate::types::{
    ChannelEnvelope, ChannelListEnvelope, MembersEnvelope, RemoteChannel, ResponseMetadata,
    UserEnvelope,
};

pub const DEFAULT_API_URL: &str = "https://slack.com/api";

const PAGE_LIMIT: &str = "200";
const INVITE_BATCH: usize = 1000;

/// Slack Web API client.
///
/// Reads are `GET` with query parameters, writes are `POST` with JSON
/// bodies. Every request carries the bearer token and goes through the
/// configured [`Transport`].
pub struct SlackClient {
    http: reqwest::Client,
    transport: Arc<dyn Transport>,
    base_url: String,
    token: String,
}

impl SlackClient {
    pub fn new(
        base_url: &str,
        token: impl Into<String>,
        http: reqwest::Client,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            http,
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    /// Builds a client that sends through `transport`, sharing its
    /// connection pool.
    pub fn with_retrying_transport(
        base_url: &str,
        token: impl Into<String>,
        transport: RetryingTransport,
    ) -> Self {
        let http = transport.client().clone();
        Self::new(base_url, token, http, Arc::new(transport))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method)
    }

    fn get(&self, method: &str, query: &[(&str, &str)]) -> Result<Request, ApiError> {
        self.http
            .get(self.url(method))
            .bearer_auth(&self.token)
            .query(query)
            .build()
            .map_err(|e| ApiError::decode(method, format!("failed to build request: {e}")))
    }

    fn post(&self, method: &str, body: &Value) -> Result<Request, ApiError> {
        self.http
            .post(self.url(method))
            .bearer_auth(&self.token)
            .json(body)
            .build()
            .map_err(|e| ApiError::decode(method, format!("failed to build request: {e}")))
    }

    /// Sends `request` and unwraps the `{ok, error}` envelope.
    async fn call(&self, method: &str, request: Request) -> Result<Value, ApiError> {
        debug!(method, "calling chat API");
        let response = self
            .transport
            .execute(request)
            .await
            .map_err(|e| ApiError::transport(method, e))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ApiError::Auth {
                method: method.to_string(),
                code: format!("http_{}", status.as_u16()),
            });
        }
        if !status.is_success() {
            return Err(ApiError::Status {
                method: method.to_string(),
                status: status.as_u16(),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ApiError::decode(method, e.to_string()))?;

        if body.get("ok").and_then(Value::as_bool) == Some(true) {
            Ok(body)
        } else {
            let code = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown_error");
            Err(ApiError::from_code(method, code))
        }
    }

    async fn call_as<T: DeserializeOwned>(
        &self,
        method: &str,
        request: Request,
    ) -> Result<T, ApiError> {
        let body = self.call(method, request).await?;
        serde_json::from_value(body).map_err(|e| ApiError::decode(method, e.to_string()))
    }

    async fn list_members(&self, id: &str) -> Result<Vec<String>, ApiError> {
        const METHOD: &str = "conversations.members";
        let mut members = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut query = vec![("channel", id), ("limit", PAGE_LIMIT)];
            if let Some(c) = cursor.as_deref() {
                query.push(("cursor", c));
            }
            let request = self.get(METHOD, &query)?;
            let page: MembersEnvelope = self.call_as(METHOD, request).await?;
            members.extend(page.members);

            cursor = ResponseMetadata::next(page.response_metadata);
            if cursor.is_none() {
                return Ok(members);
            }
        }
    }

    /// `conversations.info` without the member list.
    async fn channel_info(&self, id: &str) -> Result<RemoteChannel, ApiError> {
        const METHOD: &str = "conversations.info";
        let request = self.get(METHOD, &[("channel", id)])?;
        let envelope: ChannelEnvelope = self.call_as(METHOD, request).await?;
        Ok(envelope.channel.into())
    }

    /// Runs a write, treating the listed remote codes as success.
    async fn write_tolerating(
        &self,
        method: &str,
        body: Value,
        tolerated: &[&str],
    ) -> Result<(), ApiError> {
        let request = self.post(method, &body)?;
        match self.call(method, request).await {
            Ok(_) => Ok(()),
            Err(e) if e.code().is_some_and(|code| tolerated.contains(&code)) => {
                debug!(method, code = e.code(), "already in requested state");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ChatApi for SlackClient {
    #[instrument(skip(self))]
    async fn create_channel(&self, name: &str, private: bool) -> Result<RemoteChannel, ApiError> {
        const METHOD: &str = "conversations.create";
        let request = self.post(METHOD, &json!({ "name": name, "is_private": private }))?;
        match self.call_as::<ChannelEnvelope>(METHOD, request).await {
            Ok(envelope) => Ok(envelope.channel.into()),
            Err(e) if e.code() == Some("name_taken") => Err(ApiError::name_taken(name)),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn get_channel(&self, id: &str) -> Result<RemoteChannel, ApiError> {
        let mut channel = self.channel_info(id).await?;
        channel.member_ids = self.list_members(id).await?;
        if channel.num_members == 0 {
            channel.num_members = channel.member_ids.len() as u32;
        }
        Ok(channel)
    }

    #[instrument(skip(self))]
    async fn get_channel_by_name(&self, name: &str) -> Result<Option<RemoteChannel>, ApiError> {
        const METHOD: &str = "conversations.list";
        let mut cursor: Option<String> = None;

        loop {
            let mut query = vec![
                ("types", "public_channel,private_channel"),
                ("exclude_archived", "true"),
                ("limit", PAGE_LIMIT),
            ];
            if let Some(c) = cursor.as_deref() {
                query.push(("cursor", c));
            }
            let request = self.get(METHOD, &query)?;
            let page: ChannelListEnvelope = self.call_as(METHOD, request).await?;

            if let Some(found) = page
                .channels
                .into_iter()
                .find(|c| c.name == name && !c.is_archived)
            {
                return Ok(Some(found.into()));
            }

            cursor = ResponseMetadata::next(page.response_metadata);
            if cursor.is_none() {
                return Ok(None);
            }
        }
    }

    #[instrument(skip(self))]
    async fn rename_channel(&self, id: &str, name: &str) -> Result<(), ApiError> {
        match self
            .write_tolerating(
                "conversations.rename",
                json!({ "channel": id, "name": name }),
                &[],
            )
            .await
        {
            // The name may be taken by this very channel
            Err(e) if e.code() == Some("name_taken") => {
                if self.channel_info(id).await?.name == name {
                    Ok(())
                } else {
                    Err(e)
                }
            }
            other => other,
        }
    }

    #[instrument(skip(self))]
    async fn set_topic(&self, id: &str, topic: &str) -> Result<(), ApiError> {
        self.write_tolerating(
            "conversations.setTopic",
            json!({ "channel": id, "topic": topic }),
            &[],
        )
        .await
    }

    #[instrument(skip(self))]
    async fn set_purpose(&self, id: &str, purpose: &str) -> Result<(), ApiError> {
        self.write_tolerating(
            "conversations.setPurpose",
            json!({ "channel": id, "purpose": purpose }),
            &[],
        )
        .await
    }

    #[instrument(skip(self))]
    async fn invite_users(&self, id: &str, user_ids: &[String]) -> Result<(), ApiError> {
        for batch in user_ids.chunks(INVITE_BATCH) {
            self.write_tolerating(
                "conversations.invite",
                json!({ "channel": id, "users": batch.join(",") }),
                &["already_in_channel"],
            )
            .await?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn kick_users(&self, id: &str, user_ids: &[String]) -> Result<(), ApiError> {
        for user in user_ids {
            self.write_tolerating(
                "conversations.kick",
                json!({ "channel": id, "user": user }),
                &["not_in_channel", "cant_kick_self"],
            )
            .await?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn archive_channel(&self, id: &str) -> Result<(), ApiError> {
        self.write_tolerating(
            "conversations.archive",
            json!({ "channel": id }),
            &["already_archived"],
        )
        .await
    }

    #[instrument(skip(self))]
    async fn lookup_user_id_by_email(&self, email: &str) -> Result<Option<String>, ApiError> {
        const METHOD: &str = "users.lookupByEmail";
        let request = self.get(METHOD, &[("email", email)])?;
        match self.call_as::<UserEnvelope>(METHOD, request).await {
            Ok(envelope) => Ok(Some(envelope.user.id)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
