//! HTTP fixture server exposing a [`FakeWorkspace`] over the Web API wire
//! format.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::fake::FakeWorkspace;
use crate::api::ChatApi;
use crate::error::ApiError;
use crate::types::RemoteChannel;

type Params = HashMap<String, String>;

struct ServerState {
    workspace: Arc<FakeWorkspace>,
    token: String,
    throttled: AtomicU32,
    retry_after_secs: u64,
    requests: AtomicU32,
}

/// A running fixture server bound to an ephemeral local port.
///
/// Shuts down when dropped.
pub struct FixtureServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    shutdown: CancellationToken,
}

impl FixtureServer {
    /// Starts serving `workspace`, accepting only `token` as bearer token.
    pub async fn start(workspace: Arc<FakeWorkspace>, token: &str) -> std::io::Result<Self> {
        let state = Arc::new(ServerState {
            workspace,
            token: token.to_string(),
            throttled: AtomicU32::new(0),
            retry_after_secs: 0,
            requests: AtomicU32::new(0),
        });

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let app = router(state.clone());

        let stop = shutdown.clone();
        tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { stop.cancelled().await })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "fixture server stopped");
            }
        });
        tracing::info!(url = %format!("http://{addr}"), "fixture server started");

        Ok(Self {
            addr,
            state,
            shutdown,
        })
    }

    pub fn api_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn workspace(&self) -> &Arc<FakeWorkspace> {
        &self.state.workspace
    }

    /// Answers the next `times` requests with HTTP 429 and `Retry-After: 0`.
    pub fn throttle_next(&self, times: u32) {
        self.state.throttled.store(times, Ordering::SeqCst);
    }

    /// Total HTTP requests received, throttled ones included.
    pub fn request_count(&self) -> u32 {
        self.state.requests.load(Ordering::SeqCst)
    }
}

impl Drop for FixtureServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/conversations.create", post(create))
        .route("/conversations.info", get(info))
        .route("/conversations.members", get(members))
        .route("/conversations.list", get(list))
        .route("/conversations.rename", post(rename))
        .route("/conversations.setTopic", post(set_topic))
        .route("/conversations.setPurpose", post(set_purpose))
        .route("/conversations.invite", post(invite))
        .route("/conversations.kick", post(kick))
        .route("/conversations.archive", post(archive))
        .route("/users.lookupByEmail", get(lookup_by_email))
        .with_state(state)
}

/// Applies throttling and authentication. Returns the response to send
/// instead of handling the request, if any.
fn gate(state: &ServerState, headers: &HeaderMap) -> Option<Response> {
    state.requests.fetch_add(1, Ordering::SeqCst);

    let throttled = state
        .throttled
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if throttled {
        return Some(
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, state.retry_after_secs.to_string())],
                Json(json!({ "ok": false, "error": "ratelimited" })),
            )
                .into_response(),
        );
    }

    let expected = format!("Bearer {}", state.token);
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected);
    if !authorized {
        return Some(failure("invalid_auth"));
    }
    None
}

fn failure(code: &str) -> Response {
    Json(json!({ "ok": false, "error": code })).into_response()
}

fn from_result(result: Result<Value, ApiError>) -> Response {
    match result {
        Ok(mut body) => {
            body["ok"] = Value::Bool(true);
            Json(body).into_response()
        }
        Err(e) => failure(e.code().unwrap_or("internal_error")),
    }
}

fn wire_channel(channel: &RemoteChannel) -> Value {
    json!({
        "id": channel.id,
        "name": channel.name,
        "is_channel": true,
        "is_private": channel.is_private,
        "is_archived": channel.is_archived,
        "creator": channel.creator.clone().unwrap_or_default(),
        "topic": { "value": channel.topic },
        "purpose": { "value": channel.purpose },
        "num_members": channel.num_members,
    })
}

fn param<'a>(params: &'a Params, name: &str) -> Result<&'a str, Response> {
    params
        .get(name)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| failure("invalid_arguments"))
}

fn field<'a>(body: &'a Value, name: &str) -> Result<&'a str, Response> {
    body.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| failure("invalid_arguments"))
}

/// Decodes an offset cursor and returns one page of `items`.
fn page<T: Clone>(items: &[T], params: &Params) -> (Vec<T>, String) {
    let limit = params
        .get("limit")
        .and_then(|l| l.parse::<usize>().ok())
        .filter(|l| *l > 0)
        .unwrap_or(100);
    let offset = params
        .get("cursor")
        .and_then(|c| c.parse::<usize>().ok())
        .unwrap_or(0);
    let end = (offset + limit).min(items.len());
    let slice = items.get(offset..end).unwrap_or_default().to_vec();
    let next = if end < items.len() {
        end.to_string()
    } else {
        String::new()
    };
    (slice, next)
}

async fn create(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Some(resp) = gate(&state, &headers) {
        return resp;
    }
    let name = match field(&body, "name") {
        Ok(name) => name,
        Err(resp) => return resp,
    };
    let private = body
        .get("is_private")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    from_result(
        state
            .workspace
            .create_channel(name, private)
            .await
            .map(|c| json!({ "channel": wire_channel(&c) })),
    )
}

async fn info(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Query(params): Query<Params>,
) -> Response {
    if let Some(resp) = gate(&state, &headers) {
        return resp;
    }
    let id = match param(&params, "channel") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    from_result(
        state
            .workspace
            .get_channel(id)
            .await
            .map(|c| json!({ "channel": wire_channel(&c) })),
    )
}

async fn members(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Query(params): Query<Params>,
) -> Response {
    if let Some(resp) = gate(&state, &headers) {
        return resp;
    }
    let id = match param(&params, "channel") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let Some(channel) = state.workspace.channel(id) else {
        return failure("channel_not_found");
    };
    let (members, next) = page(&channel.member_ids, &params);
    from_result(Ok(json!({
        "members": members,
        "response_metadata": { "next_cursor": next },
    })))
}

async fn list(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Query(params): Query<Params>,
) -> Response {
    if let Some(resp) = gate(&state, &headers) {
        return resp;
    }
    let exclude_archived = params
        .get("exclude_archived")
        .is_some_and(|v| v == "true");
    let channels: Vec<RemoteChannel> = state
        .workspace
        .channels()
        .into_iter()
        .filter(|c| !(exclude_archived && c.is_archived))
        .collect();
    let (channels, next) = page(&channels, &params);
    let channels: Vec<Value> = channels.iter().map(wire_channel).collect();
    from_result(Ok(json!({
        "channels": channels,
        "response_metadata": { "next_cursor": next },
    })))
}

async fn rename(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Some(resp) = gate(&state, &headers) {
        return resp;
    }
    let (id, name) = match (field(&body, "channel"), field(&body, "name")) {
        (Ok(id), Ok(name)) => (id, name),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };
    // The real API rejects renaming a channel to its current name
    if state.workspace.channel(id).is_some_and(|c| c.name == name) {
        return failure("name_taken");
    }
    from_result(
        state
            .workspace
            .rename_channel(id, name)
            .await
            .map(|()| json!({})),
    )
}

async fn set_topic(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Some(resp) = gate(&state, &headers) {
        return resp;
    }
    let (id, topic) = match (field(&body, "channel"), field(&body, "topic")) {
        (Ok(id), Ok(topic)) => (id, topic),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };
    from_result(state.workspace.set_topic(id, topic).await.map(|()| json!({})))
}

async fn set_purpose(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Some(resp) = gate(&state, &headers) {
        return resp;
    }
    let (id, purpose) = match (field(&body, "channel"), field(&body, "purpose")) {
        (Ok(id), Ok(purpose)) => (id, purpose),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };
    from_result(
        state
            .workspace
            .set_purpose(id, purpose)
            .await
            .map(|()| json!({})),
    )
}

async fn invite(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Some(resp) = gate(&state, &headers) {
        return resp;
    }
    let (id, users) = match (field(&body, "channel"), field(&body, "users")) {
        (Ok(id), Ok(users)) => (id, users),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };
    let user_ids: Vec<String> = users
        .split(',')
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(String::from)
        .collect();
    if user_ids.is_empty() {
        return failure("no_user");
    }
    // The real API refuses an invite made entirely of current members
    if let Some(channel) = state.workspace.channel(id)
        && user_ids.iter().all(|u| channel.member_ids.contains(u))
    {
        return failure("already_in_channel");
    }
    from_result(
        state
            .workspace
            .invite_users(id, &user_ids)
            .await
            .map(|()| json!({})),
    )
}

async fn kick(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Some(resp) = gate(&state, &headers) {
        return resp;
    }
    let (id, user) = match (field(&body, "channel"), field(&body, "user")) {
        (Ok(id), Ok(user)) => (id, user),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };
    if let Some(channel) = state.workspace.channel(id) {
        if channel.creator.as_deref() == Some(user) {
            return failure("cant_kick_self");
        }
        if !channel.member_ids.iter().any(|m| m == user) {
            return failure("not_in_channel");
        }
    }
    from_result(
        state
            .workspace
            .kick_users(id, &[user.to_string()])
            .await
            .map(|()| json!({})),
    )
}

async fn archive(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Some(resp) = gate(&state, &headers) {
        return resp;
    }
    let id = match field(&body, "channel") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    if state.workspace.channel(id).is_some_and(|c| c.is_archived) {
        return failure("already_archived");
    }
    from_result(state.workspace.archive_channel(id).await.map(|()| json!({})))
}

async fn lookup_by_email(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Query(params): Query<Params>,
) -> Response {
    if let Some(resp) = gate(&state, &headers) {
        return resp;
    }
    let email = match param(&params, "email") {
        Ok(email) => email,
        Err(resp) => return resp,
    };
    match state.workspace.lookup_user_id_by_email(email).await {
        Ok(Some(id)) => from_result(Ok(json!({ "user": { "id": id, "profile": { "email": email } } }))),
        Ok(None) => failure("users_not_found"),
        Err(e) => failure(e.code().unwrap_or("internal_error")),
    }
}
