//! Retrying HTTP transport.
//!
//! Every outbound call passes through a [`Transport`]. [`RetryingTransport`]
//! retries rate-limited, server-side and network failures with bounded
//! exponential backoff, honours `Retry-After`, and gives up after
//! [`RetryPolicy::retry_max`] attempts in total. Non-retriable responses are
//! returned to the caller untouched.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::TransportError;

/// Backoff and attempt budget for outbound calls.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub retry_max: u32,

    /// Backoff floor.
    #[serde(with = "humantime_serde")]
    pub wait_min: Duration,

    /// Backoff ceiling.
    #[serde(with = "humantime_serde")]
    pub wait_max: Duration,

    /// Limit for a single attempt, from connect to the end of the body. An
    /// attempt that runs out of time is retried like any network failure.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_max: 1000,
            wait_min: Duration::from_secs(1),
            wait_max: Duration::from_secs(60),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(retry_max: u32, wait_min: Duration, wait_max: Duration) -> Self {
        Self {
            retry_max,
            wait_min,
            wait_max,
            ..Self::default()
        }
    }

    pub fn with_timeouts(mut self, timeout: Duration, connect_timeout: Duration) -> Self {
        self.timeout = timeout;
        self.connect_timeout = connect_timeout;
        self
    }

    /// HTTP client enforcing the per-attempt timeouts.
    pub fn build_client(&self) -> Result<reqwest::Client, TransportError> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .build()
            .map_err(TransportError::Http)
    }

    /// Delay before the retry that follows failed attempt `attempt` (0-based).
    ///
    /// A server-provided `retry_after` replaces the computed value.
    pub fn backoff(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(retry_after) = retry_after {
            return retry_after;
        }
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.wait_min
            .checked_mul(factor)
            .unwrap_or(self.wait_max)
            .min(self.wait_max)
    }

    /// Rate limiting and server errors are retried. 501 means the method
    /// will never work.
    pub fn is_retryable_status(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS
            || (status.is_server_error() && status != StatusCode::NOT_IMPLEMENTED)
    }

    pub fn is_retryable_error(err: &reqwest::Error) -> bool {
        !err.is_builder() && (err.is_timeout() || err.is_connect() || err.is_request())
    }
}

/// Executes outbound requests.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: Request) -> Result<Response, TransportError>;
}

/// `reqwest` transport applying a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryingTransport {
    client: reqwest::Client,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl RetryingTransport {
    pub fn new(client: reqwest::Client, policy: RetryPolicy) -> Self {
        Self {
            client,
            policy,
            cancel: CancellationToken::new(),
        }
    }

    /// Builds the transport together with an HTTP client configured from
    /// `policy`.
    pub fn from_policy(policy: RetryPolicy) -> Result<Self, TransportError> {
        let client = policy.build_client()?;
        Ok(Self::new(client, policy))
    }

    /// Aborts in-flight requests and pending backoff sleeps once `cancel`
    /// fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

enum Failure {
    RateLimited,
    Status(StatusCode),
    Network(reqwest::Error),
}

impl Failure {
    fn describe(&self) -> String {
        match self {
            Self::RateLimited => "rate limited (HTTP 429)".to_string(),
            Self::Status(status) => format!("HTTP {status}"),
            Self::Network(err) => err.to_string(),
        }
    }
}

/// Parses a `Retry-After` header given in seconds.
fn retry_after(response: &Response) -> Option<Duration> {
    let status = response.status();
    if status != StatusCode::TOO_MANY_REQUESTS && status != StatusCode::SERVICE_UNAVAILABLE {
        return None;
    }
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl Transport for RetryingTransport {
    async fn execute(&self, request: Request) -> Result<Response, TransportError> {
        let method = request.method().clone();
        let url = request.url().clone();
        let budget = self.policy.retry_max.max(1);
        let mut attempt: u32 = 0;

        loop {
            let current = request
                .try_clone()
                .ok_or(TransportError::NotReplayable)?;

            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => return Err(TransportError::Cancelled),
                outcome = self.client.execute(current) => outcome,
            };
            attempt += 1;

            let (failure, hint) = match outcome {
                Ok(response) => {
                    let status = response.status();
                    if !RetryPolicy::is_retryable_status(status) {
                        return Ok(response);
                    }
                    let hint = retry_after(&response);
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        (Failure::RateLimited, hint)
                    } else {
                        (Failure::Status(status), hint)
                    }
                }
                Err(err) if RetryPolicy::is_retryable_error(&err) => (Failure::Network(err), None),
                Err(err) => return Err(TransportError::Http(err)),
            };

            if attempt >= budget {
                error!(
                    %method,
                    %url,
                    attempts = attempt,
                    error = %failure.describe(),
                    "giving up on request"
                );
                return Err(TransportError::Exhausted {
                    attempts: attempt,
                    last: failure.describe(),
                });
            }

            let wait = self.policy.backoff(attempt - 1, hint);
            match &failure {
                Failure::RateLimited => debug!(
                    %method,
                    %url,
                    attempt,
                    wait_ms = wait.as_millis() as u64,
                    "rate limited, retrying"
                ),
                other => warn!(
                    %method,
                    %url,
                    attempt,
                    wait_ms = wait.as_millis() as u64,
                    error = %other.describe(),
                    "request failed, retrying"
                ),
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(TransportError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}
