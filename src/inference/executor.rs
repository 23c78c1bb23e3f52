//! Single-request execution under the backoff policy
//!
//! [`RequestExecutor`] is the only place that talks to the network. Every
//! endpoint call goes through it, so rate-limit handling lives in one spot:
//!
//! 1. send the request
//! 2. 429 -> ask [`BackoffPolicy`]; wait and resend, or give up as `RateLimited`
//! 3. any other non-2xx -> `ServiceError` immediately
//! 4. 2xx -> run the caller's extractor; `MalformedResponse` if it finds nothing
//!
//! The HTTP layer sits behind [`HttpTransport`] so tests can script responses.

use super::backoff::{BackoffDecision, BackoffPolicy, RATE_LIMIT_STATUS};
use super::error::InferenceError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Longest slice of an error body kept in a `ServiceError` detail
const MAX_ERROR_DETAIL_CHARS: usize = 200;

/// Everything needed to issue one JSON POST
#[derive(Clone)]
pub struct RequestSpec {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl RequestSpec {
    pub fn post_json(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            url: url.into(),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: Some(body),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_bearer(self, token: &str) -> Self {
        self.with_header("Authorization", format!("Bearer {}", token))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

// Credentials must never reach the logs.
impl std::fmt::Debug for RequestSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let headers: Vec<(&str, &str)> = self
            .headers
            .iter()
            .map(|(k, v)| {
                if k.eq_ignore_ascii_case("authorization") {
                    (k.as_str(), "<redacted>")
                } else {
                    (k.as_str(), v.as_str())
                }
            })
            .collect();
        f.debug_struct("RequestSpec")
            .field("url", &self.url)
            .field("headers", &headers)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

/// Status and body of an HTTP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends one request and returns whatever status came back
///
/// Only failures that prevent an HTTP response at all are errors here;
/// status interpretation belongs to the executor.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &RequestSpec) -> Result<HttpResponse, InferenceError>;
}

/// Production transport backed by `reqwest`
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &RequestSpec) -> Result<HttpResponse, InferenceError> {
        let mut builder = self.client.post(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(InferenceError::from_network_error)?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(InferenceError::from_network_error)?;
        Ok(HttpResponse { status, body })
    }
}

/// Told about every HTTP attempt as soon as it has been made
///
/// Lets an operation report how many attempts it has used while it is
/// still pending.
#[async_trait]
pub trait AttemptObserver: Send + Sync {
    async fn on_attempt(&self, attempt: u32);
}

/// Ignores progress
#[async_trait]
impl AttemptObserver for () {
    async fn on_attempt(&self, _attempt: u32) {}
}

/// Terminal result of an executed request
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Success(T),
    Failure(InferenceError),
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Success(value) => Outcome::Success(f(value)),
            Outcome::Failure(err) => Outcome::Failure(err),
        }
    }

    pub fn into_result(self) -> Result<T, InferenceError> {
        match self {
            Outcome::Success(value) => Ok(value),
            Outcome::Failure(err) => Err(err),
        }
    }
}

impl<T> From<Result<T, InferenceError>> for Outcome<T> {
    fn from(result: Result<T, InferenceError>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(err) => Outcome::Failure(err),
        }
    }
}

/// An [`Outcome`] together with how many HTTP attempts produced it
#[derive(Debug, Clone, PartialEq)]
pub struct Completion<T> {
    pub outcome: Outcome<T>,
    pub attempts: u32,
}

impl<T> Completion<T> {
    /// Failure reached without touching the network
    pub fn rejected(err: InferenceError) -> Self {
        Self {
            outcome: Outcome::Failure(err),
            attempts: 0,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Completion<U> {
        Completion {
            outcome: self.outcome.map(f),
            attempts: self.attempts,
        }
    }
}

/// Per-invocation retry bookkeeping; dropped once the call is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryContext {
    pub attempt: u32,
    pub delay: Duration,
    pub max_attempts: u32,
}

impl RetryContext {
    fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            delay: Duration::ZERO,
            max_attempts,
        }
    }
}

/// Executes requests under a [`BackoffPolicy`]
///
/// Holds no per-call state, so one executor can serve concurrent callers.
#[derive(Clone)]
pub struct RequestExecutor {
    transport: Arc<dyn HttpTransport>,
    policy: BackoffPolicy,
}

impl RequestExecutor {
    pub fn new(transport: Arc<dyn HttpTransport>, policy: BackoffPolicy) -> Self {
        Self { transport, policy }
    }

    /// Execute and run `extract` over a 2xx body
    ///
    /// `extract` returns `Err(reason)` when the body lacks the expected
    /// payload; that becomes `MalformedResponse` and is never retried.
    /// `progress` hears the running attempt count after every send.
    pub async fn execute_with<T, F>(
        &self,
        request: &RequestSpec,
        progress: &dyn AttemptObserver,
        extract: F,
    ) -> Completion<T>
    where
        F: FnOnce(&str) -> Result<T, String>,
    {
        let mut ctx = RetryContext::new(self.policy.max_attempts());

        let response = loop {
            tracing::debug!("Sending POST {} (attempt {})", request.url, ctx.attempt + 1);
            let sent = self.transport.send(request).await;
            ctx.attempt += 1;
            progress.on_attempt(ctx.attempt).await;

            let response = match sent {
                Ok(response) => response,
                Err(err) => {
                    tracing::warn!("Request to {} failed: {}", request.url, err);
                    return Completion {
                        outcome: Outcome::Failure(err),
                        attempts: ctx.attempt,
                    };
                }
            };

            if response.status != RATE_LIMIT_STATUS {
                break response;
            }

            match self.policy.decide(ctx.attempt, response.status) {
                BackoffDecision::Retry(delay) => {
                    ctx.delay = delay;
                    tracing::warn!(
                        "Rate limited by {}, retrying in {}ms ({}/{})",
                        request.url,
                        delay.as_millis(),
                        ctx.attempt,
                        ctx.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                }
                BackoffDecision::GiveUp => {
                    tracing::warn!(
                        "Rate limited by {}, giving up after {} attempts",
                        request.url,
                        ctx.attempt
                    );
                    return Completion {
                        outcome: Outcome::Failure(InferenceError::RateLimited {
                            attempts: ctx.attempt,
                        }),
                        attempts: ctx.attempt,
                    };
                }
            }
        };

        let outcome = if response.is_success() {
            match extract(&response.body) {
                Ok(value) => Outcome::Success(value),
                Err(reason) => {
                    tracing::warn!("Malformed response from {}: {}", request.url, reason);
                    Outcome::Failure(InferenceError::MalformedResponse(reason))
                }
            }
        } else {
            tracing::warn!("{} returned HTTP {}", request.url, response.status);
            Outcome::Failure(InferenceError::ServiceError {
                status: response.status,
                detail: truncate_detail(&response.body),
            })
        };

        Completion {
            outcome,
            attempts: ctx.attempt,
        }
    }
}

fn truncate_detail(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX_ERROR_DETAIL_CHARS {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(MAX_ERROR_DETAIL_CHARS).collect();
        format!("{}...", cut)
    }
}
