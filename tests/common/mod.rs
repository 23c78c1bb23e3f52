//! Scripted transport shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use prism_cli::config::{Config, Credentials};
use prism_cli::inference::{
    HttpResponse, HttpTransport, InferenceClient, InferenceError, RequestExecutor, RequestSpec,
};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub const TEST_API_KEY: &str = "test-key";

/// One scripted response, optionally held back until `gate` is notified
pub struct MockReply {
    pub status: u16,
    pub body: String,
    pub gate: Option<Arc<Notify>>,
}

impl MockReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            gate: None,
        }
    }

    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }
}

type Matcher = Box<dyn Fn(&RequestSpec) -> bool + Send + Sync>;

struct Route {
    matcher: Matcher,
    replies: Mutex<VecDeque<MockReply>>,
}

/// Answers requests from per-route queues and records everything it sees
#[derive(Default)]
pub struct MockTransport {
    routes: Vec<Route>,
    requests: Mutex<Vec<RequestSpec>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes are tried in the order they were added
    pub fn route(
        mut self,
        matcher: impl Fn(&RequestSpec) -> bool + Send + Sync + 'static,
        replies: Vec<MockReply>,
    ) -> Self {
        self.routes.push(Route {
            matcher: Box::new(matcher),
            replies: Mutex::new(replies.into()),
        });
        self
    }

    pub fn requests(&self) -> Vec<RequestSpec> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn count_matching(&self, matcher: impl Fn(&RequestSpec) -> bool) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| matcher(r))
            .count()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: &RequestSpec) -> Result<HttpResponse, InferenceError> {
        self.requests.lock().unwrap().push(request.clone());

        let reply = self
            .routes
            .iter()
            .find(|route| (route.matcher)(request))
            .and_then(|route| route.replies.lock().unwrap().pop_front());

        let Some(reply) = reply else {
            return Ok(HttpResponse::new(599, "no scripted reply"));
        };
        if let Some(gate) = reply.gate {
            gate.notified().await;
        }
        Ok(HttpResponse::new(reply.status, reply.body))
    }
}

fn first_message_content(request: &RequestSpec) -> Option<&Value> {
    request.body.as_ref()?.get("messages")?.get(0)?.get("content")
}

pub fn is_generation(request: &RequestSpec) -> bool {
    request.url.ends_with("/images/generations")
}

/// Vision calls carry a content array; plain chat carries strings
pub fn is_describe(request: &RequestSpec) -> bool {
    request.url.ends_with("/chat/completions")
        && first_message_content(request).is_some_and(Value::is_array)
}

pub fn is_chat(request: &RequestSpec) -> bool {
    request.url.ends_with("/chat/completions")
        && first_message_content(request).is_some_and(Value::is_string)
}

/// Matches a describe call for one specific image URL
pub fn describe_for(url: &'static str) -> impl Fn(&RequestSpec) -> bool + Send + Sync {
    move |request| {
        is_describe(request)
            && first_message_content(request)
                .and_then(Value::as_array)
                .is_some_and(|parts| {
                    parts.iter().any(|part| {
                        part.pointer("/image_url/url").and_then(Value::as_str) == Some(url)
                    })
                })
    }
}

pub fn image_body(url: &str) -> String {
    serde_json::json!({ "data": [{ "url": url }] }).to_string()
}

pub fn completion_body(content: &str) -> String {
    serde_json::json!({
        "choices": [{ "message": { "role": "assistant", "content": content } }]
    })
    .to_string()
}

pub fn client_with(transport: Arc<MockTransport>, credentials: Credentials) -> Arc<InferenceClient> {
    let config = Config::default();
    let executor = RequestExecutor::new(transport, config.retry.policy());
    Arc::new(InferenceClient::new(executor, config, Arc::new(credentials)))
}

pub fn test_client(transport: Arc<MockTransport>) -> Arc<InferenceClient> {
    client_with(transport, Credentials::new(Some(TEST_API_KEY.to_string()), None))
}
