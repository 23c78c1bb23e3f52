//! Endpoint-specific calls on top of [`RequestExecutor`]
//!
//! Builds the image, vision and chat request bodies, attaches the bearer
//! credential, and pulls the expected payload out of each response. All
//! three share the executor's retry/backoff handling.
//!
//! SECURITY: credentials are only sent to the configured endpoints.

use super::executor::{
    AttemptObserver, Completion, RequestExecutor, RequestSpec, ReqwestTransport,
};
use super::types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ImageGenerationRequest,
    ImageGenerationResponse, ImageReference, VisionRequest,
};
use super::InferenceError;
use crate::config::{Config, Credentials, API_KEY_ENV, CHAT_API_KEY_ENV};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Prefix marking replies that did not come from the service
pub const DEMO_REPLY_PREFIX: &str = "🤖 (demo)";

/// Client for the inference service
#[derive(Clone)]
pub struct InferenceClient {
    executor: RequestExecutor,
    config: Config,
    credentials: Arc<Credentials>,
}

impl InferenceClient {
    pub fn new(executor: RequestExecutor, config: Config, credentials: Arc<Credentials>) -> Self {
        Self {
            executor,
            config,
            credentials,
        }
    }

    /// Client talking to the real service over HTTPS
    pub fn from_config(config: Config, credentials: Arc<Credentials>) -> Self {
        let executor = RequestExecutor::new(
            Arc::new(ReqwestTransport::new()),
            config.retry.policy(),
        );
        Self::new(executor, config, credentials)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether chat replies are canned because no chat credential is set
    pub fn chat_is_demo(&self) -> bool {
        self.credentials.chat_key().is_none()
    }

    /// Text-to-image; yields the first image reference in the response
    pub async fn generate_image(
        &self,
        prompt: &str,
        progress: &dyn AttemptObserver,
    ) -> Completion<ImageReference> {
        let api_key = match self.credentials.require_api_key() {
            Ok(key) => key,
            Err(err) => return Completion::rejected(err),
        };

        let body = ImageGenerationRequest {
            model: self.config.models.image.clone(),
            prompt: prompt.to_string(),
            n: self.config.generation.n,
            size: self.config.generation.size.clone(),
        };
        let request = match json_request(&self.config.endpoints.image_url, &body) {
            Ok(request) => request.with_bearer(api_key),
            Err(err) => return Completion::rejected(err),
        };

        tracing::debug!("Generating image with {}", self.config.models.image);
        self.executor
            .execute_with(&request, progress, |raw| {
                let parsed: ImageGenerationResponse = serde_json::from_str(raw)
                    .map_err(|e| format!("Invalid image response: {}", e))?;
                parsed
                    .first_image()
                    .ok_or_else(|| "No image URL returned.".to_string())
            })
            .await
    }

    /// Ask the vision model to describe `image`
    pub async fn describe_image(
        &self,
        image: &ImageReference,
        progress: &dyn AttemptObserver,
    ) -> Completion<String> {
        let api_key = match self.credentials.require_api_key() {
            Ok(key) => key,
            Err(err) => return Completion::rejected(err),
        };

        let body = VisionRequest::describe(
            self.config.models.vision.clone(),
            self.config.generation.describe_prompt.clone(),
            image,
        );
        let request = match json_request(&self.config.endpoints.chat_url, &body) {
            Ok(request) => request.with_bearer(api_key),
            Err(err) => return Completion::rejected(err),
        };

        tracing::debug!("Describing {} with {}", image, self.config.models.vision);
        self.executor
            .execute_with(&request, progress, extract_completion_text)
            .await
    }

    /// Send the full transcript and return the assistant's reply
    ///
    /// Without any chat credential this answers with a labelled demo reply
    /// after a short delay instead of failing.
    pub async fn chat(
        &self,
        transcript: &[ChatMessage],
        progress: &dyn AttemptObserver,
    ) -> Completion<String> {
        let Some(api_key) = self.credentials.chat_key() else {
            tracing::info!("No chat credential configured, replying in demo mode");
            tokio::time::sleep(Duration::from_millis(self.config.chat.demo_delay_ms)).await;
            return Completion {
                outcome: super::Outcome::Success(demo_reply()),
                attempts: 0,
            };
        };

        let body = ChatCompletionRequest {
            model: &self.config.models.chat,
            messages: transcript,
            temperature: Some(self.config.chat.temperature),
        };
        let request = match json_request(&self.config.endpoints.chat_url, &body) {
            Ok(request) => request.with_bearer(api_key),
            Err(err) => return Completion::rejected(err),
        };

        tracing::debug!(
            "Sending chat with {} messages to {}",
            transcript.len(),
            self.config.models.chat
        );
        self.executor
            .execute_with(&request, progress, extract_completion_text)
            .await
    }
}

pub fn demo_reply() -> String {
    format!(
        "{} Set {} or {} to enable real replies.",
        DEMO_REPLY_PREFIX, CHAT_API_KEY_ENV, API_KEY_ENV
    )
}

fn json_request<T: Serialize>(url: &str, body: &T) -> Result<RequestSpec, InferenceError> {
    let value = serde_json::to_value(body)
        .map_err(|e| InferenceError::InvalidInput(format!("Unserializable request: {}", e)))?;
    Ok(RequestSpec::post_json(url, value))
}

fn extract_completion_text(raw: &str) -> Result<String, String> {
    let parsed: ChatCompletionResponse =
        serde_json::from_str(raw).map_err(|e| format!("Invalid completion response: {}", e))?;
    parsed
        .first_content()
        .map(str::to_string)
        .ok_or_else(|| "No completion text returned.".to_string())
}
