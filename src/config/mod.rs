//! Configuration management for prism
//!
//! Tunables (endpoints, models, retry limits) come from `config.toml`;
//! credentials come only from the environment and are read once at startup.

use crate::inference::{BackoffPolicy, InferenceError};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable holding the required inference API key
pub const API_KEY_ENV: &str = "TOGETHER_API_KEY";
/// Optional chat-only key; chat falls back to [`API_KEY_ENV`], then to demo replies
pub const CHAT_API_KEY_ENV: &str = "TOGETHER_CHAT_API_KEY";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub endpoints: EndpointsConfig,
    pub models: ModelsConfig,
    pub generation: GenerationConfig,
    pub chat: ChatConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EndpointsConfig {
    pub image_url: String,
    /// Serves both chat and vision requests
    pub chat_url: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            image_url: "https://api.together.xyz/v1/images/generations".to_string(),
            chat_url: "https://api.together.xyz/v1/chat/completions".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelsConfig {
    pub image: String,
    pub vision: String,
    pub chat: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            image: "black-forest-labs/FLUX.1-schnell-Free".to_string(),
            vision: "meta-llama/Llama-Vision-Free".to_string(),
            chat: "meta-llama/Llama-3.3-70B-Instruct-Turbo-Free".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    /// Images requested per prompt
    pub n: u32,
    pub size: String,
    /// Instruction sent alongside every image to the vision model
    pub describe_prompt: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            n: 1,
            size: "1024x1024".to_string(),
            describe_prompt: "Describe the image in detail.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChatConfig {
    pub temperature: f32,
    /// Assistant message a new session opens with; empty for none
    pub greeting: String,
    /// Simulated latency of the offline demo reply
    pub demo_delay_ms: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            greeting: "Kia ora! Ask me anything ✨".to_string(),
            demo_delay_ms: 400,
        }
    }
}

/// Backoff for HTTP 429 responses
///
/// The wait before retry `n` (counting from 1) is `base_delay_ms * 2^n`,
/// so with the defaults the first retry waits 2s, then 4s, then 8s.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    /// Total requests sent, the first one included
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_attempts: 4,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.base_delay_ms, self.max_attempts)
    }
}

impl Config {
    /// Load configuration from default location or create default
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Config::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "prism") {
            let config_dir = proj_dirs.config_dir();
            std::fs::create_dir_all(config_dir)?;
            Ok(config_dir.join("config.toml"))
        } else {
            Ok(PathBuf::from("config.toml"))
        }
    }
}

/// Process-wide, read-only API credentials
#[derive(Clone, Default)]
pub struct Credentials {
    api_key: Option<String>,
    chat_api_key: Option<String>,
}

impl Credentials {
    pub fn new(api_key: Option<String>, chat_api_key: Option<String>) -> Self {
        let non_blank = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        Self {
            api_key: non_blank(api_key),
            chat_api_key: non_blank(chat_api_key),
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            std::env::var(API_KEY_ENV).ok(),
            std::env::var(CHAT_API_KEY_ENV).ok(),
        )
    }

    /// Key for image generation and description
    pub fn require_api_key(&self) -> Result<&str, InferenceError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| InferenceError::MissingCredential(API_KEY_ENV.to_string()))
    }

    /// Key for chat; `None` means chat runs in demo mode
    pub fn chat_key(&self) -> Option<&str> {
        self.chat_api_key.as_deref().or(self.api_key.as_deref())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key.as_ref().map(|_| "<set>"))
            .field("chat_api_key", &self.chat_api_key.as_ref().map(|_| "<set>"))
            .finish()
    }
}
