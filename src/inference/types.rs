//! Wire types for the image, vision and chat endpoints

use serde::{Deserialize, Serialize};

/// Media type assumed for inline payloads that do not say otherwise
pub const DEFAULT_INLINE_MEDIA_TYPE: &str = "image/jpeg";

/// Role in a conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One transcript entry, sent verbatim as conversation context
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// An image the service can look at: either hosted remotely or carried inline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageReference {
    /// Remote URL, e.g. what the generation endpoint hands back
    Url(String),
    /// Base64-encoded bytes supplied by the caller
    Inline { data: String, media_type: String },
}

impl ImageReference {
    pub fn url(url: impl Into<String>) -> Self {
        ImageReference::Url(url.into())
    }

    /// Inline payload with the default media type
    pub fn inline(base64_data: impl Into<String>) -> Self {
        ImageReference::Inline {
            data: base64_data.into(),
            media_type: DEFAULT_INLINE_MEDIA_TYPE.to_string(),
        }
    }

    pub fn with_media_type(self, media_type: impl Into<String>) -> Self {
        match self {
            ImageReference::Inline { data, .. } => ImageReference::Inline {
                data,
                media_type: media_type.into(),
            },
            other => other,
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, ImageReference::Inline { .. })
    }

    /// Parse a `data:<media>;base64,<payload>` URL into an inline reference
    pub fn from_data_url(data_url: &str) -> Option<Self> {
        let rest = data_url.strip_prefix("data:")?;
        let (header, payload) = rest.split_once(',')?;
        let media_type = header.strip_suffix(";base64")?;
        if payload.is_empty() {
            return None;
        }
        let media_type = if media_type.is_empty() {
            DEFAULT_INLINE_MEDIA_TYPE
        } else {
            media_type
        };
        Some(ImageReference::Inline {
            data: payload.to_string(),
            media_type: media_type.to_string(),
        })
    }

    /// The value placed in an `image_url.url` field
    pub fn as_request_url(&self) -> String {
        match self {
            ImageReference::Url(url) => url.clone(),
            ImageReference::Inline { data, media_type } => {
                format!("data:{};base64,{}", media_type, data)
            }
        }
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageReference::Url(url) => write!(f, "{}", url),
            ImageReference::Inline { data, media_type } => {
                write!(f, "<inline {} image, {} base64 chars>", media_type, data.len())
            }
        }
    }
}

// ============================================================================
// Image generation
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ImageGenerationRequest {
    pub model: String,
    pub prompt: String,
    pub n: u32,
    pub size: String,
}

#[derive(Debug, Deserialize)]
pub struct ImageGenerationResponse {
    #[serde(default)]
    pub data: Vec<GeneratedImageData>,
}

#[derive(Debug, Deserialize)]
pub struct GeneratedImageData {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub b64_json: Option<String>,
}

impl ImageGenerationResponse {
    /// First usable image in the response, preferring a hosted URL
    pub fn first_image(&self) -> Option<ImageReference> {
        let first = self.data.first()?;
        match (&first.url, &first.b64_json) {
            (Some(url), _) if !url.is_empty() => Some(ImageReference::url(url.clone())),
            (_, Some(b64)) if !b64.is_empty() => {
                Some(ImageReference::inline(b64.clone()).with_media_type("image/png"))
            }
            _ => None,
        }
    }
}

// ============================================================================
// Vision description
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct VisionRequest {
    pub model: String,
    pub messages: Vec<VisionMessage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VisionMessage {
    pub role: Role,
    pub content: Vec<VisionContentPart>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum VisionContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

impl VisionRequest {
    /// Single user turn asking the model to describe `image`
    pub fn describe(
        model: impl Into<String>,
        prompt: impl Into<String>,
        image: &ImageReference,
    ) -> Self {
        Self {
            model: model.into(),
            messages: vec![VisionMessage {
                role: Role::User,
                content: vec![
                    VisionContentPart::Text {
                        text: prompt.into(),
                    },
                    VisionContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: image.as_request_url(),
                        },
                    },
                ],
            }],
        }
    }
}

// ============================================================================
// Chat completions (shared by chat and vision responses)
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatCompletionResponse {
    pub fn first_content(&self) -> Option<&str> {
        self.choices.first()?.message.content.as_deref()
    }
}
