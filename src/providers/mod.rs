use crate::core::error::EspejoError;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

pub mod base_client;
pub mod classifier;
pub mod gemini;

pub use classifier::{AttemptOutcome, ResponseClassifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[serde(alias = "assistant")]
    Model,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

/// Base64-transported binary attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    #[serde(alias = "mime_type")]
    pub mime_type: String,
    pub data: String,
}

impl InlineData {
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self::new(mime_type, STANDARD.encode(bytes))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
    },
    InlineImage {
        #[serde(rename = "inlineData", alias = "inline_data")]
        inline_data: InlineData,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    pub fn image(inline_data: InlineData) -> Self {
        Part::InlineImage { inline_data }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { text } => Some(text),
            Part::InlineImage { .. } => None,
        }
    }
}

/// One dialogue turn. Always carries at least one part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawMessage")]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
}

#[derive(Deserialize)]
struct RawMessage {
    role: Role,
    #[serde(alias = "content")]
    parts: Vec<Part>,
}

impl TryFrom<RawMessage> for Message {
    type Error = EspejoError;

    fn try_from(raw: RawMessage) -> Result<Self, Self::Error> {
        Message::new(raw.role, raw.parts)
    }
}

impl Message {
    pub fn new(role: Role, parts: Vec<Part>) -> Result<Self, EspejoError> {
        if parts.is_empty() {
            return Err(EspejoError::Input(
                "A message needs at least one part".to_string(),
            ));
        }
        Ok(Self { role, parts })
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::text(text)],
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            parts: vec![Part::text(text)],
        }
    }

    /// All text parts joined with newlines.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn has_image(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, Part::InlineImage { .. }))
    }
}

/// Where a single attempt is sent.
#[derive(Debug, Clone, Copy)]
pub struct Route<'a> {
    pub model: &'a str,
    pub api_key: &'a str,
    pub api_version: &'a str,
}

/// Raw provider reply, classified by the dispatcher.
#[derive(Debug, Clone)]
pub struct RouteResponse {
    pub status: u16,
    pub body: String,
}

/// One network round trip to the generative API.
#[async_trait]
pub trait RouteTransport: Send + Sync {
    async fn send(
        &self,
        route: &Route<'_>,
        request: &gemini::GenerateContentRequest,
    ) -> Result<RouteResponse, EspejoError>;
}
