//! Wire and domain types shared by the codec, router and coordinator

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

// ============================================================================
// Identity
// ============================================================================

/// Key scoping one push connection (one per user or widget instance)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Mint a fresh identity for an anonymous widget instance
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Identity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ============================================================================
// Outbound
// ============================================================================

/// A user message with its ordered attachments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundMessage {
    pub text: String,
    pub attachments: Vec<Attachment>,
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

/// An attachment as held by the caller. The payload lives in one of three
/// content slots depending on where it came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attachment {
    pub kind: String,
    pub name: String,
    pub image_content: Option<String>,
    pub file_content: Option<String>,
    pub text_content: Option<String>,
}

impl Attachment {
    pub fn image(name: impl Into<String>, base64: impl Into<String>) -> Self {
        Self {
            kind: "image".to_string(),
            name: name.into(),
            image_content: Some(base64.into()),
            ..Default::default()
        }
    }

    pub fn file(name: impl Into<String>, base64: impl Into<String>) -> Self {
        Self {
            kind: "file".to_string(),
            name: name.into(),
            file_content: Some(base64.into()),
            ..Default::default()
        }
    }

    pub fn text(name: impl Into<String>, base64: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            name: name.into(),
            text_content: Some(base64.into()),
            ..Default::default()
        }
    }

    /// Build a file attachment from raw bytes
    pub fn from_bytes(kind: impl Into<String>, name: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            file_content: Some(STANDARD.encode(bytes)),
            ..Default::default()
        }
    }

    /// Base64 payload: first populated slot of image, file, text; empty otherwise
    pub fn base64_content(&self) -> &str {
        [&self.image_content, &self.file_content, &self.text_content]
            .into_iter()
            .flatten()
            .find(|content| !content.is_empty())
            .map_or("", String::as_str)
    }
}

/// `{"message": {"content": .., "attachments": [..]}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WirePayload {
    pub message: WireMessage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub content: String,
    pub attachments: Vec<WireAttachment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireAttachment {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub base64_content: String,
}

/// Message identifiers arrive as numbers or numeric strings. Anything else
/// reads as absent so one odd field never drops the whole message.
pub(crate) fn lenient_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

// ============================================================================
// Synchronous call response
// ============================================================================

/// One element of the synchronous call's response array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiReply {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<i64>,
    #[serde(default)]
    pub conversation: Option<ApiConversation>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub cost: Value,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConversation {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub slots: Map<String, Value>,
}

impl ApiReply {
    pub fn conversation_ref(&self) -> Option<&str> {
        self.conversation
            .as_ref()
            .and_then(|c| c.conversation_id.as_deref())
    }
}

// ============================================================================
// Inbound
// ============================================================================

/// Out-of-band instruction for the embedded-view controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    OpenUrl { url: String },
    CloseUrl,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::OpenUrl { .. } => "open_url",
            Action::CloseUrl => "close_url",
        }
    }
}

/// Classification of an inbound event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Assistant { text: String },
    System { text: Option<String> },
    Action(Action),
    Error { message: String },
}

/// Normalized inbound event, immutable once produced by the codec
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub kind: EventKind,
    pub conversation_ref: Option<String>,
    /// Monotonically non-decreasing message identifier, when the backend sends one
    pub pk: Option<i64>,
    pub raw: Value,
}

impl InboundEvent {
    /// Conversational text carried by the event, if any
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            EventKind::Assistant { text } => Some(text),
            EventKind::System { text } => text.as_deref(),
            EventKind::Error { message } => Some(message),
            EventKind::Action(_) => None,
        }
    }

    pub fn has_text(&self) -> bool {
        self.text().is_some_and(|t| !t.is_empty())
    }

    pub fn action(&self) -> Option<&Action> {
        match &self.kind {
            EventKind::Action(action) => Some(action),
            _ => None,
        }
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self.kind, EventKind::Assistant { .. })
    }
}
