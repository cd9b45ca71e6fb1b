//! Error types for the conversation transport

use thiserror::Error;

/// A frame that could not be turned into an event.
///
/// Produced by the codec when the outer frame, or the JSON string nested
/// inside an envelope, fails to parse or does not match the event schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct DecodeFailure {
    pub reason: String,
}

impl DecodeFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Errors surfaced by the transport client
#[derive(Debug, Error)]
pub enum ChatError {
    /// The push channel reported a failure. Never fatal on its own.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Failed to decode frame: {0}")]
    Decode(#[from] DecodeFailure),

    /// The synchronous call returned a non-success status (`Some`) or the
    /// network call itself rejected (`None`).
    #[error("Request failed{}: {message}", status_suffix(.status))]
    RequestFailed {
        status: Option<u16>,
        message: String,
    },

    /// A waiting caller's cancellation signal fired before any reply.
    #[error("Wait cancelled before a reply arrived")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" with status {s}")).unwrap_or_default()
}

impl ChatError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn request_failed(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::RequestFailed {
            status,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// HTTP status of a failed synchronous call, if there was one
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RequestFailed { status, .. } => *status,
            _ => None,
        }
    }

    /// Whether retrying the same operation later may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::RequestFailed { status: None, .. } => true,
            Self::RequestFailed {
                status: Some(status),
                ..
            } => *status == 429 || (500..=599).contains(status),
            Self::Decode(_) | Self::Cancelled | Self::Config(_) => false,
        }
    }
}
