//! Frame codec
//!
//! Turns raw push frames into [`InboundEvent`]s and user messages into the
//! outbound wire payload. Inbound frames may arrive double-encoded: the outer
//! JSON object carries an envelope field whose value is itself a JSON string.

use crate::error::DecodeFailure;
use crate::protocol::{
    lenient_id, Action, ApiReply, EventKind, InboundEvent, OutboundMessage, WireAttachment,
    WireMessage, WirePayload,
};
use serde::Deserialize;
use serde_json::Value;

#[cfg(test)]
mod proptests;

/// Envelope fields that may wrap the actual event object
const ENVELOPE_FIELDS: &[&str] = &["event", "message", "data"];

/// Upper bound on nested envelopes / re-encoded strings
const MAX_ENVELOPE_DEPTH: usize = 4;

/// Connection-confirmation banners the backend sends on every (re)connect
const CONNECTION_BANNERS: &[&str] = &[
    "connected",
    "connected to server",
    "connection established",
    "websocket connected",
    "websocket connection established",
];

/// Event object schema
#[derive(Debug, Default, Deserialize)]
struct WireEvent {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default, alias = "content")]
    text: Option<String>,
    #[serde(default)]
    conversation_id: Option<Value>,
    #[serde(default, deserialize_with = "lenient_id")]
    pk: Option<i64>,
    #[serde(default)]
    event: Option<WireAction>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireAction {
    #[serde(rename = "type", default)]
    #[allow(dead_code)] // Part of the schema, not used for classification
    kind: Option<String>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

/// Decode one raw frame.
///
/// Returns `Ok(None)` for frames that are valid but carry nothing worth
/// routing (connection banners).
pub fn decode(frame: &str) -> Result<Option<InboundEvent>, DecodeFailure> {
    let value: Value = serde_json::from_str(frame)
        .map_err(|e| DecodeFailure::new(format!("frame is not JSON: {e}")))?;
    decode_value(value)
}

/// Decode an already-parsed frame
pub fn decode_value(value: Value) -> Result<Option<InboundEvent>, DecodeFailure> {
    let object = unwrap_envelope(value, 0)?;
    let wire: WireEvent = serde_json::from_value(object.clone())
        .map_err(|e| DecodeFailure::new(format!("event does not match schema: {e}")))?;
    Ok(classify(wire, object))
}

/// Peel envelopes until the event object (the one carrying `type`) is reached
fn unwrap_envelope(value: Value, depth: usize) -> Result<Value, DecodeFailure> {
    if depth > MAX_ENVELOPE_DEPTH {
        return Err(DecodeFailure::new("envelope nested too deeply"));
    }

    match value {
        Value::String(inner) => {
            let parsed: Value = serde_json::from_str(&inner)
                .map_err(|e| DecodeFailure::new(format!("nested payload is not JSON: {e}")))?;
            unwrap_envelope(parsed, depth + 1)
        }
        Value::Object(map) => {
            if map.contains_key("type") {
                // A typed transport envelope may still carry the event as a
                // JSON string; object-valued fields belong to the event itself
                let nested = ENVELOPE_FIELDS.iter().find_map(|f| match map.get(*f) {
                    Some(Value::String(inner)) => serde_json::from_str::<Value>(inner)
                        .ok()
                        .filter(Value::is_object),
                    _ => None,
                });
                return match nested {
                    Some(inner) => unwrap_envelope(inner, depth + 1),
                    None => Ok(Value::Object(map)),
                };
            }
            let mut wrapped = ENVELOPE_FIELDS.iter().filter_map(|f| map.get(*f));
            match (wrapped.next(), wrapped.next()) {
                (Some(inner @ (Value::String(_) | Value::Object(_))), None) => {
                    unwrap_envelope(inner.clone(), depth + 1)
                }
                // A bare untyped object is still an event (e.g. an echoed payload)
                (None, None) => Ok(Value::Object(map)),
                _ => Err(DecodeFailure::new("unrecognized envelope")),
            }
        }
        other => Err(DecodeFailure::new(format!(
            "expected an object, got {}",
            json_type_name(&other)
        ))),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Single-pass classifier. Precedence: action, error, assistant, system.
fn classify(wire: WireEvent, raw: Value) -> Option<InboundEvent> {
    let conversation_ref = wire.conversation_id.as_ref().and_then(conversation_ref);
    let kind_name = wire.kind.as_deref();

    let kind = if let Some(action) = kind_name
        .filter(|k| *k == "event")
        .and(wire.event.as_ref())
        .and_then(action_of)
    {
        EventKind::Action(action)
    } else if kind_name == Some("error") {
        EventKind::Error {
            message: wire
                .error
                .or(wire.text)
                .unwrap_or_else(|| "unknown error".to_string()),
        }
    } else {
        match wire.text {
            Some(text) if kind_name == Some("assistant") && !text.is_empty() => {
                EventKind::Assistant { text }
            }
            text => {
                if text.as_deref().is_some_and(is_connection_banner) {
                    tracing::debug!(text = ?text, "Dropping connection banner");
                    return None;
                }
                EventKind::System { text }
            }
        }
    };

    Some(InboundEvent {
        kind,
        conversation_ref,
        pk: wire.pk,
        raw,
    })
}

fn action_of(event: &WireAction) -> Option<Action> {
    match event.action.as_deref()? {
        "open_url" => event
            .url
            .as_ref()
            .filter(|u| !u.is_empty())
            .map(|url| Action::OpenUrl { url: url.clone() }),
        "close_url" => Some(Action::CloseUrl),
        _ => None,
    }
}

fn conversation_ref(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn is_connection_banner(text: &str) -> bool {
    let normalized = text.trim().trim_end_matches(['.', '!']).to_ascii_lowercase();
    CONNECTION_BANNERS.contains(&normalized.as_str())
}

/// Turn a synchronous-call reply into an event, using the same classifier
/// as the push path so both channels produce identical shapes.
pub fn reply_event(reply: &ApiReply, fallback_ref: &str) -> Option<InboundEvent> {
    let raw = serde_json::to_value(reply).unwrap_or(Value::Null);
    let conversation_ref = reply.conversation_ref().unwrap_or(fallback_ref).to_string();
    let wire = WireEvent {
        kind: reply.kind.clone(),
        text: reply.text.clone(),
        conversation_id: Some(Value::String(conversation_ref)),
        pk: reply.id,
        ..Default::default()
    };
    classify(wire, raw)
}

/// Reduce a user message to the wire payload
pub fn to_payload(message: &OutboundMessage) -> WirePayload {
    WirePayload {
        message: WireMessage {
            content: message.text.clone(),
            attachments: message
                .attachments
                .iter()
                .map(|a| WireAttachment {
                    kind: a.kind.clone(),
                    name: a.name.clone(),
                    base64_content: a.base64_content().to_string(),
                })
                .collect(),
        },
    }
}

/// Serialize a user message for both the push channel and the call body
pub fn encode(message: &OutboundMessage) -> String {
    // Plain string fields only, serialization cannot fail
    serde_json::to_string(&to_payload(message)).unwrap_or_default()
}
