//! Conversation transcript
//!
//! Reconciles user messages, assistant replies and system notices into one
//! ordered stream for display. Because a single turn may arrive over both
//! channels, a transcript can optionally drop repeated assistant replies,
//! keyed by conversation and message identifier.

use crate::protocol::{EventKind, InboundEvent};
use crate::router::{EventRouter, Subscription};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub role: Role,
    pub text: String,
    #[serde(default)]
    pub conversation_ref: Option<String>,
    #[serde(default)]
    pub pk: Option<i64>,
    pub received_at: DateTime<Utc>,
}

impl Entry {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            conversation_ref: None,
            pk: None,
            received_at: Utc::now(),
        }
    }
}

#[derive(Default)]
struct State {
    entries: Vec<Entry>,
    dedup: bool,
    /// Last assistant (pk, text) seen per conversation
    last_seen: HashMap<String, (i64, String)>,
}

impl State {
    fn is_duplicate(&self, entry: &Entry) -> bool {
        if !self.dedup || entry.role != Role::Assistant {
            return false;
        }
        let (Some(conversation), Some(pk)) = (&entry.conversation_ref, entry.pk) else {
            return false;
        };
        match self.last_seen.get(conversation) {
            Some((last_pk, last_text)) => {
                pk < *last_pk || (pk == *last_pk && entry.text == *last_text)
            }
            None => false,
        }
    }

    fn push(&mut self, entry: Entry) -> bool {
        if self.is_duplicate(&entry) {
            tracing::debug!(
                conversation = ?entry.conversation_ref,
                pk = ?entry.pk,
                "Dropping repeated reply"
            );
            return false;
        }
        if entry.role == Role::Assistant {
            if let (Some(conversation), Some(pk)) = (&entry.conversation_ref, entry.pk) {
                self.last_seen
                    .insert(conversation.clone(), (pk, entry.text.clone()));
            }
        }
        self.entries.push(entry);
        true
    }
}

/// Ordered message stream. Cheap to clone; clones share entries.
#[derive(Clone, Default)]
pub struct Transcript {
    state: Arc<Mutex<State>>,
}

impl Transcript {
    /// Transcript keeping every reply, duplicates included
    pub fn new() -> Self {
        Self::default()
    }

    /// Transcript dropping assistant replies already seen for a conversation
    pub fn deduplicating() -> Self {
        let transcript = Self::default();
        transcript.state.lock().dedup = true;
        transcript
    }

    /// Record routed events from `router` until the subscription ends
    pub fn attach(&self, router: &EventRouter) -> Subscription {
        let transcript = self.clone();
        router.subscribe(move |event| {
            transcript.record_event(event);
        })
    }

    pub fn record_user(&self, text: impl Into<String>, conversation_ref: Option<&str>) {
        let mut entry = Entry::new(Role::User, text);
        entry.conversation_ref = conversation_ref.map(str::to_string);
        self.state.lock().push(entry);
    }

    /// Append an event's text. Returns false when nothing was added (no
    /// text, an action, or a repeated reply).
    pub fn record_event(&self, event: &InboundEvent) -> bool {
        let (role, text) = match &event.kind {
            EventKind::Assistant { text } => (Role::Assistant, text.clone()),
            EventKind::System { text: Some(text) } if !text.is_empty() => {
                (Role::System, text.clone())
            }
            EventKind::Error { message } => (Role::Error, message.clone()),
            EventKind::System { .. } | EventKind::Action(_) => return false,
        };

        let entry = Entry {
            role,
            text,
            conversation_ref: event.conversation_ref.clone(),
            pk: event.pk,
            received_at: Utc::now(),
        };
        self.state.lock().push(entry)
    }

    /// Seed with prior history, in order, before live events arrive
    pub fn replay(&self, history: impl IntoIterator<Item = Entry>) {
        let mut state = self.state.lock();
        for entry in history {
            state.push(entry);
        }
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.state.lock().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn assistant(text: &str, conversation: &str, pk: i64) -> InboundEvent {
        InboundEvent {
            kind: EventKind::Assistant {
                text: text.to_string(),
            },
            conversation_ref: Some(conversation.to_string()),
            pk: Some(pk),
            raw: Value::Null,
        }
    }

    #[test]
    fn test_records_in_order() {
        let transcript = Transcript::new();
        transcript.record_user("hello", Some("c1"));
        transcript.record_event(&assistant("hi there", "c1", 1));

        let entries = transcript.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].role, Role::User);
        assert_eq!(entries[1].role, Role::Assistant);
        assert_eq!(entries[1].text, "hi there");
    }

    #[test]
    fn test_keeps_duplicates_by_default() {
        let transcript = Transcript::new();
        transcript.record_event(&assistant("hi there", "c1", 1));
        transcript.record_event(&assistant("hi there", "c1", 1));
        assert_eq!(transcript.len(), 2);
    }

    #[test]
    fn test_dedup_drops_same_turn_from_second_channel() {
        let transcript = Transcript::deduplicating();
        assert!(transcript.record_event(&assistant("hi there", "c1", 1)));
        assert!(!transcript.record_event(&assistant("hi there", "c1", 1)));
        assert!(transcript.record_event(&assistant("next", "c1", 2)));
        assert!(!transcript.record_event(&assistant("stale", "c1", 1)));
        assert_eq!(transcript.len(), 2);
    }

    #[test]
    fn test_dedup_allows_distinct_text_with_same_pk() {
        let transcript = Transcript::deduplicating();
        transcript.record_event(&assistant("part one", "c1", 3));
        transcript.record_event(&assistant("part two", "c1", 3));
        assert_eq!(transcript.len(), 2);
    }

    #[test]
    fn test_dedup_is_per_conversation() {
        let transcript = Transcript::deduplicating();
        transcript.record_event(&assistant("hi", "c1", 5));
        transcript.record_event(&assistant("hi", "c2", 1));
        assert_eq!(transcript.len(), 2);
    }

    #[test]
    fn test_dedup_without_pk_keeps_everything() {
        let transcript = Transcript::deduplicating();
        let mut event = assistant("hi", "c1", 1);
        event.pk = None;
        transcript.record_event(&event);
        transcript.record_event(&event);
        assert_eq!(transcript.len(), 2);
    }

    #[test]
    fn test_actions_and_empty_system_not_recorded() {
        let transcript = Transcript::new();
        let action = InboundEvent {
            kind: EventKind::Action(crate::protocol::Action::CloseUrl),
            conversation_ref: None,
            pk: None,
            raw: Value::Null,
        };
        let empty = InboundEvent {
            kind: EventKind::System { text: None },
            ..action.clone()
        };
        assert!(!transcript.record_event(&action));
        assert!(!transcript.record_event(&empty));
        assert!(transcript.is_empty());
    }

    #[test]
    fn test_replay_seeds_dedup_state() {
        let transcript = Transcript::deduplicating();
        let mut prior = Entry::new(Role::Assistant, "earlier");
        prior.conversation_ref = Some("c1".to_string());
        prior.pk = Some(7);
        transcript.replay(vec![Entry::new(Role::User, "question"), prior]);

        assert!(!transcript.record_event(&assistant("earlier", "c1", 7)));
        assert!(transcript.record_event(&assistant("later", "c1", 8)));
        assert_eq!(transcript.len(), 3);
    }

    #[test]
    fn test_history_json_roundtrip() {
        let json = r#"[{"role":"user","text":"hi","received_at":"2024-05-01T10:00:00Z"},
                       {"role":"assistant","text":"hello","conversation_ref":"c1","pk":1,
                        "received_at":"2024-05-01T10:00:01Z"}]"#;
        let history: Vec<Entry> = serde_json::from_str(json).unwrap();
        let transcript = Transcript::new();
        transcript.replay(history);
        assert_eq!(transcript.entries()[1].pk, Some(1));
    }

    #[test]
    fn test_attach_records_routed_events() {
        let router = EventRouter::new();
        let transcript = Transcript::deduplicating();
        let subscription = transcript.attach(&router);

        router.dispatch(&assistant("hi there", "c1", 1));
        router.dispatch(&assistant("hi there", "c1", 1));
        subscription.unsubscribe();
        router.dispatch(&assistant("after", "c1", 2));

        assert_eq!(transcript.len(), 1);
    }
}
