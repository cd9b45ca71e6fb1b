//! Property-based tests for the frame codec

use super::*;
use crate::protocol::Attachment;
use proptest::prelude::*;
use serde_json::json;

fn arb_attachment() -> impl Strategy<Value = Attachment> {
    (
        prop_oneof![Just("image"), Just("file"), Just("text")],
        "[a-z]{1,8}\\.[a-z]{3}",
        "[A-Za-z0-9+/]{0,24}",
    )
        .prop_map(|(kind, name, data)| match kind {
            "image" => Attachment::image(name, data),
            "file" => Attachment::file(name, data),
            _ => Attachment::text(name, data),
        })
}

fn arb_outbound() -> impl Strategy<Value = OutboundMessage> {
    ("[a-zA-Z0-9 ?]{1,40}", prop::collection::vec(arb_attachment(), 0..3)).prop_map(
        |(text, attachments)| OutboundMessage { text, attachments },
    )
}

proptest! {
    #[test]
    fn decode_never_panics(frame in ".{0,200}") {
        let _ = decode(&frame);
    }

    #[test]
    fn decode_never_panics_on_nested_strings(inner in ".{0,100}") {
        let frame = json!({ "event": inner }).to_string();
        let _ = decode(&frame);
    }

    /// An echo transport hands the encoded payload straight back
    #[test]
    fn echoed_encode_preserves_content(message in arb_outbound()) {
        prop_assume!(!is_connection_banner(&message.text));
        let event = decode(&encode(&message)).unwrap().unwrap();
        prop_assert_eq!(event.text(), Some(message.text.as_str()));
    }

    #[test]
    fn double_encoded_assistant_classified(text in "[a-zA-Z0-9 ]{1,40}") {
        let inner = json!({ "type": "assistant", "text": text }).to_string();
        let frame = json!({ "event": inner }).to_string();
        let event = decode(&frame).unwrap().unwrap();
        prop_assert_eq!(event.kind, EventKind::Assistant { text });
    }

    #[test]
    fn attachment_count_and_order_preserved(message in arb_outbound()) {
        let payload = to_payload(&message);
        prop_assert_eq!(payload.message.attachments.len(), message.attachments.len());
        for (wire, original) in payload.message.attachments.iter().zip(&message.attachments) {
            prop_assert_eq!(&wire.name, &original.name);
            prop_assert_eq!(wire.base64_content.as_str(), original.base64_content());
        }
    }
}
