//! chatlink - terminal chat client
//!
//! Reads user messages from stdin, one per line, and prints routed events.

use chatlink::{
    ActionBridge, ChatClient, ClientConfig, EmbeddedView, EventKind, Identity, OutboundMessage,
    Transcript,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Prints embedded-view instructions instead of rendering them
struct TerminalView;

impl EmbeddedView for TerminalView {
    fn open(&self, url: &str) {
        println!("[open] {url}");
    }

    fn close(&self) {
        println!("[close]");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatlink=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration, fetched once before the first connection attempt
    let config = match std::env::var("CHATLINK_CONFIG_URL") {
        Ok(url) => ClientConfig::fetch(&url).await?,
        Err(_) => match std::env::var("CHATLINK_CONFIG") {
            Ok(path) => ClientConfig::load(path)?,
            Err(_) => ClientConfig::from_env()?,
        },
    };

    let identity = std::env::var("CHATLINK_IDENTITY")
        .map(Identity::new)
        .unwrap_or_else(|_| Identity::generate());
    let conversation =
        std::env::var("CHATLINK_CONVERSATION").unwrap_or_else(|_| identity.to_string());

    tracing::info!(identity = %identity, conversation = %conversation, "Starting chat client");

    let client = ChatClient::new(&config)?;

    let transcript = Transcript::deduplicating();
    let printer = transcript.clone();
    client
        .subscribe(move |event| {
            if !printer.record_event(event) {
                return;
            }
            match &event.kind {
                EventKind::Assistant { text } => println!("< {text}"),
                EventKind::System { text: Some(text) } => println!("* {text}"),
                EventKind::Error { message } => println!("! {message}"),
                EventKind::System { text: None } | EventKind::Action(_) => {}
            }
        })
        .detach();
    let _bridge = ActionBridge::attach(client.router(), Arc::new(TerminalView));

    client.ensure_connected(&identity);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        transcript.record_user(text, Some(&conversation));
        if let Err(e) = client
            .send_message(&OutboundMessage::text(text), &identity, &conversation)
            .await
        {
            // The push channel may still deliver a reply
            tracing::warn!(error = %e, "Send failed");
        }
    }

    client.disconnect();
    tracing::info!(messages = transcript.len(), "Session ended");
    Ok(())
}
