//! Mock implementations for testing
//!
//! These mocks enable testing the connection manager and coordinator
//! without sockets or an HTTP server.

use crate::connection::{Connector, PushLink, TransportEvent};
use crate::delivery::Backend;
use crate::error::ChatError;
use crate::protocol::ApiReply;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

const WAIT_LIMIT: Duration = Duration::from_secs(5);

// ============================================================================
// Mock Connector
// ============================================================================

/// Server side of one scripted push session
pub struct MockSession {
    pub url: String,
    inbound: mpsc::UnboundedSender<TransportEvent>,
    /// `None` in echo mode, where a task owns the receiver
    outbound: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl MockSession {
    pub fn push_frame(&self, frame: impl Into<String>) {
        let _ = self.inbound.send(TransportEvent::Frame(frame.into()));
    }

    pub fn push_error(&self, message: impl Into<String>) {
        let _ = self.inbound.send(TransportEvent::Error(message.into()));
    }

    /// Simulate the peer closing the session
    pub fn close(&self) {
        let _ = self.inbound.send(TransportEvent::Closed);
    }

    /// Next payload the client sent over this session
    pub async fn next_sent(&self) -> Option<String> {
        let mut outbound = self.outbound.lock().await;
        let rx = outbound.as_mut()?;
        tokio::time::timeout(WAIT_LIMIT, rx.recv()).await.ok().flatten()
    }

    /// True once the client has released its sending half
    pub async fn outbound_closed(&self) -> bool {
        let mut outbound = self.outbound.lock().await;
        let Some(rx) = outbound.as_mut() else {
            return false;
        };
        let drained = tokio::time::timeout(WAIT_LIMIT, async {
            while rx.recv().await.is_some() {}
        })
        .await;
        drained.is_ok()
    }
}

/// Connector handing out scripted sessions
#[derive(Default)]
pub struct MockConnector {
    sessions: Mutex<Vec<Arc<MockSession>>>,
    pending_failures: Mutex<u32>,
    echo: bool,
    connected: Notify,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sessions reflect every sent payload back as an inbound frame
    pub fn echo() -> Self {
        Self {
            echo: true,
            ..Self::default()
        }
    }

    /// Fail the next `count` connection attempts
    pub fn fail_next(&self, count: u32) {
        *self.pending_failures.lock() = count;
    }

    pub fn connect_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn session(&self, index: usize) -> Arc<MockSession> {
        Arc::clone(&self.sessions.lock()[index])
    }

    pub async fn wait_for_connects(&self, count: usize) {
        tokio::time::timeout(WAIT_LIMIT, async {
            loop {
                let notified = self.connected.notified();
                if self.connect_count() >= count {
                    return;
                }
                notified.await;
            }
        })
        .await
        .expect("timed out waiting for connections");
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str) -> Result<PushLink, ChatError> {
        {
            let mut failures = self.pending_failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(ChatError::transport("mock connection refused"));
            }
        }

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let outbound = if self.echo {
            let echo_tx = inbound_tx.clone();
            tokio::spawn(async move {
                while let Some(payload) = outbound_rx.recv().await {
                    let _ = echo_tx.send(TransportEvent::Frame(payload));
                }
            });
            None
        } else {
            Some(outbound_rx)
        };

        self.sessions.lock().push(Arc::new(MockSession {
            url: url.to_string(),
            inbound: inbound_tx,
            outbound: tokio::sync::Mutex::new(outbound),
        }));
        self.connected.notify_waiters();

        Ok(PushLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

// ============================================================================
// Mock Backend
// ============================================================================

/// Backend returning queued results; an empty queue yields an empty array
#[derive(Default)]
pub struct MockBackend {
    responses: Mutex<VecDeque<Result<Vec<ApiReply>, ChatError>>>,
    delay: Option<Duration>,
    /// Record of (conversation ref, payload) for every call
    pub calls: Mutex<Vec<(String, String)>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps this long before answering
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn queue_replies(&self, replies: Vec<ApiReply>) {
        self.responses.lock().push_back(Ok(replies));
    }

    /// Queue replies given as the JSON response body
    pub fn queue_json(&self, body: serde_json::Value) {
        let replies = serde_json::from_value(body).expect("invalid reply JSON");
        self.queue_replies(replies);
    }

    pub fn queue_error(&self, error: ChatError) {
        self.responses.lock().push_back(Err(error));
    }

    pub fn recorded_calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn post_message(
        &self,
        conversation_ref: &str,
        payload: &str,
    ) -> Result<Vec<ApiReply>, ChatError> {
        self.calls
            .lock()
            .push((conversation_ref.to_string(), payload.to_string()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses.lock().pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}
