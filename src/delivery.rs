//! Message delivery
//!
//! A user message goes out over the synchronous call and, when the push
//! connection is open, over the push channel as well. Both paths may produce
//! a reply for the same turn; both replies are routed to observers. Consumers
//! that need exactly-once delivery de-duplicate by conversation reference and
//! message identifier (see [`crate::transcript::Transcript`]).

pub mod backend;

pub use backend::{Backend, HttpBackend, LoggingBackend};

use crate::codec;
use crate::connection::ConnectionManager;
use crate::error::ChatError;
use crate::protocol::{ApiReply, Identity, InboundEvent, OutboundMessage};
use crate::router::EventRouter;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Sends user messages over both channels and resolves replies
#[derive(Clone)]
pub struct DeliveryCoordinator {
    connections: ConnectionManager,
    backend: Arc<dyn Backend>,
    router: EventRouter,
}

impl DeliveryCoordinator {
    pub fn new(connections: ConnectionManager, backend: Arc<dyn Backend>) -> Self {
        let router = connections.router().clone();
        Self {
            connections,
            backend,
            router,
        }
    }

    /// Deliver one message.
    ///
    /// Returns the first element of the synchronous call's reply array (also
    /// dispatched to observers), `None` for an empty array, or
    /// [`ChatError::RequestFailed`]. The push-channel copy is sent either way
    /// when the connection is open.
    pub async fn send_message(
        &self,
        outbound: &OutboundMessage,
        identity: &Identity,
        conversation_ref: &str,
    ) -> Result<Option<ApiReply>, ChatError> {
        self.connections.ensure_connected(identity);

        let payload = codec::encode(outbound);

        let result = match self.backend.post_message(conversation_ref, &payload).await {
            Ok(replies) => {
                let reply = replies.into_iter().next();
                if let Some(event) = reply
                    .as_ref()
                    .and_then(|r| codec::reply_event(r, conversation_ref))
                {
                    self.router.dispatch(&event);
                }
                Ok(reply)
            }
            Err(e) => {
                tracing::warn!(
                    identity = %identity,
                    conversation = %conversation_ref,
                    status = ?e.status(),
                    error = %e,
                    "Synchronous call failed, relying on push channel"
                );
                Err(e)
            }
        };

        if self.connections.send(&payload) {
            tracing::debug!(
                identity = %identity,
                conversation = %conversation_ref,
                "Message also sent over push channel"
            );
        }

        result
    }

    /// Deliver one message and wait for the first event carrying text.
    ///
    /// The waiting observer is registered before anything is sent and is
    /// removed once this returns, whichever way. A failed synchronous call
    /// does not end the wait, since the push channel may still answer.
    /// There is no internal timeout: cancel `cancel` to give up, which
    /// yields [`ChatError::Cancelled`]. Nothing already sent is retracted.
    pub async fn send_message_and_wait(
        &self,
        outbound: OutboundMessage,
        identity: Identity,
        conversation_ref: String,
        cancel: CancellationToken,
    ) -> Result<InboundEvent, ChatError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let pending = Mutex::new(Some(reply_tx));
        let subscription = self.router.subscribe(move |event| {
            if !event.has_text() {
                return;
            }
            if let Some(tx) = pending.lock().take() {
                let _ = tx.send(event.clone());
            }
        });

        let coordinator = self.clone();
        tokio::spawn(async move {
            // Failures are already logged; the wait continues on the push path
            let _ = coordinator
                .send_message(&outbound, &identity, &conversation_ref)
                .await;
        });

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ChatError::Cancelled),
            reply = reply_rx => reply.map_err(|_| ChatError::Cancelled),
        };

        subscription.unsubscribe();
        outcome
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }
}
