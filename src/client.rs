//! Client composition root
//!
//! Wires router, connection manager and delivery coordinator together from a
//! [`ClientConfig`]. Each [`ChatClient`] is independent; any number may
//! coexist in one process.

use crate::config::ClientConfig;
use crate::connection::{ConnectionManager, ConnectionState, Connector, WsConnector};
use crate::delivery::{Backend, DeliveryCoordinator, HttpBackend, LoggingBackend};
use crate::error::ChatError;
use crate::protocol::{ApiReply, Identity, InboundEvent, OutboundMessage};
use crate::router::{EventRouter, Subscription};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct ChatClient {
    router: EventRouter,
    connections: ConnectionManager,
    coordinator: DeliveryCoordinator,
}

impl ChatClient {
    /// Client using the WebSocket push channel and the HTTP backend
    pub fn new(config: &ClientConfig) -> Result<Self, ChatError> {
        config.validate()?;
        let http: Arc<dyn Backend> = Arc::new(HttpBackend::new(config)?);
        let backend = Arc::new(LoggingBackend::new(http));
        Ok(Self::with_parts(config, Arc::new(WsConnector), backend))
    }

    /// Client over caller-supplied transports
    pub fn with_parts(
        config: &ClientConfig,
        connector: Arc<dyn Connector>,
        backend: Arc<dyn Backend>,
    ) -> Self {
        let router = EventRouter::new();
        let connections = ConnectionManager::new(
            connector,
            router.clone(),
            config.push_url.clone(),
            config.reconnect_policy(),
        );
        let coordinator = DeliveryCoordinator::new(connections.clone(), backend);

        tracing::debug!(
            push_url = %config.push_url,
            api_base_url = %config.api_base_url,
            policy = ?config.reconnect_policy(),
            "Chat client created"
        );

        Self {
            router,
            connections,
            coordinator,
        }
    }

    pub async fn send_message(
        &self,
        message: &OutboundMessage,
        identity: &Identity,
        conversation_ref: &str,
    ) -> Result<Option<ApiReply>, ChatError> {
        self.coordinator
            .send_message(message, identity, conversation_ref)
            .await
    }

    pub async fn send_message_and_wait(
        &self,
        message: OutboundMessage,
        identity: Identity,
        conversation_ref: impl Into<String>,
        cancel: CancellationToken,
    ) -> Result<InboundEvent, ChatError> {
        self.coordinator
            .send_message_and_wait(message, identity, conversation_ref.into(), cancel)
            .await
    }

    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        self.router.subscribe(observer)
    }

    pub fn ensure_connected(&self, identity: &Identity) {
        self.connections.ensure_connected(identity);
    }

    pub fn disconnect(&self) {
        self.connections.disconnect();
    }

    pub fn state(&self) -> ConnectionState {
        self.connections.state()
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn coordinator(&self) -> &DeliveryCoordinator {
        &self.coordinator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionBridge, EmbeddedView};
    use crate::testing::{MockBackend, MockConnector};
    use crate::transcript::{Role, Transcript};
    use parking_lot::Mutex;
    use std::time::Duration;

    fn config() -> ClientConfig {
        ClientConfig {
            push_url: "ws://push.test/ws/{identity}".to_string(),
            api_base_url: "http://api.test".to_string(),
            reconnect_interval_ms: 50,
            ..ClientConfig::default()
        }
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let result = ChatClient::new(&ClientConfig::default());
        assert!(matches!(result, Err(ChatError::Config(_))));
    }

    #[tokio::test]
    async fn test_echo_round_trip_preserves_content() {
        let connector = Arc::new(MockConnector::echo());
        let client =
            ChatClient::with_parts(&config(), connector.clone(), Arc::new(MockBackend::new()));
        let identity = Identity::new("u1");
        client.ensure_connected(&identity);
        client.connections().wait_until_open().await.unwrap();

        let event = client
            .send_message_and_wait(
                OutboundMessage::text("echo me"),
                identity,
                "c1",
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(event.text(), Some("echo me"));
        assert_eq!(connector.session(0).url, "ws://push.test/ws/u1");
    }

    #[tokio::test]
    async fn test_clients_are_independent() {
        let first_connector = Arc::new(MockConnector::new());
        let second_connector = Arc::new(MockConnector::new());
        let first = ChatClient::with_parts(
            &config(),
            first_connector.clone(),
            Arc::new(MockBackend::new()),
        );
        let second = ChatClient::with_parts(
            &config(),
            second_connector.clone(),
            Arc::new(MockBackend::new()),
        );

        first.ensure_connected(&Identity::new("widget-a"));
        second.ensure_connected(&Identity::new("widget-b"));
        first.connections().wait_until_open().await.unwrap();
        second.connections().wait_until_open().await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let _subscription = second.subscribe(move |e| seen_clone.lock().push(e.clone()));

        first_connector
            .session(0)
            .push_frame(r#"{"type":"assistant","text":"only for a"}"#);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(seen.lock().is_empty());
        first.disconnect();
        assert_eq!(second.state(), ConnectionState::Open);
    }

    #[derive(Default)]
    struct View {
        opened: Mutex<Vec<String>>,
    }

    impl EmbeddedView for View {
        fn open(&self, url: &str) {
            self.opened.lock().push(url.to_string());
        }

        fn close(&self) {}
    }

    #[tokio::test]
    async fn test_collaborators_share_one_router() {
        let connector = Arc::new(MockConnector::new());
        let backend = Arc::new(MockBackend::new());
        backend.queue_json(serde_json::json!([{
            "id": 1,
            "type": "assistant",
            "text": "hi there",
            "conversation": {"conversation_id": "c1", "status": "open", "slots": {}}
        }]));
        let client = ChatClient::with_parts(&config(), connector.clone(), backend);
        let transcript = Transcript::deduplicating();
        let _recording = transcript.attach(client.router());
        let view = Arc::new(View::default());
        let _bridge = ActionBridge::attach(client.router(), view.clone());
        let identity = Identity::new("u1");
        client.ensure_connected(&identity);
        client.connections().wait_until_open().await.unwrap();

        transcript.record_user("hello", Some("c1"));
        client
            .send_message(&OutboundMessage::text("hello"), &identity, "c1")
            .await
            .unwrap();
        let session = connector.session(0);
        session.push_frame(
            r#"{"event":"{\"type\":\"assistant\",\"text\":\"hi there\",\"conversation_id\":\"c1\",\"pk\":1}"}"#,
        );
        session.push_frame(
            r#"{"type":"event","event":{"type":"ui","action":"open_url","url":"https://docs.test"}}"#,
        );
        tokio::time::sleep(Duration::from_millis(50)).await;

        let roles: Vec<Role> = transcript.entries().iter().map(|e| e.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
        assert_eq!(*view.opened.lock(), vec!["https://docs.test".to_string()]);
    }
}
