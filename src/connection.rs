//! Push connection management
//!
//! Owns at most one live push session per process. Each session runs as a
//! single lifecycle task that connects, pumps inbound frames through the
//! codec into the router in arrival order, and reconnects after unexpected
//! closes until it is closed intentionally.

pub mod transport;

pub use transport::{Connector, PushLink, TransportEvent, WsConnector};

use crate::codec;
use crate::error::ChatError;
use crate::protocol::Identity;
use crate::router::EventRouter;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Default delay before reconnecting after an unexpected close
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(5000);

/// Lifecycle of one physical push session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    /// Connecting or Open
    pub fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }
}

/// Delay schedule between reconnect attempts. Retries never stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    Fixed(Duration),
    /// Doubles per consecutive failure, capped at `max`
    Exponential { initial: Duration, max: Duration },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::Fixed(DEFAULT_RECONNECT_INTERVAL)
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based, reset on open)
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed(interval) => interval,
            Self::Exponential { initial, max } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

/// Counters over the manager's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub connect_attempts: u64,
    pub opens: u64,
    pub reconnects_scheduled: u64,
}

#[derive(Default)]
struct Counters {
    connect_attempts: AtomicU64,
    opens: AtomicU64,
    reconnects_scheduled: AtomicU64,
}

type OutboundSlot = Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>;

/// Manager-side handle on a session task
struct Session {
    id: u64,
    identity: Identity,
    /// Cancelled means intentional: the task never reconnects after this
    cancel: CancellationToken,
    state: watch::Receiver<ConnectionState>,
    outbound: OutboundSlot,
}

impl Session {
    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn close(&self) {
        self.cancel.cancel();
        // Dropping the sender closes the physical session
        self.outbound.lock().take();
    }
}

struct Inner {
    connector: Arc<dyn Connector>,
    router: EventRouter,
    url_template: String,
    policy: ReconnectPolicy,
    current: Mutex<Option<Session>>,
    next_session: AtomicU64,
    counters: Arc<Counters>,
}

/// Owns the push connection. Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// `url_template` may contain `{identity}`, substituted per connection
    pub fn new(
        connector: Arc<dyn Connector>,
        router: EventRouter,
        url_template: impl Into<String>,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector,
                router,
                url_template: url_template.into(),
                policy,
                current: Mutex::new(None),
                next_session: AtomicU64::new(1),
                counters: Arc::new(Counters::default()),
            }),
        }
    }

    /// Make sure a session for `identity` exists.
    ///
    /// No-op while a session for the same identity is Connecting or Open.
    /// Otherwise any existing session is closed intentionally and a new one
    /// is started. Does not wait for the connection to open.
    pub fn ensure_connected(&self, identity: &Identity) {
        let mut current = self.inner.current.lock();

        if let Some(session) = current.as_ref() {
            if session.identity == *identity && session.state().is_live() {
                return;
            }
        }

        if let Some(previous) = current.take() {
            tracing::info!(
                identity = %previous.identity,
                session = previous.id,
                "Closing previous push session"
            );
            previous.close();
        }

        *current = Some(self.spawn_session(identity.clone()));
    }

    /// Close the current session intentionally and forget its identity.
    /// Idempotent.
    pub fn disconnect(&self) {
        if let Some(session) = self.inner.current.lock().take() {
            tracing::info!(identity = %session.identity, session = session.id, "Disconnecting");
            session.close();
        }
    }

    /// State of the current session (`Closed` when there is none)
    pub fn state(&self) -> ConnectionState {
        self.inner
            .current
            .lock()
            .as_ref()
            .map_or(ConnectionState::Closed, Session::state)
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn identity(&self) -> Option<Identity> {
        self.inner
            .current
            .lock()
            .as_ref()
            .map(|s| s.identity.clone())
    }

    /// Hand a payload to the open session. Returns false when nothing is open.
    pub fn send(&self, payload: &str) -> bool {
        let current = self.inner.current.lock();
        let Some(session) = current.as_ref() else {
            return false;
        };
        if session.state() != ConnectionState::Open {
            return false;
        }
        let outbound = session.outbound.lock();
        outbound
            .as_ref()
            .is_some_and(|tx| tx.send(payload.to_string()).is_ok())
    }

    /// Wait until the current session is Open
    pub async fn wait_until_open(&self) -> Result<(), ChatError> {
        let mut state = self
            .inner
            .current
            .lock()
            .as_ref()
            .map(|s| s.state.clone())
            .ok_or_else(|| ChatError::transport("No push session"))?;

        state
            .wait_for(|s| *s == ConnectionState::Open)
            .await
            .map(|_| ())
            .map_err(|_| ChatError::transport("Push session ended before opening"))
    }

    pub fn stats(&self) -> ConnectionStats {
        let counters = &self.inner.counters;
        ConnectionStats {
            connect_attempts: counters.connect_attempts.load(Ordering::Relaxed),
            opens: counters.opens.load(Ordering::Relaxed),
            reconnects_scheduled: counters.reconnects_scheduled.load(Ordering::Relaxed),
        }
    }

    pub fn router(&self) -> &EventRouter {
        &self.inner.router
    }

    fn spawn_session(&self, identity: Identity) -> Session {
        let id = self.inner.next_session.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let outbound: OutboundSlot = Arc::new(Mutex::new(None));

        let task = SessionTask {
            id,
            url: self.inner.url_template.replace("{identity}", identity.as_str()),
            identity: identity.clone(),
            connector: Arc::clone(&self.inner.connector),
            router: self.inner.router.clone(),
            policy: self.inner.policy,
            cancel: cancel.clone(),
            state: state_tx,
            outbound: Arc::clone(&outbound),
            counters: Arc::clone(&self.inner.counters),
        };
        tokio::spawn(task.run());

        Session {
            id,
            identity,
            cancel,
            state: state_rx,
            outbound,
        }
    }
}

/// How a pumped session ended
enum SessionEnd {
    Intentional,
    Unexpected,
}

/// The lifecycle task of one session
struct SessionTask {
    id: u64,
    identity: Identity,
    url: String,
    connector: Arc<dyn Connector>,
    router: EventRouter,
    policy: ReconnectPolicy,
    cancel: CancellationToken,
    state: watch::Sender<ConnectionState>,
    outbound: OutboundSlot,
    counters: Arc<Counters>,
}

impl SessionTask {
    async fn run(self) {
        let mut failures: u32 = 0;

        loop {
            self.set_state(ConnectionState::Connecting);
            self.counters.connect_attempts.fetch_add(1, Ordering::Relaxed);

            let connected = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                result = self.connector.connect(&self.url) => result,
            };

            match connected {
                Ok(link) => {
                    failures = 0;
                    if let SessionEnd::Intentional = self.pump(link).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        identity = %self.identity,
                        session = self.id,
                        error = %e,
                        "Push connection failed"
                    );
                    self.set_state(ConnectionState::Closed);
                }
            }

            if self.cancel.is_cancelled() {
                break;
            }

            failures = failures.saturating_add(1);
            let delay = self.policy.delay(failures);
            self.counters
                .reconnects_scheduled
                .fetch_add(1, Ordering::Relaxed);
            tracing::info!(
                identity = %self.identity,
                session = self.id,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Scheduling reconnect"
            );

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(ConnectionState::Closed);
        tracing::info!(identity = %self.identity, session = self.id, "Push session terminated");
    }

    /// Drive one open physical session until it closes
    async fn pump(&self, link: PushLink) -> SessionEnd {
        let PushLink {
            outbound,
            mut inbound,
        } = link;

        {
            let mut slot = self.outbound.lock();
            // Lost a race with close(): the sender must not be published
            if self.cancel.is_cancelled() {
                return SessionEnd::Intentional;
            }
            *slot = Some(outbound);
        }
        self.counters.opens.fetch_add(1, Ordering::Relaxed);
        self.set_state(ConnectionState::Open);
        tracing::info!(
            identity = %self.identity,
            session = self.id,
            url = %self.url,
            "Push connection open"
        );

        let end = loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    self.set_state(ConnectionState::Closing);
                    break SessionEnd::Intentional;
                }
                event = inbound.recv() => match event {
                    Some(TransportEvent::Frame(frame)) => self.handle_frame(&frame),
                    Some(TransportEvent::Error(message)) => {
                        tracing::warn!(
                            identity = %self.identity,
                            session = self.id,
                            error = %message,
                            "Push transport error"
                        );
                    }
                    Some(TransportEvent::Closed) | None => {
                        tracing::warn!(
                            identity = %self.identity,
                            session = self.id,
                            "Push connection closed unexpectedly"
                        );
                        break SessionEnd::Unexpected;
                    }
                },
            }
        };

        self.outbound.lock().take();
        self.set_state(ConnectionState::Closed);
        end
    }

    fn handle_frame(&self, frame: &str) {
        match codec::decode(frame) {
            Ok(Some(event)) => self.router.dispatch(&event),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(
                    identity = %self.identity,
                    session = self.id,
                    error = %e,
                    "Dropping undecodable frame"
                );
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }
}

impl Drop for SessionTask {
    fn drop(&mut self) {
        // However the task ends, the manager must not see a live session
        self.outbound.lock().take();
        self.state.send_replace(ConnectionState::Closed);
    }
}
