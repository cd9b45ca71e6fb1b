//! chatlink - real-time conversation transport client
//!
//! Keeps one push connection per identity alive, delivers user messages over
//! a synchronous call and the push channel, and routes decoded inbound
//! events to registered observers in arrival order.

pub mod action;
pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod delivery;
pub mod error;
pub mod protocol;
pub mod router;
pub mod transcript;

#[cfg(test)]
pub mod testing;

pub use action::{ActionBridge, EmbeddedView};
pub use client::ChatClient;
pub use config::{BackoffKind, ClientConfig};
pub use connection::{ConnectionManager, ConnectionState, ConnectionStats, ReconnectPolicy};
pub use delivery::DeliveryCoordinator;
pub use error::{ChatError, DecodeFailure};
pub use protocol::{Action, Attachment, EventKind, Identity, InboundEvent, OutboundMessage};
pub use router::{EventRouter, Subscription};
pub use transcript::{Entry, Role, Transcript};
