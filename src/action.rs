//! Embedded-view control
//!
//! Routed `open_url` / `close_url` actions drive an embedded view owned by
//! the host application. The router knows nothing about actions; the bridge
//! is just another observer.

use crate::protocol::{Action, InboundEvent};
use crate::router::{EventRouter, Subscription};
use parking_lot::Mutex;
use std::sync::Arc;

/// Host-side view the bridge drives
pub trait EmbeddedView: Send + Sync {
    fn open(&self, url: &str);
    fn close(&self);
}

impl<T: EmbeddedView + ?Sized> EmbeddedView for Arc<T> {
    fn open(&self, url: &str) {
        (**self).open(url);
    }

    fn close(&self) {
        (**self).close();
    }
}

/// Observer forwarding action events to an [`EmbeddedView`]
pub struct ActionBridge {
    current_url: Arc<Mutex<Option<String>>>,
    subscription: Subscription,
}

impl ActionBridge {
    /// Subscribe to `router`; the bridge stays attached until dropped or
    /// [`ActionBridge::detach`]ed.
    pub fn attach(router: &EventRouter, view: Arc<dyn EmbeddedView>) -> Self {
        let current_url = Arc::new(Mutex::new(None));
        let tracked = Arc::clone(&current_url);
        let subscription = router.subscribe(move |event: &InboundEvent| {
            let Some(action) = event.action() else {
                return;
            };
            tracing::debug!(action = action.name(), "Forwarding action to view");
            match action {
                Action::OpenUrl { url } => {
                    *tracked.lock() = Some(url.clone());
                    view.open(url);
                }
                Action::CloseUrl => {
                    // Close with nothing open is still forwarded
                    *tracked.lock() = None;
                    view.close();
                }
            }
        });

        Self {
            current_url,
            subscription,
        }
    }

    /// Url most recently opened and not yet closed
    pub fn current_url(&self) -> Option<String> {
        self.current_url.lock().clone()
    }

    pub fn detach(self) {
        self.subscription.unsubscribe();
    }
}
