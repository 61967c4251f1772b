//! Session-change notifications.
//!
//! The identity provider publishes a `SessionEvent` on every sign-in and sign-out.
//! Views subscribe for the lifetime of the view and re-run their session/profile
//! fetch on each event.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    SignedIn { session_id: String, subject_id: String },
    SignedOut { session_id: String, subject_id: String },
}

impl SessionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            SessionEvent::SignedIn { session_id, .. } | SessionEvent::SignedOut { session_id, .. } => session_id,
        }
    }

    pub fn subject_id(&self) -> &str {
        match self {
            SessionEvent::SignedIn { subject_id, .. } | SessionEvent::SignedOut { subject_id, .. } => subject_id,
        }
    }
}

#[derive(Clone)]
pub struct SessionEvents {
    tx: broadcast::Sender<SessionEvent>,
}

impl Default for SessionEvents {
    fn default() -> Self { Self::new(256) }
}

impl SessionEvents {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish to all current subscribers; no subscribers is fine.
    pub fn publish(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}
