//! Outbound message delivery to connected sessions.

use std::sync::Arc;

use dashmap::DashMap;
use joyhub_types::{ServerMessage, SessionId};
use tokio::sync::mpsc;
use tracing::debug;

/// Sending half of a session's outbound queue.
pub type OutboundSender = mpsc::UnboundedSender<ServerMessage>;

/// Point-to-point and fan-out delivery over per-session channels.
#[derive(Clone, Default)]
pub struct Broadcaster {
    sessions: Arc<DashMap<SessionId, OutboundSender>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session: SessionId, tx: OutboundSender) {
        self.sessions.insert(session, tx);
    }

    pub fn unregister(&self, session: SessionId) {
        self.sessions.remove(&session);
    }

    /// Send to one session. Returns `false` if it is gone.
    pub fn send_to(&self, session: SessionId, message: ServerMessage) -> bool {
        match self.sessions.get(&session) {
            Some(tx) => tx.send(message).is_ok(),
            None => {
                debug!(session = %session, "dropping message for unknown session");
                false
            }
        }
    }

    /// Send to every connected session.
    pub fn broadcast(&self, message: &ServerMessage) {
        for entry in self.sessions.iter() {
            let _ = entry.value().send(message.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
