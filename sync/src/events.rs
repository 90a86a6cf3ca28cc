//! Session events for the surrounding application.
//!
//! Presentation concerns (opening the cart drawer, toasts) are not handled by
//! the sessions; they are published here for the UI layer to act on.

use tokio::sync::broadcast;
use tote_engine::{MutationKind, SyncPhase, Totals};

/// Capacity of each session's event channel.
const EVENT_CAPACITY: usize = 64;

/// Something the UI may want to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// An item was added; the cart should become visible.
    CartOpened,
    /// The engine moved to a new phase.
    PhaseChanged(SyncPhase),
    /// In-memory state was replaced from the remote collection.
    Resynced { totals: Totals },
    /// Favorites were replaced from the remote collection.
    FavoritesResynced { count: usize },
    /// A background write failed; state was re-fetched.
    SyncFailed { kind: MutationKind, message: String },
    /// A remote change arrived while local work was in flight and was ignored.
    RemoteChangeDeferred,
    /// Guest state was pushed to the account.
    Migrated { lines: usize },
}

/// Fan-out of session events. Sending never fails when nobody listens.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: SessionEvent) {
        tracing::trace!(?event, "session event");
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
