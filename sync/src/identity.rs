//! Identity provider plumbing.
//!
//! The storefront's auth layer publishes the current identity through an
//! [`IdentityHandle`]; sessions follow it with [`follow_identity`].

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tote_engine::OwnerId;

/// Who is using the storefront.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IdentityState {
    /// Auth has not reported yet
    #[default]
    Unresolved,
    Guest,
    Account(OwnerId),
}

impl IdentityState {
    pub fn account_id(&self) -> Option<&str> {
        match self {
            IdentityState::Account(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, IdentityState::Unresolved)
    }
}

/// Publisher side of the identity channel.
#[derive(Debug, Clone)]
pub struct IdentityHandle {
    sender: Arc<watch::Sender<IdentityState>>,
}

impl IdentityHandle {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(IdentityState::Unresolved);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn current(&self) -> IdentityState {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<IdentityState> {
        self.sender.subscribe()
    }

    /// Auth finished without a signed-in account.
    pub fn resolve_guest(&self) {
        self.publish(IdentityState::Guest);
    }

    pub fn login(&self, account_id: impl Into<OwnerId>) {
        self.publish(IdentityState::Account(account_id.into()));
    }

    pub fn logout(&self) {
        self.publish(IdentityState::Guest);
    }

    fn publish(&self, state: IdentityState) {
        self.sender.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            tracing::debug!(from = ?current, to = ?state, "Identity changed");
            *current = state;
            true
        });
    }
}

impl Default for IdentityHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// A session that switches stores when the identity changes.
#[async_trait]
pub trait IdentityAware: Send + Sync {
    /// Bring the session in line with `identity`.
    ///
    /// Unresolved identities are ignored; guest after account logs out;
    /// account from any other state logs in (migrating guest data).
    async fn apply_identity(&self, identity: &IdentityState) -> Result<()>;
}

/// Drive `sessions` through every identity published on `identity`.
///
/// Runs until the publisher is dropped. Session errors are logged; the
/// sessions report them to their own event subscribers.
pub fn follow_identity(
    mut identity: watch::Receiver<IdentityState>,
    sessions: Vec<Arc<dyn IdentityAware>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let state = identity.borrow_and_update().clone();
            for session in &sessions {
                if let Err(e) = session.apply_identity(&state).await {
                    tracing::warn!(identity = ?state, error = %e, "Failed to apply identity");
                }
            }
            if identity.changed().await.is_err() {
                break;
            }
        }
        tracing::debug!("Identity publisher dropped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_publishes_changes_only() {
        let handle = IdentityHandle::new();
        let mut rx = handle.subscribe();
        assert_eq!(*rx.borrow_and_update(), IdentityState::Unresolved);

        handle.resolve_guest();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), IdentityState::Guest);

        handle.logout();
        assert!(!rx.has_changed().unwrap());

        handle.login("acct-1");
        assert_eq!(handle.current().account_id(), Some("acct-1"));
    }

    #[test]
    fn resolution() {
        assert!(!IdentityState::Unresolved.is_resolved());
        assert!(IdentityState::Guest.is_resolved());
        assert_eq!(IdentityState::Guest.account_id(), None);
    }
}
