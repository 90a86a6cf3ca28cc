//! State shared by the cart and favorites sessions.
//!
//! Holds the mode gate, the sync phase, the operation gate that serializes
//! mutations, and the realtime listener slot.

use crate::config::{BusyPolicy, SessionSettings};
use crate::error::{Result, SyncError};
use crate::events::{EventBus, SessionEvent};
use crate::listener::RealtimeListener;
use crate::store::{Mode, ModeGate};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Mutex as AsyncMutex;
use tote_engine::{Owner, OwnerId, PhaseMachine, SyncPhase};

/// Held for the duration of one mutation.
pub(crate) type OpGuard<'a> = tokio::sync::MutexGuard<'a, ()>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct SessionCore {
    /// Session name for log fields
    name: &'static str,
    pub(crate) settings: SessionSettings,
    pub(crate) gate: ModeGate,
    pub(crate) events: EventBus,
    phase: Mutex<PhaseMachine>,
    op_lock: AsyncMutex<()>,
    owner: Mutex<Option<Owner>>,
    listener: Mutex<Option<RealtimeListener>>,
    /// A remote change was skipped and no refetch has happened since
    resync_owed: AtomicBool,
    bootstrapped: AtomicBool,
}

impl SessionCore {
    pub(crate) fn new(name: &'static str, settings: SessionSettings) -> Self {
        Self {
            name,
            settings,
            gate: ModeGate::new(),
            events: EventBus::new(),
            phase: Mutex::new(PhaseMachine::new()),
            op_lock: AsyncMutex::new(()),
            owner: Mutex::new(None),
            listener: Mutex::new(None),
            resync_owed: AtomicBool::new(false),
            bootstrapped: AtomicBool::new(false),
        }
    }

    /// Take the operation gate according to the busy policy.
    pub(crate) async fn acquire(&self) -> Result<OpGuard<'_>> {
        match self.settings.busy_policy {
            BusyPolicy::Queue => Ok(self.op_lock.lock().await),
            BusyPolicy::Reject => self.op_lock.try_lock().map_err(|_| {
                tracing::debug!(session = self.name, "Rejecting mutation while busy");
                SyncError::Busy
            }),
        }
    }

    /// Take the gate for background work, which always waits its turn.
    pub(crate) async fn acquire_queued(&self) -> OpGuard<'_> {
        self.op_lock.lock().await
    }

    pub(crate) fn try_acquire(&self) -> Option<OpGuard<'_>> {
        self.op_lock.try_lock().ok()
    }

    pub(crate) fn phase(&self) -> SyncPhase {
        lock(&self.phase).phase()
    }

    pub(crate) fn transitions(&self) -> u64 {
        lock(&self.phase).transitions()
    }

    pub(crate) fn enter(&self, to: SyncPhase) -> Result<()> {
        lock(&self.phase).transition(to)?;
        tracing::trace!(session = self.name, phase = %to, "Phase changed");
        self.events.emit(SessionEvent::PhaseChanged(to));
        Ok(())
    }

    pub(crate) fn settle(&self) {
        let changed = {
            let mut phase = lock(&self.phase);
            let was_idle = phase.is_idle();
            phase.settle();
            !was_idle
        };
        if changed {
            self.events.emit(SessionEvent::PhaseChanged(SyncPhase::Idle));
        }
    }

    pub(crate) fn mode(&self) -> Mode {
        self.gate.current()
    }

    pub(crate) fn owner(&self) -> Option<Owner> {
        lock(&self.owner).clone()
    }

    pub(crate) fn account_id(&self) -> Option<OwnerId> {
        match &*lock(&self.owner) {
            Some(Owner::Account(id)) => Some(id.clone()),
            _ => None,
        }
    }

    /// Record the new owner and flip the gate to match.
    pub(crate) fn switch_to(&self, owner: Owner) {
        let mode = if owner.is_account() {
            Mode::Account
        } else {
            Mode::Guest
        };
        tracing::info!(session = self.name, %owner, "Switched owner");
        *lock(&self.owner) = Some(owner);
        self.gate.set(mode);
    }

    pub(crate) fn install_listener(&self, listener: RealtimeListener) -> Option<RealtimeListener> {
        lock(&self.listener).replace(listener)
    }

    pub(crate) fn take_listener(&self) -> Option<RealtimeListener> {
        lock(&self.listener).take()
    }

    pub(crate) fn is_listening(&self) -> bool {
        lock(&self.listener).is_some()
    }

    pub(crate) fn owe_resync(&self) {
        self.resync_owed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn take_owed_resync(&self) -> bool {
        self.resync_owed.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn clear_owed_resync(&self) {
        self.resync_owed.store(false, Ordering::SeqCst);
    }

    /// One-shot latch. Returns true for the first caller only.
    pub(crate) fn begin_bootstrap(&self) -> bool {
        self.bootstrapped
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Release the latch after a failed bootstrap so it can be retried.
    pub(crate) fn reset_bootstrap(&self) {
        self.bootstrapped.store(false, Ordering::SeqCst);
    }
}
