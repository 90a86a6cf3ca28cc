//! Sync phase state machine and mutation policies.
//!
//! Every cart or favorites mutation walks the phase machine:
//!
//! ```text
//! Idle -> Mutating -> Resyncing -> Idle
//!            |                      ^
//!            +----------------------+   (guest writes, failures)
//! Idle -> Resyncing -> Idle             (bootstrap, remote change)
//! ```

use crate::{error::Result, Error};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Phase of the reconciliation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    /// Nothing in flight
    #[default]
    Idle,
    /// A write is in flight
    Mutating,
    /// State is being re-fetched from the remote collection
    Resyncing,
}

impl SyncPhase {
    /// Whether moving from `self` to `to` is a legal transition.
    pub fn can_transition_to(self, to: SyncPhase) -> bool {
        use SyncPhase::*;
        matches!(
            (self, to),
            (Idle, Mutating)
                | (Idle, Resyncing)
                | (Mutating, Resyncing)
                | (Mutating, Idle)
                | (Resyncing, Idle)
        )
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Mutating => "mutating",
            SyncPhase::Resyncing => "resyncing",
        })
    }
}

/// Tracks the current phase and validates transitions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseMachine {
    phase: SyncPhase,
    transitions: u64,
}

impl PhaseMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    /// Number of transitions taken since creation.
    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    pub fn is_idle(&self) -> bool {
        self.phase == SyncPhase::Idle
    }

    /// Move to `to`, rejecting illegal transitions.
    pub fn transition(&mut self, to: SyncPhase) -> Result<SyncPhase> {
        if !self.phase.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                from: self.phase,
                to,
            });
        }
        self.phase = to;
        self.transitions += 1;
        Ok(to)
    }

    /// Return to `Idle` from any phase. Used when an operation fails midway.
    pub fn settle(&mut self) {
        if self.phase != SyncPhase::Idle {
            self.phase = SyncPhase::Idle;
            self.transitions += 1;
        }
    }
}

/// Consistency policy applied to a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationPolicy {
    /// Write remotely, then re-fetch before the caller sees the result
    Confirmed,
    /// Apply in memory now, write the latest value after a quiet period
    OptimisticDebounced,
}

/// Kinds of mutations the sessions perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationKind {
    Add,
    UpdateQuantity,
    Remove,
    Clear,
    Toggle,
}

impl MutationKind {
    /// Policy for this kind of mutation.
    ///
    /// Guest sessions never write remotely, so they are always confirmed
    /// (the local write completes synchronously).
    pub fn policy(self, account_mode: bool) -> MutationPolicy {
        match self {
            MutationKind::UpdateQuantity if account_mode => MutationPolicy::OptimisticDebounced,
            _ => MutationPolicy::Confirmed,
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MutationKind::Add => "add",
            MutationKind::UpdateQuantity => "update_quantity",
            MutationKind::Remove => "remove",
            MutationKind::Clear => "clear",
            MutationKind::Toggle => "toggle",
        })
    }
}
